//! Core backtesting engine.
//!
//! Runs the simulation loop over the half-open window
//! `[start_date, end_date)`, once per trading date in ascending order:
//! 1. Gather today's quote for every symbol (missing data is skipped)
//! 2. Mark open positions to market
//! 3. Close expired positions (and everything on the final date)
//! 4. Ask the strategy for new positions and open accepted ones
//! 5. Record daily equity
//!
//! Closes always precede opens within a day. A run is single-threaded and
//! deterministic: symbols are visited in ascending order and every map is
//! ordered.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::data::{Greeks, MarketData, MarketQuote};
use crate::metrics::{BacktestMetrics, MetricsCalculator};
use crate::pricing::{PricingContext, PricingError};
use crate::risk::PortfolioGreeks;

use super::commission::CommissionModel;
use super::position::{CloseMethod, Exit, Position, PositionError};
use super::strategy::{MarketWindow, Strategy};

/// Configuration for backtest execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// First simulated date (inclusive).
    pub start_date: NaiveDate,

    /// End of the window (exclusive).
    pub end_date: NaiveDate,

    /// Starting cash.
    pub initial_capital: Decimal,

    /// Continuously compounded risk-free rate.
    #[serde(default)]
    pub risk_free_rate: f64,

    /// Continuous dividend yield of the underlyings.
    #[serde(default)]
    pub dividend_yield: f64,

    /// Commission per contract, charged on entry and on exit.
    #[serde(default = "default_commission_per_contract")]
    pub commission_per_contract: Decimal,

    /// Calendar days between strategy checks for a symbol (1 = every day).
    #[serde(default = "default_trade_frequency_days")]
    pub trade_frequency_days: u32,

    /// Length of the trailing bar window handed to the strategy.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: usize,
}

fn default_commission_per_contract() -> Decimal {
    Decimal::ONE
}

fn default_trade_frequency_days() -> u32 {
    1
}

fn default_lookback_days() -> usize {
    30
}

impl BacktestConfig {
    pub fn new(start_date: NaiveDate, end_date: NaiveDate, initial_capital: Decimal) -> Self {
        Self {
            start_date,
            end_date,
            initial_capital,
            risk_free_rate: 0.0,
            dividend_yield: 0.0,
            commission_per_contract: default_commission_per_contract(),
            trade_frequency_days: default_trade_frequency_days(),
            lookback_days: default_lookback_days(),
        }
    }

    /// Reject configurations a run cannot start from.
    pub fn validate(&self) -> Result<(), BacktestError> {
        if self.start_date > self.end_date {
            return Err(BacktestError::InvalidConfig(format!(
                "start_date {} is after end_date {}",
                self.start_date, self.end_date
            )));
        }
        if self.initial_capital <= Decimal::ZERO {
            return Err(BacktestError::InvalidConfig(format!(
                "initial_capital must be positive, got {}",
                self.initial_capital
            )));
        }
        if !self.risk_free_rate.is_finite() {
            return Err(BacktestError::InvalidConfig(format!(
                "risk_free_rate must be finite, got {}",
                self.risk_free_rate
            )));
        }
        if !(self.dividend_yield.is_finite() && self.dividend_yield >= 0.0) {
            return Err(BacktestError::InvalidConfig(format!(
                "dividend_yield must be non-negative, got {}",
                self.dividend_yield
            )));
        }
        if self.commission_per_contract < Decimal::ZERO {
            return Err(BacktestError::InvalidConfig(format!(
                "commission_per_contract must be non-negative, got {}",
                self.commission_per_contract
            )));
        }
        if self.trade_frequency_days == 0 {
            return Err(BacktestError::InvalidConfig(
                "trade_frequency_days must be at least 1".to_string(),
            ));
        }
        if self.lookback_days == 0 {
            return Err(BacktestError::InvalidConfig(
                "lookback_days must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn pricing_context(&self) -> PricingContext {
        PricingContext::new(self.risk_free_rate, self.dividend_yield)
    }

    pub fn commission_model(&self) -> CommissionModel {
        CommissionModel::new(self.commission_per_contract)
    }
}

/// Handle of a position in the engine's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PositionId(pub usize);

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BacktestError {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid pricing input for {symbol} on {date}: {source}")]
    InvalidInput {
        symbol: String,
        date: NaiveDate,
        #[source]
        source: PricingError,
    },

    #[error("Position {0} is already closed")]
    AlreadyClosed(PositionId),

    #[error("Position {id} on {symbol}: {source}")]
    Position {
        id: PositionId,
        symbol: String,
        #[source]
        source: PositionError,
    },
}

/// Why an opportunity or a symbol-day was skipped.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SkipReason {
    #[error("no bar or volatility estimate")]
    MissingData,

    #[error("strategy callback failed: {0}")]
    StrategyCallback(String),

    #[error("debit {required} exceeds cash {available}")]
    InsufficientCapital { required: Decimal, available: Decimal },
}

/// One recovered condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skip {
    pub date: NaiveDate,
    pub symbol: String,
    pub reason: SkipReason,
}

/// Data-quality and rejection counters for a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunDiagnostics {
    pub missing_data: usize,
    pub strategy_errors: usize,
    pub rejected_trades: usize,
    pub skips: Vec<Skip>,
}

impl RunDiagnostics {
    fn record(&mut self, date: NaiveDate, symbol: &str, reason: SkipReason) {
        match &reason {
            SkipReason::MissingData => {
                self.missing_data += 1;
                debug!("{} {}: skipped, {}", date, symbol, reason);
            }
            SkipReason::StrategyCallback(_) => {
                self.strategy_errors += 1;
                warn!("{} {}: skipped, {}", date, symbol, reason);
            }
            SkipReason::InsufficientCapital { .. } => {
                self.rejected_trades += 1;
                warn!("{} {}: rejected, {}", date, symbol, reason);
            }
        }
        self.skips.push(Skip {
            date,
            symbol: symbol.to_string(),
            reason,
        });
    }

    pub fn total(&self) -> usize {
        self.missing_data + self.strategy_errors + self.rejected_trades
    }
}

/// Daily equity snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub equity: Decimal,
    pub cash: Decimal,
    pub positions_value: Decimal,
    pub open_positions: usize,
    pub daily_pnl: Decimal,
    /// Portfolio Greek exposure at the close of the day.
    pub greeks: Greeks,
}

/// Result of a completed backtest.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestResult {
    config: BacktestConfig,
    metrics: BacktestMetrics,
    equity_curve: Vec<EquityPoint>,
    closed_positions: Vec<Position>,
    diagnostics: RunDiagnostics,
}

impl BacktestResult {
    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    pub fn metrics(&self) -> &BacktestMetrics {
        &self.metrics
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity_curve
    }

    /// Closed positions in the order they were closed.
    pub fn closed_positions(&self) -> &[Position] {
        &self.closed_positions
    }

    pub fn diagnostics(&self) -> &RunDiagnostics {
        &self.diagnostics
    }

    pub fn final_equity(&self) -> Decimal {
        self.equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(self.config.initial_capital)
    }

    /// Generate summary string.
    pub fn summary(&self) -> String {
        format!(
            "Backtest Results ({} to {})\n\
             ----------------------------------------\n\
             Initial Capital: ${:.2}\n\
             Final Equity: ${:.2}\n\
             \n\
             {}",
            self.config.start_date,
            self.config.end_date,
            self.config.initial_capital,
            self.final_equity(),
            self.metrics.summary(),
        )
    }
}

/// The main backtesting engine.
///
/// Owns every position of a run in an arena; open and closed lists hold
/// [`PositionId`] handles into it.
pub struct BacktestEngine {
    config: BacktestConfig,
    commission: CommissionModel,
    pricing: PricingContext,
    cash: Decimal,
    positions: Vec<Position>,
    open: Vec<PositionId>,
    closed: Vec<PositionId>,
    equity_curve: Vec<EquityPoint>,
    last_checked: BTreeMap<String, NaiveDate>,
    diagnostics: RunDiagnostics,
}

impl BacktestEngine {
    /// Create a new backtest engine.
    pub fn new(config: BacktestConfig) -> Result<Self, BacktestError> {
        config.validate()?;
        Ok(Self {
            commission: config.commission_model(),
            pricing: config.pricing_context(),
            cash: config.initial_capital,
            positions: Vec::new(),
            open: Vec::new(),
            closed: Vec::new(),
            equity_curve: Vec::new(),
            last_checked: BTreeMap::new(),
            diagnostics: RunDiagnostics::default(),
            config,
        })
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    pub fn position(&self, id: PositionId) -> Option<&Position> {
        self.positions.get(id.0)
    }

    /// Run the backtest over pre-loaded market data.
    ///
    /// Recoverable conditions (missing data, strategy errors, rejected
    /// trades) are counted in the result's diagnostics; only invalid pricing
    /// input and lifecycle violations abort the run.
    pub fn run<S: Strategy + ?Sized>(
        &mut self,
        data: &MarketData,
        strategy: &S,
    ) -> Result<BacktestResult, BacktestError> {
        // Reset state
        self.cash = self.config.initial_capital;
        self.positions.clear();
        self.open.clear();
        self.closed.clear();
        self.equity_curve.clear();
        self.last_checked.clear();
        self.diagnostics = RunDiagnostics::default();

        let dates = data.trading_dates(self.config.start_date, self.config.end_date);
        info!(
            "Starting backtest {} to {}: {} symbols, {} trading days",
            self.config.start_date,
            self.config.end_date,
            data.len(),
            dates.len()
        );

        let last = dates.len().saturating_sub(1);
        for (idx, &date) in dates.iter().enumerate() {
            self.process_day(data, strategy, date, idx == last)?;
        }

        let result = self.build_result();
        info!(
            "Backtest finished: {} trades, final equity ${:.2}, {} skips",
            result.metrics.total_trades,
            result.final_equity(),
            result.diagnostics.total()
        );
        Ok(result)
    }

    /// Process a single trading day.
    fn process_day<S: Strategy + ?Sized>(
        &mut self,
        data: &MarketData,
        strategy: &S,
        date: NaiveDate,
        is_final: bool,
    ) -> Result<(), BacktestError> {
        // 1. Quotes for every symbol with data today
        let mut quotes: BTreeMap<&str, MarketQuote> = BTreeMap::new();
        for symbol in data.symbols() {
            match data.quote(symbol, date) {
                Some(quote) => {
                    quotes.insert(symbol, quote);
                }
                None => self.diagnostics.record(date, symbol, SkipReason::MissingData),
            }
        }

        // 2. Mark-to-market
        self.update_positions_mtm(date, &quotes)?;

        // 3. Expirations, and everything on the final date
        self.check_exits(date, &quotes, is_final)?;

        // 4. New positions
        if !is_final {
            self.screen_and_enter(data, strategy, date, &quotes)?;
        }

        // 5. Daily equity
        self.record_equity(date);
        Ok(())
    }

    fn update_positions_mtm(
        &mut self,
        date: NaiveDate,
        quotes: &BTreeMap<&str, MarketQuote>,
    ) -> Result<(), BacktestError> {
        for &id in &self.open {
            let position = &mut self.positions[id.0];
            let Some(&quote) = quotes.get(position.symbol()) else {
                continue;
            };
            // Past expiry: closed below at the spot last seen on or before it
            if position.expiration() < date {
                continue;
            }
            position
                .mark_to_market(date, quote, &self.pricing)
                .map_err(|e| lifecycle_error(id, position.symbol(), date, e))?;
        }
        Ok(())
    }

    fn check_exits(
        &mut self,
        date: NaiveDate,
        quotes: &BTreeMap<&str, MarketQuote>,
        is_final: bool,
    ) -> Result<(), BacktestError> {
        for id in self.open.clone() {
            let position = &self.positions[id.0];
            let today = quotes.get(position.symbol()).copied();

            let quote = match today {
                Some(quote) if position.is_expired(date) => quote,
                // Final date: fall back to the last mark when the symbol has
                // no data today
                _ if is_final => today.unwrap_or_else(|| position.reference_quote()),
                _ => continue,
            };

            let method = if !position.is_expired(date) {
                CloseMethod::ManualExit
            } else if position.has_assignable_leg(date, quote) {
                CloseMethod::Assignment
            } else {
                CloseMethod::Expiration
            };

            self.close_position(id, date, method, quote)?;
        }
        Ok(())
    }

    /// Close an open position and settle its cash.
    fn close_position(
        &mut self,
        id: PositionId,
        date: NaiveDate,
        method: CloseMethod,
        quote: MarketQuote,
    ) -> Result<Exit, BacktestError> {
        let position = self
            .positions
            .get_mut(id.0)
            .ok_or(BacktestError::AlreadyClosed(id))?;
        let exit = position
            .close(date, method, quote, &self.pricing, &self.commission)
            .map_err(|e| lifecycle_error(id, position.symbol(), date, e))?;

        self.cash += exit.value - exit.commission;
        self.open.retain(|open| *open != id);
        self.closed.push(id);

        debug!(
            "{} closed {} {} via {:?}: pnl ${:.2}",
            date,
            position.strategy_tag(),
            position.symbol(),
            method,
            exit.realized_pnl
        );
        Ok(exit)
    }

    /// Ask the strategy for new positions and open the accepted ones.
    fn screen_and_enter<S: Strategy + ?Sized>(
        &mut self,
        data: &MarketData,
        strategy: &S,
        date: NaiveDate,
        quotes: &BTreeMap<&str, MarketQuote>,
    ) -> Result<(), BacktestError> {
        for (&symbol, &quote) in quotes {
            if let Some(last) = self.last_checked.get(symbol) {
                if (date - *last).num_days() < i64::from(self.config.trade_frequency_days) {
                    continue;
                }
            }
            self.last_checked.insert(symbol.to_string(), date);

            let Some(history) = data.get(symbol) else {
                continue;
            };
            let window = MarketWindow {
                bars: history.window(date, self.config.lookback_days),
                volatility: quote.volatility,
                pricing: self.pricing,
            };

            let proposal = match strategy.propose(symbol, date, &window) {
                Ok(Some(proposal)) => proposal,
                Ok(None) => continue,
                Err(e) => {
                    self.diagnostics
                        .record(date, symbol, SkipReason::StrategyCallback(e.to_string()));
                    continue;
                }
            };

            if let Err(e) = proposal.validate(symbol, date) {
                self.diagnostics
                    .record(date, symbol, SkipReason::StrategyCallback(e.to_string()));
                continue;
            }

            let mut position = match Position::open(
                proposal.strategy_tag,
                proposal.legs,
                date,
                proposal.entry_spot,
                &self.commission,
            ) {
                Ok(position) => position,
                Err(e) => {
                    self.diagnostics
                        .record(date, symbol, SkipReason::StrategyCallback(e.to_string()));
                    continue;
                }
            };

            let entry_cost = position.entry_cost();
            if entry_cost < Decimal::ZERO && -entry_cost > self.cash {
                self.diagnostics.record(
                    date,
                    symbol,
                    SkipReason::InsufficientCapital {
                        required: -entry_cost,
                        available: self.cash,
                    },
                );
                continue;
            }

            let id = PositionId(self.positions.len());
            position
                .mark_to_market(date, quote, &self.pricing)
                .map_err(|e| lifecycle_error(id, symbol, date, e))?;

            self.cash += entry_cost;
            info!(
                "{} opened {} {} ({} legs): entry ${:.2}",
                date,
                position.strategy_tag(),
                symbol,
                position.legs().len(),
                entry_cost
            );
            self.positions.push(position);
            self.open.push(id);
        }
        Ok(())
    }

    fn record_equity(&mut self, date: NaiveDate) {
        let open: Vec<&Position> = self.open.iter().map(|id| &self.positions[id.0]).collect();
        let positions_value: Decimal = open.iter().map(|p| p.current_value()).sum();
        let greeks = PortfolioGreeks::from_positions(open.iter().copied());
        let equity = self.cash + positions_value;

        let prev_equity = self
            .equity_curve
            .last()
            .map(|e| e.equity)
            .unwrap_or(self.config.initial_capital);

        debug!(
            "{} equity ${:.2} (cash ${:.2}, {} open)",
            date,
            equity,
            self.cash,
            open.len()
        );

        self.equity_curve.push(EquityPoint {
            date,
            equity,
            cash: self.cash,
            positions_value,
            open_positions: open.len(),
            daily_pnl: equity - prev_equity,
            greeks: greeks.exposure,
        });
    }

    /// Build the final backtest result.
    fn build_result(&self) -> BacktestResult {
        let closed: Vec<&Position> = self.closed.iter().map(|id| &self.positions[id.0]).collect();
        let metrics = MetricsCalculator::calculate(
            &self.equity_curve,
            &closed,
            self.config.initial_capital,
            self.config.risk_free_rate,
        )
        .with_diagnostics(self.diagnostics.clone());

        BacktestResult {
            config: self.config.clone(),
            metrics,
            equity_curve: self.equity_curve.clone(),
            closed_positions: closed.into_iter().cloned().collect(),
            diagnostics: self.diagnostics.clone(),
        }
    }
}

/// Map a position failure onto the run's error type. Pricing failures are
/// invalid input; everything else is a lifecycle violation.
fn lifecycle_error(
    id: PositionId,
    symbol: &str,
    date: NaiveDate,
    error: PositionError,
) -> BacktestError {
    match error {
        PositionError::Pricing(source) => BacktestError::InvalidInput {
            symbol: symbol.to_string(),
            date,
            source,
        },
        PositionError::AlreadyClosed => BacktestError::AlreadyClosed(id),
        source => BacktestError::Position {
            id,
            symbol: symbol.to_string(),
            source,
        },
    }
}
