//! Performance metrics calculator.
//!
//! A pure transform of an equity curve and the closed positions of a run
//! into summary statistics. Nothing here reads the clock or iterates a hash
//! map, so the same inputs always give bit-identical output.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::backtest::{EquityPoint, Position, RunDiagnostics, StrategyTag};
use crate::data::{Greeks, TRADING_DAYS_PER_YEAR};
use crate::risk::PortfolioGreeks;

/// Standard deviations below this are treated as zero.
const MIN_STD_DEV: f64 = 1e-12;

/// Serializes an infinite profit factor as the string `"inf"`.
pub(crate) mod profit_factor_serde {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_infinite() && value.is_sign_positive() {
            serializer.serialize_str("inf")
        } else {
            serializer.serialize_f64(*value)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(f64),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Number(value) => Ok(value),
            Repr::Text(text) if text == "inf" => Ok(f64::INFINITY),
            Repr::Text(text) => Err(D::Error::custom(format!("invalid profit factor '{}'", text))),
        }
    }
}

/// Per-strategy trade statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyStats {
    pub strategy_tag: StrategyTag,
    pub first_entry_date: NaiveDate,
    pub trades: usize,
    pub wins: usize,
    pub win_rate: f64,
    pub total_pnl: Decimal,
    pub avg_pnl: Decimal,
    #[serde(with = "profit_factor_serde")]
    pub profit_factor: f64,
}

/// Summary statistics for one backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    // Return metrics
    pub final_equity: Decimal,
    pub total_return: f64,
    pub cagr: f64,

    // Risk-adjusted returns
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,

    // Drawdown (fractions of the running peak)
    pub max_drawdown: f64,
    pub avg_drawdown: f64,

    // Trade statistics
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    #[serde(with = "profit_factor_serde")]
    pub profit_factor: f64,
    pub avg_win: Decimal,
    pub avg_loss: Decimal,
    pub total_pnl: Decimal,
    pub total_commissions: Decimal,
    pub avg_days_in_trade: f64,

    pub avg_greek_exposures: Greeks,
    pub strategy_breakdown: Vec<StrategyStats>,

    pub trading_days: usize,
    pub diagnostics: RunDiagnostics,
}

impl BacktestMetrics {
    /// Metrics of a run that simulated no days and closed no trades.
    pub fn empty(initial_capital: Decimal) -> Self {
        Self {
            final_equity: initial_capital,
            total_return: 0.0,
            cagr: 0.0,
            sharpe_ratio: 0.0,
            sortino_ratio: 0.0,
            calmar_ratio: 0.0,
            max_drawdown: 0.0,
            avg_drawdown: 0.0,
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            win_rate: 0.0,
            profit_factor: 0.0,
            avg_win: Decimal::ZERO,
            avg_loss: Decimal::ZERO,
            total_pnl: Decimal::ZERO,
            total_commissions: Decimal::ZERO,
            avg_days_in_trade: 0.0,
            avg_greek_exposures: Greeks::default(),
            strategy_breakdown: Vec::new(),
            trading_days: 0,
            diagnostics: RunDiagnostics::default(),
        }
    }

    /// Attach the run's data-quality diagnostics.
    pub fn with_diagnostics(mut self, diagnostics: RunDiagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Generate a summary report.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "Performance Summary\n\
             ====================\n\
             \n\
             Trades: {} (W: {}, L: {})\n\
             Win Rate: {:.1}%\n\
             Profit Factor: {:.2}\n\
             \n\
             Total P&L: ${:.2}\n\
             Avg Winner: ${:.2}\n\
             Avg Loser: ${:.2}\n\
             Commissions: ${:.2}\n\
             \n\
             Final Equity: ${:.2}\n\
             Total Return: {:.2}%\n\
             CAGR: {:.2}%\n\
             \n\
             Max Drawdown: {:.2}%\n\
             Avg Drawdown: {:.2}%\n\
             Sharpe Ratio: {:.2}\n\
             Sortino Ratio: {:.2}\n\
             Calmar Ratio: {:.2}\n\
             \n\
             Trading Days: {}\n\
             Avg Days in Trade: {:.1}\n\
             Avg Delta: {:.3}  Theta: {:.3}  Vega: {:.3}\n\
             Skipped: {} missing data, {} strategy errors, {} rejected",
            self.total_trades,
            self.winning_trades,
            self.losing_trades,
            self.win_rate * 100.0,
            self.profit_factor,
            self.total_pnl,
            self.avg_win,
            self.avg_loss,
            self.total_commissions,
            self.final_equity,
            self.total_return * 100.0,
            self.cagr * 100.0,
            self.max_drawdown * 100.0,
            self.avg_drawdown * 100.0,
            self.sharpe_ratio,
            self.sortino_ratio,
            self.calmar_ratio,
            self.trading_days,
            self.avg_days_in_trade,
            self.avg_greek_exposures.delta,
            self.avg_greek_exposures.theta,
            self.avg_greek_exposures.vega,
            self.diagnostics.missing_data,
            self.diagnostics.strategy_errors,
            self.diagnostics.rejected_trades,
        );

        if !self.strategy_breakdown.is_empty() {
            out.push_str("\n\nBy Strategy\n-----------");
            for stats in &self.strategy_breakdown {
                out.push_str(&format!(
                    "\n{:<18} trades {:>4}  win {:>5.1}%  pnl ${:>12.2}  pf {:.2}",
                    stats.strategy_tag.to_string(),
                    stats.trades,
                    stats.win_rate * 100.0,
                    stats.total_pnl,
                    stats.profit_factor,
                ));
            }
        }

        out
    }
}

/// Drawdown statistics over an equity curve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DrawdownAnalysis {
    /// Largest (peak − equity) / peak.
    pub max_drawdown: f64,
    pub max_drawdown_date: Option<NaiveDate>,
    /// Mean drawdown over samples below the running peak.
    pub avg_drawdown: f64,
    pub samples_in_drawdown: usize,
}

/// Metrics calculator.
pub struct MetricsCalculator;

impl MetricsCalculator {
    /// Calculate all metrics for a finished run.
    pub fn calculate(
        equity_curve: &[EquityPoint],
        closed_positions: &[&Position],
        initial_capital: Decimal,
        risk_free_rate: f64,
    ) -> BacktestMetrics {
        let mut metrics = BacktestMetrics::empty(initial_capital);
        let initial = to_f64(initial_capital);

        // Return metrics
        if let Some(last) = equity_curve.last() {
            metrics.final_equity = last.equity;
        }
        let final_equity = to_f64(metrics.final_equity);
        metrics.total_return = if initial > 0.0 {
            final_equity / initial - 1.0
        } else {
            0.0
        };
        metrics.cagr = Self::calculate_cagr(equity_curve, initial);

        // Risk-adjusted returns
        let returns = Self::daily_returns(equity_curve, initial_capital);
        metrics.sharpe_ratio = Self::calculate_sharpe(&returns, risk_free_rate);
        metrics.sortino_ratio = Self::calculate_sortino(&returns, risk_free_rate);

        let drawdown = Self::analyze_drawdown(equity_curve, initial_capital);
        metrics.max_drawdown = drawdown.max_drawdown;
        metrics.avg_drawdown = drawdown.avg_drawdown;
        metrics.calmar_ratio = if drawdown.max_drawdown > 0.0 {
            metrics.cagr / drawdown.max_drawdown
        } else {
            0.0
        };

        // Trade statistics
        let total_trades = closed_positions.len();
        let wins: Vec<Decimal> = closed_positions
            .iter()
            .map(|p| p.pnl())
            .filter(|pnl| *pnl > Decimal::ZERO)
            .collect();
        let losses: Vec<Decimal> = closed_positions
            .iter()
            .map(|p| p.pnl())
            .filter(|pnl| *pnl < Decimal::ZERO)
            .collect();
        let gross_profit: Decimal = wins.iter().sum();
        let gross_loss: Decimal = losses.iter().sum();

        metrics.total_trades = total_trades;
        metrics.winning_trades = wins.len();
        metrics.losing_trades = losses.len();
        metrics.win_rate = ratio(wins.len(), total_trades);
        metrics.profit_factor = Self::calculate_profit_factor(gross_profit, gross_loss);
        metrics.avg_win = average(gross_profit, wins.len());
        metrics.avg_loss = average(gross_loss, losses.len());
        metrics.total_pnl = closed_positions.iter().map(|p| p.pnl()).sum();
        metrics.total_commissions = closed_positions.iter().map(|p| p.commissions()).sum();
        metrics.avg_days_in_trade = if total_trades > 0 {
            closed_positions
                .iter()
                .map(|p| p.days_held().unwrap_or(0) as f64)
                .sum::<f64>()
                / total_trades as f64
        } else {
            0.0
        };

        metrics.avg_greek_exposures = PortfolioGreeks::mean(equity_curve.iter().map(|p| &p.greeks));
        metrics.strategy_breakdown = Self::strategy_breakdown(closed_positions);
        metrics.trading_days = equity_curve.len();

        metrics
    }

    /// Simple returns between consecutive equity samples. The first sample
    /// is measured against the initial capital, as the drawdown peak is.
    pub fn daily_returns(equity_curve: &[EquityPoint], initial_capital: Decimal) -> Vec<f64> {
        let mut prev = to_f64(initial_capital);
        equity_curve
            .iter()
            .map(|point| {
                let curr = to_f64(point.equity);
                let ret = if prev != 0.0 { curr / prev - 1.0 } else { 0.0 };
                prev = curr;
                ret
            })
            .collect()
    }

    /// Profit factor: gross profit / |gross loss|. With no losses it is
    /// +∞ when there was at least one win, otherwise 0.
    fn calculate_profit_factor(gross_profit: Decimal, gross_loss: Decimal) -> f64 {
        if gross_loss.is_zero() {
            return if gross_profit > Decimal::ZERO {
                f64::INFINITY
            } else {
                0.0
            };
        }
        to_f64(gross_profit) / to_f64(gross_loss.abs())
    }

    /// CAGR over the calendar span of the equity curve.
    fn calculate_cagr(equity_curve: &[EquityPoint], initial: f64) -> f64 {
        let (Some(first), Some(last)) = (equity_curve.first(), equity_curve.last()) else {
            return 0.0;
        };

        let calendar_days = (last.date - first.date).num_days();
        if calendar_days <= 0 || initial <= 0.0 {
            return 0.0;
        }

        let growth = to_f64(last.equity) / initial;
        if growth <= 0.0 {
            return 0.0;
        }

        growth.powf(365.0 / calendar_days as f64) - 1.0
    }

    /// Annualized Sharpe ratio of excess daily returns (sample stdev).
    fn calculate_sharpe(returns: &[f64], risk_free_rate: f64) -> f64 {
        if returns.len() < 2 {
            return 0.0;
        }

        let daily_rf = risk_free_rate / TRADING_DAYS_PER_YEAR;
        let excess: Vec<f64> = returns.iter().map(|r| r - daily_rf).collect();
        let n = excess.len() as f64;
        let mean = excess.iter().sum::<f64>() / n;
        let variance = excess.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
        let std_dev = variance.sqrt();

        if std_dev < MIN_STD_DEV {
            return 0.0;
        }

        mean / std_dev * TRADING_DAYS_PER_YEAR.sqrt()
    }

    /// Annualized Sortino ratio. Downside deviation is √(Σ_{r<0} r² / n)
    /// over all n daily returns; 0 when no day lost money.
    fn calculate_sortino(returns: &[f64], risk_free_rate: f64) -> f64 {
        if returns.is_empty() {
            return 0.0;
        }

        let n = returns.len() as f64;
        let daily_rf = risk_free_rate / TRADING_DAYS_PER_YEAR;
        let mean_excess = returns.iter().map(|r| r - daily_rf).sum::<f64>() / n;

        // Downside deviation (only negative returns)
        let downside_variance = returns
            .iter()
            .filter(|&&r| r < 0.0)
            .map(|r| r.powi(2))
            .sum::<f64>()
            / n;
        let downside_dev = downside_variance.sqrt();

        if downside_dev < MIN_STD_DEV {
            return 0.0;
        }

        mean_excess / downside_dev * TRADING_DAYS_PER_YEAR.sqrt()
    }

    /// Analyze drawdowns. The running peak starts at the initial capital.
    pub fn analyze_drawdown(
        equity_curve: &[EquityPoint],
        initial_capital: Decimal,
    ) -> DrawdownAnalysis {
        let mut analysis = DrawdownAnalysis::default();
        let mut peak = initial_capital;
        let mut total = 0.0;

        for point in equity_curve {
            if point.equity > peak {
                peak = point.equity;
                continue;
            }
            if peak <= Decimal::ZERO || point.equity == peak {
                continue;
            }

            let drawdown = to_f64((peak - point.equity) / peak);
            total += drawdown;
            analysis.samples_in_drawdown += 1;

            if drawdown > analysis.max_drawdown {
                analysis.max_drawdown = drawdown;
                analysis.max_drawdown_date = Some(point.date);
            }
        }

        if analysis.samples_in_drawdown > 0 {
            analysis.avg_drawdown = total / analysis.samples_in_drawdown as f64;
        }

        analysis
    }

    /// Group trades by strategy tag, ordered by each group's first entry
    /// date (ties broken by tag order).
    pub fn strategy_breakdown(closed_positions: &[&Position]) -> Vec<StrategyStats> {
        let mut groups: BTreeMap<&StrategyTag, Vec<&Position>> = BTreeMap::new();
        for &position in closed_positions {
            groups.entry(position.strategy_tag()).or_default().push(position);
        }

        let mut breakdown: Vec<StrategyStats> = groups
            .into_iter()
            .filter_map(|(tag, positions)| {
                let first_entry_date = positions.iter().map(|p| p.entry_date()).min()?;
                let trades = positions.len();
                let wins = positions.iter().filter(|p| p.is_winner()).count();
                let total_pnl: Decimal = positions.iter().map(|p| p.pnl()).sum();
                let gross_profit: Decimal = positions
                    .iter()
                    .map(|p| p.pnl())
                    .filter(|pnl| *pnl > Decimal::ZERO)
                    .sum();
                let gross_loss: Decimal = positions
                    .iter()
                    .map(|p| p.pnl())
                    .filter(|pnl| *pnl < Decimal::ZERO)
                    .sum();

                Some(StrategyStats {
                    strategy_tag: tag.clone(),
                    first_entry_date,
                    trades,
                    wins,
                    win_rate: ratio(wins, trades),
                    total_pnl,
                    avg_pnl: average(total_pnl, trades),
                    profit_factor: Self::calculate_profit_factor(gross_profit, gross_loss),
                })
            })
            .collect();

        breakdown.sort_by(|a, b| {
            a.first_entry_date
                .cmp(&b.first_entry_date)
                .then_with(|| a.strategy_tag.cmp(&b.strategy_tag))
        });
        breakdown
    }
}

fn to_f64(value: Decimal) -> f64 {
    value.try_into().unwrap_or(0.0)
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

fn average(total: Decimal, count: usize) -> Decimal {
    if count == 0 {
        Decimal::ZERO
    } else {
        total / Decimal::from(count as u64)
    }
}
