//! Parallel runner for independent backtests.
//!
//! Every run gets its own engine; market data and the strategy are shared
//! read-only across rayon workers.

use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::backtest::{BacktestConfig, BacktestEngine, BacktestError, BacktestResult, Strategy};
use crate::data::MarketData;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("sweep has no runs")]
    EmptyGrid,

    #[error("run {label} failed: {source}")]
    Run {
        label: String,
        #[source]
        source: BacktestError,
    },
}

/// Values to try per configuration field. An empty list keeps the base value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepGrid {
    pub commission_per_contract: Vec<Decimal>,
    pub trade_frequency_days: Vec<u32>,
    pub lookback_days: Vec<usize>,
    pub risk_free_rate: Vec<f64>,
}

impl SweepGrid {
    /// Calculate total number of runs the grid expands to.
    pub fn total_combinations(&self) -> usize {
        self.commission_per_contract.len().max(1)
            * self.trade_frequency_days.len().max(1)
            * self.lookback_days.len().max(1)
            * self.risk_free_rate.len().max(1)
    }

    /// Expand the grid around `base`, one run per combination.
    pub fn combinations(&self, base: &BacktestConfig) -> Vec<SweepRun> {
        let commissions = or_base(&self.commission_per_contract, base.commission_per_contract);
        let frequencies = or_base(&self.trade_frequency_days, base.trade_frequency_days);
        let lookbacks = or_base(&self.lookback_days, base.lookback_days);
        let rates = or_base(&self.risk_free_rate, base.risk_free_rate);

        let mut runs = Vec::with_capacity(self.total_combinations());
        for &commission in &commissions {
            for &frequency in &frequencies {
                for &lookback in &lookbacks {
                    for &rate in &rates {
                        let mut config = base.clone();
                        config.commission_per_contract = commission;
                        config.trade_frequency_days = frequency;
                        config.lookback_days = lookback;
                        config.risk_free_rate = rate;
                        runs.push(SweepRun::new(
                            format!(
                                "comm{}_freq{}_lb{}_rf{:.4}",
                                commission, frequency, lookback, rate
                            ),
                            config,
                        ));
                    }
                }
            }
        }
        runs
    }
}

fn or_base<T: Copy>(values: &[T], base: T) -> Vec<T> {
    if values.is_empty() {
        vec![base]
    } else {
        values.to_vec()
    }
}

/// One labelled configuration of a sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepRun {
    pub label: String,
    pub config: BacktestConfig,
}

impl SweepRun {
    pub fn new(label: impl Into<String>, config: BacktestConfig) -> Self {
        Self {
            label: label.into(),
            config,
        }
    }
}

/// Headline numbers of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepSummary {
    pub total_return: f64,
    pub win_rate: f64,
    #[serde(with = "crate::metrics::calculator::profit_factor_serde")]
    pub profit_factor: f64,
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
    pub total_trades: usize,
    pub final_equity: Decimal,
}

impl From<&BacktestResult> for SweepSummary {
    fn from(result: &BacktestResult) -> Self {
        let metrics = result.metrics();
        Self {
            total_return: metrics.total_return,
            win_rate: metrics.win_rate,
            profit_factor: metrics.profit_factor,
            max_drawdown: metrics.max_drawdown,
            sharpe_ratio: metrics.sharpe_ratio,
            total_trades: metrics.total_trades,
            final_equity: result.final_equity(),
        }
    }
}

/// A finished run.
#[derive(Debug, Clone)]
pub struct SweepOutcome {
    pub label: String,
    pub summary: SweepSummary,
    pub result: BacktestResult,
}

/// Run every configuration in parallel. Outcomes come back in input order.
///
/// The first failing run aborts the sweep.
pub fn run_sweep<S>(
    runs: &[SweepRun],
    data: &MarketData,
    strategy: &S,
) -> Result<Vec<SweepOutcome>, SweepError>
where
    S: Strategy + Sync + ?Sized,
{
    if runs.is_empty() {
        return Err(SweepError::EmptyGrid);
    }

    let total = runs.len();
    let progress = AtomicUsize::new(0);
    info!("Sweeping {} configurations over {} symbols", total, data.len());

    let outcomes = runs
        .par_iter()
        .map(|run| {
            let failed = |source| SweepError::Run {
                label: run.label.clone(),
                source,
            };
            let mut engine = BacktestEngine::new(run.config.clone()).map_err(failed)?;
            let result = engine.run(data, strategy).map_err(failed)?;

            let done = progress.fetch_add(1, Ordering::Relaxed) + 1;
            if done % (total / 10).max(1) == 0 || done == total {
                info!(
                    "  {:.0}% ({}/{} runs)",
                    done as f64 / total as f64 * 100.0,
                    done,
                    total
                );
            }

            Ok(SweepOutcome {
                label: run.label.clone(),
                summary: SweepSummary::from(&result),
                result,
            })
        })
        .collect::<Result<Vec<_>, SweepError>>()?;

    Ok(outcomes)
}

/// Highest Sharpe ratio among outcomes that traded at least once.
pub fn best_by_sharpe(outcomes: &[SweepOutcome]) -> Option<&SweepOutcome> {
    outcomes
        .iter()
        .filter(|o| o.summary.total_trades > 0)
        .max_by(|a, b| {
            a.summary
                .sharpe_ratio
                .partial_cmp(&b.summary.sharpe_ratio)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::{to_premium, Leg, MarketWindow, Proposal, StrategyError, StrategyTag};
    use crate::data::{DailyBar, OptionKind, SymbolHistory};
    use crate::pricing::time_to_expiry;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn day(n: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(n)
    }

    fn market(symbol: &str, days: usize, spot: f64) -> MarketData {
        let bars = (0..days)
            .map(|i| DailyBar {
                date: day(i as i64),
                open: spot,
                high: spot,
                low: spot,
                close: spot,
                volume: 1_000,
            })
            .collect();
        MarketData::new().with(SymbolHistory::with_constant_volatility(symbol, bars, 0.2))
    }

    fn base() -> BacktestConfig {
        BacktestConfig::new(day(0), day(40), dec!(100000))
    }

    fn short_put(
        symbol: &str,
        date: NaiveDate,
        window: &MarketWindow<'_>,
    ) -> Result<Option<Proposal>, StrategyError> {
        let quote = window
            .quote()
            .ok_or_else(|| StrategyError::Failed("empty window".into()))?;
        let strike = quote.spot - 5.0;
        let expiration = date + chrono::Duration::days(10);
        let priced = window.pricing.price(
            quote,
            strike,
            time_to_expiry(date, expiration),
            OptionKind::Put,
        )?;
        let leg = Leg::new(
            symbol,
            OptionKind::Put,
            strike,
            expiration,
            -1,
            to_premium(priced.price),
            quote.volatility,
            date,
        );
        Ok(Some(Proposal::new(
            StrategyTag::CashSecuredPut,
            vec![leg],
            quote.spot,
        )))
    }

    #[test]
    fn test_grid_combinations() {
        let grid = SweepGrid {
            commission_per_contract: vec![dec!(0.5), dec!(1)],
            trade_frequency_days: vec![5, 10, 20],
            ..Default::default()
        };
        let runs = grid.combinations(&base());

        assert_eq!(grid.total_combinations(), 6);
        assert_eq!(runs.len(), 6);
        assert_eq!(runs[0].config.commission_per_contract, dec!(0.5));
        assert_eq!(runs[0].config.trade_frequency_days, 5);
        assert_eq!(runs[5].config.commission_per_contract, dec!(1));
        assert_eq!(runs[5].config.trade_frequency_days, 20);
        // Untouched dimensions keep the base value
        assert!(runs.iter().all(|r| r.config.lookback_days == 30));
        assert!(runs[0].label.contains("freq5"));
    }

    #[test]
    fn test_empty_grid_is_base() {
        let runs = SweepGrid::default().combinations(&base());
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].config, base());
    }

    #[test]
    fn test_empty_sweep_rejected() {
        let data = market("SPY", 40, 100.0);
        let result = run_sweep(&[], &data, &short_put);
        assert!(matches!(result, Err(SweepError::EmptyGrid)));
    }

    #[test]
    fn test_sweep_matches_sequential_runs_in_order() {
        let data = market("SPY", 40, 100.0);
        let grid = SweepGrid {
            trade_frequency_days: vec![1, 7, 15, 30],
            ..Default::default()
        };
        let runs = grid.combinations(&base());
        let outcomes = run_sweep(&runs, &data, &short_put).unwrap();

        assert_eq!(outcomes.len(), runs.len());
        for (run, outcome) in runs.iter().zip(&outcomes) {
            assert_eq!(run.label, outcome.label);
            let mut engine = BacktestEngine::new(run.config.clone()).unwrap();
            let sequential = engine.run(&data, &short_put).unwrap();
            assert_eq!(sequential.final_equity(), outcome.summary.final_equity);
            assert_eq!(sequential.metrics(), outcome.result.metrics());
        }

        // Checking less often opens fewer positions
        assert!(outcomes[0].summary.total_trades > outcomes[3].summary.total_trades);
    }

    #[test]
    fn test_failed_run_is_labelled() {
        let data = market("SPY", 40, 100.0);
        let mut bad = base();
        bad.trade_frequency_days = 0;
        let runs = vec![SweepRun::new("ok", base()), SweepRun::new("bad", bad)];

        match run_sweep(&runs, &data, &short_put) {
            Err(SweepError::Run { label, source }) => {
                assert_eq!(label, "bad");
                assert!(matches!(source, BacktestError::InvalidConfig(_)));
            }
            other => panic!("expected run failure, got {:?}", other.map(|o| o.len())),
        }
    }

    #[test]
    fn test_best_by_sharpe_ignores_idle_runs() {
        let data = market("SPY", 40, 100.0);
        let mut idle = base();
        idle.end_date = idle.start_date;
        let runs = vec![SweepRun::new("idle", idle), SweepRun::new("active", base())];
        let outcomes = run_sweep(&runs, &data, &short_put).unwrap();

        let best = best_by_sharpe(&outcomes).unwrap();
        assert_eq!(best.label, "active");
    }
}
