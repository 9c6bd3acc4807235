//! Performance metrics module.
//!
//! Provides performance calculations over a finished run:
//! - Win rate, profit factor, per-strategy breakdown
//! - Sharpe ratio, Sortino ratio, Calmar ratio
//! - Maximum and average drawdown
//! - Total return, CAGR

pub mod calculator;

pub use calculator::{BacktestMetrics, DrawdownAnalysis, MetricsCalculator, StrategyStats};
