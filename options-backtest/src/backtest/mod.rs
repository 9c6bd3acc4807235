//! Backtesting engine for multi-leg options strategies.
//!
//! This module provides the simulation core:
//! - Position lifecycle (open, mark-to-market, close) and P&L accounting
//! - Commission tracking
//! - The strategy capability the engine consults for new positions
//! - The day-by-day engine and its result

pub mod commission;
pub mod engine;
pub mod position;
pub mod strategy;

pub use commission::{Commission, CommissionModel};
pub use engine::{
    BacktestConfig, BacktestEngine, BacktestError, BacktestResult, EquityPoint, PositionId,
    RunDiagnostics, Skip, SkipReason,
};
pub use position::{
    to_premium, CloseMethod, Exit, Leg, Mark, Position, PositionError, PositionStatus, StrategyTag,
};
pub use strategy::{MarketWindow, Proposal, Strategy, StrategyError};
