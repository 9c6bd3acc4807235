//! Parameter sweeps.
//!
//! Expands a grid of configurations and runs each one on its own engine in
//! parallel.

pub mod runner;

pub use runner::{
    best_by_sharpe, run_sweep, SweepError, SweepGrid, SweepOutcome, SweepRun, SweepSummary,
};
