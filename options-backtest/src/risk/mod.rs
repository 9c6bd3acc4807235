//! Risk module.
//!
//! Provides portfolio Greeks aggregation over open positions.

pub mod portfolio_greeks;

pub use portfolio_greeks::PortfolioGreeks;
