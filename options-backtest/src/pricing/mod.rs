//! Closed-form option pricing.
//!
//! Black-Scholes with a continuous dividend yield. Every leg the engine
//! opens, marks or closes is valued through [`price`].

pub mod black_scholes;

pub use black_scholes::{
    intrinsic_value, norm_cdf, norm_pdf, price, time_to_expiry, OptionPrice, PricingContext,
    PricingError, AT_THE_MONEY_DELTA, DAYS_PER_YEAR,
};

/// Shares per option contract.
pub const CONTRACT_MULTIPLIER: i64 = 100;
