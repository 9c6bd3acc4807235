//! Black-Scholes pricing and Greeks for European options.
//!
//! All functions are pure: no state, no caches, safe to call from any
//! number of threads.
//!
//! Units:
//! - Theta: per calendar day (annual theta / 365)
//! - Vega: per 1% change in volatility
//! - Rho: per 1% change in the risk-free rate
//!
//! Degenerate inputs are handled explicitly instead of through limits of
//! the general formula (which divides by σ√T):
//! - T = 0: intrinsic value, step delta with a 0.5 tie-break at S = K
//! - σ√T ≈ 0: discounted intrinsic value on forwards

use std::f64::consts::{FRAC_1_SQRT_2, PI};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use statrs::function::erf::erfc;
use thiserror::Error;

use crate::data::{Greeks, MarketQuote, OptionKind};

/// Calendar days per year used for time-to-expiry and daily theta.
pub const DAYS_PER_YEAR: f64 = 365.0;

/// |delta| of an option exactly at the money on its expiration date.
pub const AT_THE_MONEY_DELTA: f64 = 0.5;

/// Below this σ√T the payoff is treated as deterministic.
const MIN_STD_DEV: f64 = 1e-12;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PricingError {
    #[error("Invalid input: {name} = {value}")]
    InvalidInput { name: &'static str, value: f64 },
}

/// Price and Greeks of one option (per share).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionPrice {
    pub price: f64,
    pub greeks: Greeks,
}

/// Rates shared by every option priced in a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PricingContext {
    /// Risk-free interest rate (continuously compounded).
    pub risk_free_rate: f64,
    /// Continuous dividend yield.
    pub dividend_yield: f64,
}

impl PricingContext {
    pub fn new(risk_free_rate: f64, dividend_yield: f64) -> Self {
        Self {
            risk_free_rate,
            dividend_yield,
        }
    }

    /// Price an option at the given market quote.
    pub fn price(
        &self,
        quote: MarketQuote,
        strike: f64,
        time_to_expiry: f64,
        kind: OptionKind,
    ) -> Result<OptionPrice, PricingError> {
        price(
            quote.spot,
            strike,
            time_to_expiry,
            self.risk_free_rate,
            quote.volatility,
            kind,
            self.dividend_yield,
        )
    }
}

/// Price a European option and compute its Greeks.
pub fn price(
    spot: f64,
    strike: f64,
    time_to_expiry: f64,
    risk_free_rate: f64,
    volatility: f64,
    kind: OptionKind,
    dividend_yield: f64,
) -> Result<OptionPrice, PricingError> {
    require_positive("spot", spot)?;
    require_positive("strike", strike)?;
    require_non_negative("time_to_expiry", time_to_expiry)?;
    require_finite("risk_free_rate", risk_free_rate)?;
    require_non_negative("volatility", volatility)?;
    require_non_negative("dividend_yield", dividend_yield)?;

    if time_to_expiry == 0.0 {
        return Ok(at_expiry(spot, strike, kind));
    }

    if volatility * time_to_expiry.sqrt() < MIN_STD_DEV {
        return Ok(deterministic(
            spot,
            strike,
            time_to_expiry,
            risk_free_rate,
            kind,
            dividend_yield,
        ));
    }

    Ok(closed_form(
        spot,
        strike,
        time_to_expiry,
        risk_free_rate,
        volatility,
        kind,
        dividend_yield,
    ))
}

/// Payoff if exercised immediately.
pub fn intrinsic_value(spot: f64, strike: f64, kind: OptionKind) -> f64 {
    match kind {
        OptionKind::Call => (spot - strike).max(0.0),
        OptionKind::Put => (strike - spot).max(0.0),
    }
}

/// Years between `date` and `expiration`, floored at zero.
pub fn time_to_expiry(date: NaiveDate, expiration: NaiveDate) -> f64 {
    let days = (expiration - date).num_days().max(0);
    days as f64 / DAYS_PER_YEAR
}

/// Standard normal CDF.
pub fn norm_cdf(x: f64) -> f64 {
    0.5 * erfc(-x * FRAC_1_SQRT_2)
}

/// Standard normal PDF.
pub fn norm_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * PI).sqrt()
}

fn require_finite(name: &'static str, value: f64) -> Result<(), PricingError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(PricingError::InvalidInput { name, value })
    }
}

fn require_positive(name: &'static str, value: f64) -> Result<(), PricingError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(PricingError::InvalidInput { name, value })
    }
}

fn require_non_negative(name: &'static str, value: f64) -> Result<(), PricingError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(PricingError::InvalidInput { name, value })
    }
}

fn at_expiry(spot: f64, strike: f64, kind: OptionKind) -> OptionPrice {
    let delta = match kind {
        OptionKind::Call if spot > strike => 1.0,
        OptionKind::Call if spot < strike => 0.0,
        OptionKind::Call => AT_THE_MONEY_DELTA,
        OptionKind::Put if spot < strike => -1.0,
        OptionKind::Put if spot > strike => 0.0,
        OptionKind::Put => -AT_THE_MONEY_DELTA,
    };

    OptionPrice {
        price: intrinsic_value(spot, strike, kind),
        greeks: Greeks {
            delta,
            ..Greeks::default()
        },
    }
}

/// Zero-volatility value: V = w · sign · (S·e^{-qT} − K·e^{-rT}) where w is
/// 1 in the money, 0 out of the money and 0.5 exactly at the forward.
fn deterministic(
    spot: f64,
    strike: f64,
    time: f64,
    rate: f64,
    kind: OptionKind,
    dividend: f64,
) -> OptionPrice {
    let spot_discount = (-dividend * time).exp();
    let forward_spot = spot * spot_discount;
    let pv_strike = strike * (-rate * time).exp();

    let sign = match kind {
        OptionKind::Call => 1.0,
        OptionKind::Put => -1.0,
    };
    let moneyness = sign * (forward_spot - pv_strike);
    let weight = if moneyness > 0.0 {
        1.0
    } else if moneyness < 0.0 {
        0.0
    } else {
        AT_THE_MONEY_DELTA
    };

    OptionPrice {
        price: match kind {
            OptionKind::Call => (forward_spot - pv_strike).max(0.0),
            OptionKind::Put => (pv_strike - forward_spot).max(0.0),
        },
        greeks: Greeks {
            delta: weight * sign * spot_discount,
            gamma: 0.0,
            theta: weight * sign * (dividend * forward_spot - rate * pv_strike) / DAYS_PER_YEAR,
            vega: 0.0,
            rho: weight * sign * time * pv_strike / 100.0,
        },
    }
}

fn closed_form(
    spot: f64,
    strike: f64,
    time: f64,
    rate: f64,
    vol: f64,
    kind: OptionKind,
    dividend: f64,
) -> OptionPrice {
    let sqrt_t = time.sqrt();
    let std_dev = vol * sqrt_t;
    let d1 = ((spot / strike).ln() + (rate - dividend + 0.5 * vol * vol) * time) / std_dev;
    let d2 = d1 - std_dev;

    let discount_q = (-dividend * time).exp();
    let discount_r = (-rate * time).exp();
    let pdf_d1 = norm_pdf(d1);

    let gamma = discount_q * pdf_d1 / (spot * std_dev);
    let vega = spot * discount_q * pdf_d1 * sqrt_t / 100.0;
    let decay = -spot * discount_q * pdf_d1 * vol / (2.0 * sqrt_t);

    let (price, delta, theta, rho) = match kind {
        OptionKind::Call => {
            let nd1 = norm_cdf(d1);
            let nd2 = norm_cdf(d2);
            (
                spot * discount_q * nd1 - strike * discount_r * nd2,
                discount_q * nd1,
                decay + dividend * spot * discount_q * nd1 - rate * strike * discount_r * nd2,
                strike * time * discount_r * nd2,
            )
        }
        OptionKind::Put => {
            let nd1 = norm_cdf(-d1);
            let nd2 = norm_cdf(-d2);
            (
                strike * discount_r * nd2 - spot * discount_q * nd1,
                -discount_q * nd1,
                decay - dividend * spot * discount_q * nd1 + rate * strike * discount_r * nd2,
                -strike * time * discount_r * nd2,
            )
        }
    };

    OptionPrice {
        price: price.max(0.0),
        greeks: Greeks {
            delta,
            gamma,
            theta: theta / DAYS_PER_YEAR,
            vega,
            rho: rho / 100.0,
        },
    }
}
