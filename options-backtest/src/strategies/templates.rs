//! Position templates.
//!
//! Builds the legs of common option structures from a spot price and a
//! volatility estimate, pricing every leg through the Black-Scholes model:
//! - Covered call: short OTM call (share leg not modeled)
//! - Cash-secured put: short OTM put
//! - Credit spread: put vertical selected by delta
//! - Iron condor: short strangle at one delta, long wings at another
//! - Straddle: long ATM call and put

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::backtest::{
    to_premium, Leg, MarketWindow, Proposal, Strategy, StrategyError, StrategyTag,
};
use crate::data::{MarketQuote, OptionKind};
use crate::pricing::{time_to_expiry, PricingContext, PricingError};

const BISECTION_ITERATIONS: usize = 200;

/// Price one leg at entry. The premium is the model price rounded to four
/// decimal places; the Greeks snapshot is seeded from the same pricing.
#[allow(clippy::too_many_arguments)]
pub fn price_leg(
    symbol: &str,
    kind: OptionKind,
    strike: f64,
    expiration: NaiveDate,
    quantity: i32,
    entry_date: NaiveDate,
    quote: MarketQuote,
    pricing: &PricingContext,
) -> Result<Leg, PricingError> {
    let t = time_to_expiry(entry_date, expiration);
    let priced = pricing.price(quote, strike, t, kind)?;
    Ok(Leg::new(
        symbol,
        kind,
        strike,
        expiration,
        quantity,
        to_premium(priced.price),
        quote.volatility,
        entry_date,
    )
    .with_greeks(priced.greeks))
}

/// Strike whose |delta| equals `target_delta`, found by bisection.
///
/// Call |delta| falls as the strike rises; put |delta| rises with it.
pub fn strike_for_delta(
    kind: OptionKind,
    target_delta: f64,
    time_to_expiry: f64,
    quote: MarketQuote,
    pricing: &PricingContext,
) -> Result<f64, PricingError> {
    if !(target_delta > 0.0 && target_delta < 1.0) {
        return Err(PricingError::InvalidInput {
            name: "target_delta",
            value: target_delta,
        });
    }

    let mut lo = quote.spot * 1e-3;
    let mut hi = quote.spot * 10.0;
    for _ in 0..BISECTION_ITERATIONS {
        let mid = 0.5 * (lo + hi);
        let delta = pricing.price(quote, mid, time_to_expiry, kind)?.greeks.delta.abs();
        let strike_too_low = match kind {
            OptionKind::Call => delta > target_delta,
            OptionKind::Put => delta < target_delta,
        };
        if strike_too_low {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo < 1e-9 {
            break;
        }
    }

    Ok(0.5 * (lo + hi))
}

/// Round to the nearest multiple of `step`; a non-positive step leaves the
/// strike unchanged.
pub fn round_strike(strike: f64, step: f64) -> f64 {
    if step > 0.0 {
        (strike / step).round() * step
    } else {
        strike
    }
}

/// Structure to open.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Template {
    /// Short call at spot × (1 + otm_pct).
    CoveredCall { otm_pct: f64 },
    /// Short put at spot × (1 − otm_pct).
    CashSecuredPut { otm_pct: f64 },
    /// Put vertical: short at `short_delta`, long at `long_delta`.
    CreditSpread { short_delta: f64, long_delta: f64 },
    /// Short put and call at `short_delta`, long wings at `wing_delta`.
    IronCondor { short_delta: f64, wing_delta: f64 },
    /// Long call and put at the money.
    Straddle,
}

/// Contract sizing and expiry shared by every template.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemplateParams {
    /// Calendar days to expiration.
    #[serde(default = "default_dte")]
    pub dte: u32,
    /// Strike grid spacing.
    #[serde(default = "default_strike_step")]
    pub strike_step: f64,
    /// Contracts per leg.
    #[serde(default = "default_contracts")]
    pub contracts: i32,
}

fn default_dte() -> u32 {
    35
}

fn default_strike_step() -> f64 {
    1.0
}

fn default_contracts() -> i32 {
    1
}

impl Default for TemplateParams {
    fn default() -> Self {
        Self {
            dte: default_dte(),
            strike_step: default_strike_step(),
            contracts: default_contracts(),
        }
    }
}

impl Template {
    pub fn strategy_tag(&self) -> StrategyTag {
        match self {
            Self::CoveredCall { .. } => StrategyTag::CoveredCall,
            Self::CashSecuredPut { .. } => StrategyTag::CashSecuredPut,
            Self::CreditSpread { .. } => StrategyTag::CreditSpread,
            Self::IronCondor { .. } => StrategyTag::IronCondor,
            Self::Straddle => StrategyTag::Straddle,
        }
    }

    fn check(&self, params: &TemplateParams) -> Result<(), StrategyError> {
        if params.dte == 0 {
            return Err(StrategyError::Malformed("dte must be at least 1".to_string()));
        }
        if params.contracts <= 0 {
            return Err(StrategyError::Malformed(format!(
                "contracts must be positive, got {}",
                params.contracts
            )));
        }
        match *self {
            Self::CoveredCall { otm_pct } | Self::CashSecuredPut { otm_pct }
                if !(0.0..1.0).contains(&otm_pct) =>
            {
                Err(StrategyError::Malformed(format!("otm_pct {} outside [0, 1)", otm_pct)))
            }
            Self::CreditSpread {
                short_delta,
                long_delta: far,
            }
            | Self::IronCondor {
                short_delta,
                wing_delta: far,
            } if !(far < short_delta) => Err(StrategyError::Malformed(format!(
                "wing delta {} must be below short delta {}",
                far, short_delta
            ))),
            _ => Ok(()),
        }
    }

    /// Build the legs for `symbol` on `date` at `quote`.
    pub fn build(
        &self,
        symbol: &str,
        date: NaiveDate,
        quote: MarketQuote,
        pricing: &PricingContext,
        params: &TemplateParams,
    ) -> Result<Proposal, StrategyError> {
        self.check(params)?;

        let spot = quote.spot;
        let expiration = date + Duration::days(i64::from(params.dte));
        let t = time_to_expiry(date, expiration);
        let n = params.contracts;
        let step = params.strike_step;
        let leg = |kind: OptionKind, strike: f64, quantity: i32| {
            price_leg(symbol, kind, strike, expiration, quantity, date, quote, pricing)
        };
        let by_delta = |kind: OptionKind, delta: f64| -> Result<f64, PricingError> {
            Ok(round_strike(strike_for_delta(kind, delta, t, quote, pricing)?, step))
        };

        let legs = match *self {
            Self::CoveredCall { otm_pct } => {
                let strike = round_strike(spot * (1.0 + otm_pct), step);
                vec![leg(OptionKind::Call, strike, -n)?]
            }
            Self::CashSecuredPut { otm_pct } => {
                let strike = round_strike(spot * (1.0 - otm_pct), step);
                vec![leg(OptionKind::Put, strike, -n)?]
            }
            Self::CreditSpread {
                short_delta,
                long_delta,
            } => {
                let short = by_delta(OptionKind::Put, short_delta)?;
                let long = wing_strike(short, by_delta(OptionKind::Put, long_delta)?, -step);
                vec![leg(OptionKind::Put, short, -n)?, leg(OptionKind::Put, long, n)?]
            }
            Self::IronCondor {
                short_delta,
                wing_delta,
            } => {
                let short_put = by_delta(OptionKind::Put, short_delta)?;
                let long_put =
                    wing_strike(short_put, by_delta(OptionKind::Put, wing_delta)?, -step);
                let short_call = by_delta(OptionKind::Call, short_delta)?;
                let long_call =
                    wing_strike(short_call, by_delta(OptionKind::Call, wing_delta)?, step);
                vec![
                    leg(OptionKind::Put, long_put, n)?,
                    leg(OptionKind::Put, short_put, -n)?,
                    leg(OptionKind::Call, short_call, -n)?,
                    leg(OptionKind::Call, long_call, n)?,
                ]
            }
            Self::Straddle => {
                let strike = round_strike(spot, step);
                vec![leg(OptionKind::Call, strike, n)?, leg(OptionKind::Put, strike, n)?]
            }
        };

        if legs.iter().any(|l| l.strike <= 0.0) {
            return Err(StrategyError::Malformed("non-positive strike".to_string()));
        }

        Ok(Proposal::new(self.strategy_tag(), legs, spot))
    }
}

/// Keep a wing strictly beyond its short strike after rounding.
fn wing_strike(short: f64, wing: f64, step: f64) -> f64 {
    let beyond = if step < 0.0 { wing < short } else { wing > short };
    if beyond || step == 0.0 {
        wing
    } else {
        short + step
    }
}

/// Opens its template whenever the engine asks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemplateStrategy {
    pub template: Template,
    #[serde(default)]
    pub params: TemplateParams,
}

impl TemplateStrategy {
    pub fn new(template: Template, params: TemplateParams) -> Self {
        Self { template, params }
    }
}

impl Strategy for TemplateStrategy {
    fn propose(
        &self,
        symbol: &str,
        date: NaiveDate,
        window: &MarketWindow<'_>,
    ) -> Result<Option<Proposal>, StrategyError> {
        let quote = window
            .quote()
            .ok_or_else(|| StrategyError::Failed(format!("no bars for {} on {}", symbol, date)))?;
        self.template
            .build(symbol, date, quote, &window.pricing, &self.params)
            .map(Some)
    }
}
