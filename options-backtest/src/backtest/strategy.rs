//! Strategy capability consumed by the engine.
//!
//! A strategy is asked, per symbol and date, whether it wants to open a
//! position. It sees only a trailing window of history ending today, so it
//! cannot look ahead. Plain closures with the matching signature implement
//! [`Strategy`].

use chrono::NaiveDate;
use thiserror::Error;

use crate::data::{DailyBar, MarketQuote};
use crate::pricing::{PricingContext, PricingError};

use super::position::{Leg, StrategyTag};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StrategyError {
    #[error("Strategy failed: {0}")]
    Failed(String),

    #[error("Malformed proposal: {0}")]
    Malformed(String),

    #[error(transparent)]
    Pricing(#[from] PricingError),
}

/// What a strategy can see when asked for a proposal.
#[derive(Debug, Clone, Copy)]
pub struct MarketWindow<'a> {
    /// Trailing bars, oldest first, ending today.
    pub bars: &'a [DailyBar],
    /// Today's volatility estimate.
    pub volatility: f64,
    pub pricing: PricingContext,
}

impl<'a> MarketWindow<'a> {
    pub fn last_close(&self) -> Option<f64> {
        self.bars.last().map(|b| b.close)
    }

    /// Today's spot and volatility.
    pub fn quote(&self) -> Option<MarketQuote> {
        self.last_close().map(|spot| MarketQuote {
            spot,
            volatility: self.volatility,
        })
    }
}

/// A position the strategy wants opened today.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub strategy_tag: StrategyTag,
    pub legs: Vec<Leg>,
    pub entry_spot: f64,
}

impl Proposal {
    pub fn new(strategy_tag: StrategyTag, legs: Vec<Leg>, entry_spot: f64) -> Self {
        Self {
            strategy_tag,
            legs,
            entry_spot,
        }
    }

    /// Check that the proposal belongs to the request it answers.
    pub fn validate(&self, symbol: &str, date: NaiveDate) -> Result<(), StrategyError> {
        if self.legs.is_empty() {
            return Err(StrategyError::Malformed("no legs".to_string()));
        }
        if let Some(leg) = self.legs.iter().find(|l| l.symbol != symbol) {
            return Err(StrategyError::Malformed(format!(
                "leg on {} proposed for {}",
                leg.symbol, symbol
            )));
        }
        if let Some(leg) = self.legs.iter().find(|l| l.entry_date != date) {
            return Err(StrategyError::Malformed(format!(
                "leg dated {} proposed on {}",
                leg.entry_date, date
            )));
        }
        if let Some(leg) = self.legs.iter().find(|l| l.expiration <= date) {
            return Err(StrategyError::Malformed(format!(
                "leg expiring {} proposed on {}",
                leg.expiration, date
            )));
        }
        if !(self.entry_spot.is_finite() && self.entry_spot > 0.0) {
            return Err(StrategyError::Malformed(format!(
                "entry spot {}",
                self.entry_spot
            )));
        }
        Ok(())
    }
}

/// Source of trade proposals.
pub trait Strategy {
    /// Return `Ok(None)` to pass on this opportunity.
    fn propose(
        &self,
        symbol: &str,
        date: NaiveDate,
        window: &MarketWindow<'_>,
    ) -> Result<Option<Proposal>, StrategyError>;
}

impl<F> Strategy for F
where
    F: Fn(&str, NaiveDate, &MarketWindow<'_>) -> Result<Option<Proposal>, StrategyError>,
{
    fn propose(
        &self,
        symbol: &str,
        date: NaiveDate,
        window: &MarketWindow<'_>,
    ) -> Result<Option<Proposal>, StrategyError> {
        self(symbol, date, window)
    }
}
