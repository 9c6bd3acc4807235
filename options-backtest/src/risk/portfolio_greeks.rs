//! Portfolio Greeks aggregation.
//!
//! Sums the Greek exposure of every open position at its last mark:
//! exposure = Σ positions Σ legs (quantity × leg Greek). Values are per
//! contract, not multiplied by the 100-share contract size.

use serde::{Deserialize, Serialize};

use crate::backtest::Position;
use crate::data::Greeks;

/// Aggregated portfolio Greeks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioGreeks {
    /// Net exposure.
    pub exposure: Greeks,
    /// Number of positions included.
    pub position_count: usize,
}

impl PortfolioGreeks {
    /// Aggregate open positions. Positions that were never marked carry no
    /// exposure but are still counted.
    pub fn from_positions<'a>(positions: impl IntoIterator<Item = &'a Position>) -> Self {
        let mut greeks = Self::default();

        for position in positions {
            if !position.is_open() {
                continue;
            }
            greeks.position_count += 1;
            if let Some(mark) = position.last_mark() {
                greeks.exposure += mark.greeks;
            }
        }

        greeks
    }

    /// Mean of a series of exposures; zero for an empty series.
    pub fn mean<'a>(samples: impl IntoIterator<Item = &'a Greeks>) -> Greeks {
        let mut total = Greeks::default();
        let mut count = 0usize;
        for sample in samples {
            total += *sample;
            count += 1;
        }
        if count == 0 {
            return Greeks::default();
        }
        total.scaled(1.0 / count as f64)
    }
}
