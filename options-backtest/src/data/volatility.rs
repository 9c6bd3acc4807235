//! Historical volatility estimation.
//!
//! Close-to-close estimator: sample standard deviation of daily log
//! returns over a trailing window, annualized with 252 trading days.

use chrono::NaiveDate;

use super::types::{DailyBar, SymbolHistory};

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Annualized volatility of the log returns between consecutive closes.
///
/// Needs at least three closes (two returns). Returns `None` if any close
/// is non-positive or non-finite.
pub fn historical_volatility(closes: &[f64]) -> Option<f64> {
    if closes.len() < 3 {
        return None;
    }
    if closes.iter().any(|c| !c.is_finite() || *c <= 0.0) {
        return None;
    }

    let returns: Vec<f64> = closes.windows(2).map(|w| (w[1] / w[0]).ln()).collect();
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);

    Some(variance.sqrt() * TRADING_DAYS_PER_YEAR.sqrt())
}

/// Rolling estimate over `window` returns for every bar that has enough
/// history behind it. The first `window` bars get no estimate.
pub fn rolling_historical_volatility(bars: &[DailyBar], window: usize) -> Vec<(NaiveDate, f64)> {
    if window < 2 || bars.len() <= window {
        return Vec::new();
    }

    (window..bars.len())
        .filter_map(|idx| {
            let closes: Vec<f64> = bars[idx - window..=idx].iter().map(|b| b.close).collect();
            historical_volatility(&closes).map(|vol| (bars[idx].date, vol))
        })
        .collect()
}

impl SymbolHistory {
    /// Build a history whose volatility series is estimated from its own
    /// closes.
    pub fn with_historical_volatility(symbol: &str, bars: Vec<DailyBar>, window: usize) -> Self {
        let sorted = SymbolHistory::new(symbol, bars, Vec::new());
        let series = rolling_historical_volatility(sorted.bars(), window);
        SymbolHistory::new(symbol, sorted.bars().to_vec(), series)
    }
}
