//! Core data types for options backtesting.
//!
//! Market history is held fully in memory: one [`SymbolHistory`] per
//! underlying, keyed by symbol inside [`MarketData`]. Ordered maps are used
//! throughout so iteration order never depends on hashing.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::AddAssign;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Option kind (call or put).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
    Call,
    Put,
}

/// Price sensitivities of one option, or a quantity-weighted sum of them.
///
/// Theta is per calendar day; vega and rho are per one percentage point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Greeks {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    pub rho: f64,
}

impl Greeks {
    /// Multiply every sensitivity by `factor` (e.g. a signed quantity).
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            delta: self.delta * factor,
            gamma: self.gamma * factor,
            theta: self.theta * factor,
            vega: self.vega * factor,
            rho: self.rho * factor,
        }
    }
}

impl AddAssign for Greeks {
    fn add_assign(&mut self, other: Self) {
        self.delta += other.delta;
        self.gamma += other.gamma;
        self.theta += other.theta;
        self.vega += other.vega;
        self.rho += other.rho;
    }
}

/// Daily bar data for an underlying.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

/// Spot and volatility estimate for one symbol on one date.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketQuote {
    pub spot: f64,
    pub volatility: f64,
}

/// Price history and volatility estimates for one underlying.
#[derive(Debug, Clone, Default)]
pub struct SymbolHistory {
    symbol: String,
    bars: Vec<DailyBar>,
    volatility: BTreeMap<NaiveDate, f64>,
}

impl SymbolHistory {
    /// Create a history. Bars are sorted by date and de-duplicated (the
    /// last bar for a date wins).
    pub fn new(
        symbol: &str,
        mut bars: Vec<DailyBar>,
        volatility: impl IntoIterator<Item = (NaiveDate, f64)>,
    ) -> Self {
        bars.reverse();
        bars.sort_by_key(|b| b.date);
        bars.dedup_by_key(|b| b.date);
        Self {
            symbol: symbol.to_string(),
            bars,
            volatility: volatility.into_iter().collect(),
        }
    }

    /// Create a history with a constant volatility estimate on every bar.
    pub fn with_constant_volatility(symbol: &str, bars: Vec<DailyBar>, volatility: f64) -> Self {
        let series: Vec<_> = bars.iter().map(|b| (b.date, volatility)).collect();
        Self::new(symbol, bars, series)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn bars(&self) -> &[DailyBar] {
        &self.bars
    }

    /// Get the bar for a specific date.
    pub fn bar(&self, date: NaiveDate) -> Option<&DailyBar> {
        self.bars
            .binary_search_by_key(&date, |b| b.date)
            .ok()
            .map(|idx| &self.bars[idx])
    }

    pub fn volatility(&self, date: NaiveDate) -> Option<f64> {
        self.volatility.get(&date).copied()
    }

    /// Spot and volatility for a date; `None` when either is missing.
    pub fn quote(&self, date: NaiveDate) -> Option<MarketQuote> {
        let bar = self.bar(date)?;
        let volatility = self.volatility(date)?;
        Some(MarketQuote {
            spot: bar.close,
            volatility,
        })
    }

    /// Up to `len` bars ending at (and including) `date`.
    pub fn window(&self, date: NaiveDate, len: usize) -> &[DailyBar] {
        let end = self.bars.partition_point(|b| b.date <= date);
        let start = end.saturating_sub(len);
        &self.bars[start..end]
    }

    /// Dates with a bar in `[start, end)`.
    pub fn dates_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> impl Iterator<Item = NaiveDate> + '_ {
        self.bars
            .iter()
            .map(|b| b.date)
            .filter(move |d| *d >= start && *d < end)
    }
}

/// All symbols available to a backtest run.
#[derive(Debug, Clone, Default)]
pub struct MarketData {
    symbols: BTreeMap<String, SymbolHistory>,
}

impl MarketData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a symbol, replacing any previous history for it.
    pub fn insert(&mut self, history: SymbolHistory) {
        self.symbols.insert(history.symbol.clone(), history);
    }

    pub fn with(mut self, history: SymbolHistory) -> Self {
        self.insert(history);
        self
    }

    pub fn get(&self, symbol: &str) -> Option<&SymbolHistory> {
        self.symbols.get(symbol)
    }

    /// Quote for a symbol on a date.
    pub fn quote(&self, symbol: &str, date: NaiveDate) -> Option<MarketQuote> {
        self.get(symbol).and_then(|h| h.quote(date))
    }

    /// Symbols in ascending order.
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.symbols.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Union of all symbols' bar dates in `[start, end)`, ascending.
    pub fn trading_dates(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        let dates: BTreeSet<NaiveDate> = self
            .symbols
            .values()
            .flat_map(|h| h.dates_between(start, end))
            .collect();
        dates.into_iter().collect()
    }
}
