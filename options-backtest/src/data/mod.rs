pub mod loader;
pub mod types;
pub mod volatility;

pub use loader::{BarFormat, BarLoader, LoaderError};
pub use types::{DailyBar, Greeks, MarketData, MarketQuote, OptionKind, SymbolHistory};
pub use volatility::{historical_volatility, rolling_historical_volatility, TRADING_DAYS_PER_YEAR};
