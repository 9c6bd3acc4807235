pub mod backtest;
pub mod data;
pub mod metrics;
pub mod pricing;
pub mod risk;
pub mod strategies;
pub mod sweep;

// Re-export commonly used types
pub use backtest::{
    BacktestConfig, BacktestEngine, BacktestError, BacktestResult, CommissionModel, Leg,
    MarketWindow, Position, PositionId, Proposal, Strategy, StrategyError, StrategyTag,
};
pub use data::{BarLoader, DailyBar, Greeks, MarketData, MarketQuote, OptionKind, SymbolHistory};
pub use metrics::{BacktestMetrics, MetricsCalculator};
pub use pricing::{PricingContext, PricingError, CONTRACT_MULTIPLIER};
pub use risk::PortfolioGreeks;
pub use strategies::{Template, TemplateParams, TemplateStrategy};
pub use sweep::{run_sweep, SweepError, SweepGrid, SweepRun, SweepSummary};
