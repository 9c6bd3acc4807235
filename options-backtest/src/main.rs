//! Options Backtest CLI
//!
//! # Usage
//!
//! ```bash
//! # Run a single backtest
//! options-backtest run --config config/default.toml --data data/SPY.csv
//!
//! # Swap the configured template for another one
//! options-backtest run --config config/default.toml --data data/SPY.csv --template straddle
//!
//! # Sweep the configured grid in parallel
//! options-backtest sweep --config config/default.toml --data data/SPY.parquet \
//!     --output results/sweep.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing::info;

use options_backtest::backtest::{BacktestConfig, BacktestEngine};
use options_backtest::data::{BarLoader, MarketData};
use options_backtest::strategies::{Template, TemplateStrategy};
use options_backtest::sweep::{best_by_sharpe, run_sweep, SweepGrid, SweepSummary};

#[derive(Parser)]
#[command(name = "options-backtest")]
#[command(about = "Deterministic backtesting engine for multi-leg options strategies")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single backtest with given configuration
    Run {
        #[command(flatten)]
        inputs: Inputs,

        /// Write the full result as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run every configuration of the sweep grid in parallel
    Sweep {
        #[command(flatten)]
        inputs: Inputs,

        /// Write per-run summaries as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(clap::Args)]
struct Inputs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/default.toml")]
    config: PathBuf,

    /// Daily bar files (CSV or Parquet); the file stem is the symbol
    #[arg(short, long, required = true, num_args = 1..)]
    data: Vec<PathBuf>,

    /// Trailing window for historical volatility
    #[arg(long, default_value_t = 20)]
    vol_window: usize,

    /// Override the configured template with its default parameters
    #[arg(short, long, value_enum)]
    template: Option<TemplateKind>,
}

#[derive(Clone, Copy, ValueEnum)]
enum TemplateKind {
    CoveredCall,
    CashSecuredPut,
    CreditSpread,
    IronCondor,
    Straddle,
}

impl TemplateKind {
    fn template(self) -> Template {
        match self {
            Self::CoveredCall => Template::CoveredCall { otm_pct: 0.05 },
            Self::CashSecuredPut => Template::CashSecuredPut { otm_pct: 0.05 },
            Self::CreditSpread => Template::CreditSpread {
                short_delta: 0.30,
                long_delta: 0.15,
            },
            Self::IronCondor => Template::IronCondor {
                short_delta: 0.16,
                wing_delta: 0.05,
            },
            Self::Straddle => Template::Straddle,
        }
    }
}

/// Contents of the TOML configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileConfig {
    backtest: BacktestConfig,
    strategy: TemplateStrategy,
    #[serde(default)]
    sweep: SweepGrid,
}

impl FileConfig {
    fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))
    }
}

fn load_market(paths: &[PathBuf], vol_window: usize) -> Result<MarketData> {
    let mut market = MarketData::new();
    for path in paths {
        let symbol = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_uppercase)
            .with_context(|| format!("Cannot derive a symbol from {}", path.display()))?;
        if market.get(&symbol).is_some() {
            bail!("Symbol {} given twice", symbol);
        }
        let history = BarLoader::new(path)
            .load_history(&symbol, vol_window)
            .with_context(|| format!("Failed to load bars for {}", symbol))?;
        info!("Loaded {} bars for {}", history.bars().len(), symbol);
        market.insert(history);
    }
    Ok(market)
}

fn prepare(inputs: &Inputs) -> Result<(FileConfig, MarketData)> {
    let mut file = FileConfig::load(&inputs.config)?;
    if let Some(kind) = inputs.template {
        file.strategy.template = kind.template();
    }
    let market = load_market(&inputs.data, inputs.vol_window)?;
    Ok((file, market))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Wrote {}", path.display());
    Ok(())
}

fn cmd_run(inputs: Inputs, output: Option<PathBuf>) -> Result<()> {
    let (file, market) = prepare(&inputs)?;
    let mut engine = BacktestEngine::new(file.backtest).context("Invalid backtest config")?;
    let result = engine
        .run(&market, &file.strategy)
        .context("Backtest aborted")?;

    println!("{}", result.summary());

    if let Some(path) = output {
        write_json(&path, &result)?;
    }
    Ok(())
}

#[derive(Serialize)]
struct SweepReport<'a> {
    label: &'a str,
    #[serde(flatten)]
    summary: &'a SweepSummary,
}

fn cmd_sweep(inputs: Inputs, output: Option<PathBuf>) -> Result<()> {
    let (file, market) = prepare(&inputs)?;
    let runs = file.sweep.combinations(&file.backtest);
    let outcomes = run_sweep(&runs, &market, &file.strategy).context("Sweep aborted")?;

    println!(
        "{:<40} {:>8} {:>10} {:>8} {:>8} {:>14}",
        "Run", "Trades", "Return", "Sharpe", "MaxDD", "Final Equity"
    );
    for outcome in &outcomes {
        let s = &outcome.summary;
        println!(
            "{:<40} {:>8} {:>9.2}% {:>8.2} {:>7.2}% {:>14.2}",
            outcome.label,
            s.total_trades,
            s.total_return * 100.0,
            s.sharpe_ratio,
            s.max_drawdown * 100.0,
            s.final_equity
        );
    }
    if let Some(best) = best_by_sharpe(&outcomes) {
        println!("\nBest by Sharpe: {}", best.label);
    }

    if let Some(path) = output {
        let reports: Vec<_> = outcomes
            .iter()
            .map(|o| SweepReport {
                label: &o.label,
                summary: &o.summary,
            })
            .collect();
        write_json(&path, &reports)?;
    }
    Ok(())
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("options_backtest=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { inputs, output } => cmd_run(inputs, output),
        Commands::Sweep { inputs, output } => cmd_sweep(inputs, output),
    }
}
