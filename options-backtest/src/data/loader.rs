//! Data loader for daily underlying bars.
//!
//! Reads CSV or Parquet files with one row per trading day and the
//! following columns:
//! - date (`YYYY-MM-DD` string or Date)
//! - open, high, low, close, volume
//!
//! Everything is materialized in memory before a backtest starts; the
//! simulation loop never touches the filesystem.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use polars::prelude::*;
use thiserror::Error;

use super::types::{DailyBar, SymbolHistory};

/// Expected columns in bar files.
pub const EXPECTED_COLUMNS: &[&str] = &["date", "open", "high", "low", "close", "volume"];

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// File format of a bar file, chosen by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarFormat {
    Csv,
    Parquet,
}

impl BarFormat {
    pub fn from_path(path: &Path) -> Result<Self, LoaderError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "csv" => Ok(Self::Csv),
            "parquet" | "pq" => Ok(Self::Parquet),
            _ => Err(LoaderError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// Loader for one symbol's daily bars.
pub struct BarLoader {
    path: PathBuf,
}

impl BarLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Scan the file lazily.
    pub fn load_lazy(&self) -> Result<LazyFrame, LoaderError> {
        if !self.path.exists() {
            return Err(LoaderError::FileNotFound(self.path.display().to_string()));
        }
        let mut lf = match BarFormat::from_path(&self.path)? {
            BarFormat::Csv => LazyCsvReader::new(&self.path).with_has_header(true).finish()?,
            BarFormat::Parquet => LazyFrame::scan_parquet(&self.path, ScanArgsParquet::default())?,
        };
        let schema = lf.collect_schema()?;
        if let Some(missing) = EXPECTED_COLUMNS.iter().find(|c| !schema.contains(c)) {
            return Err(LoaderError::InvalidData(format!(
                "Missing column '{}' in {}",
                missing,
                self.path.display()
            )));
        }
        Ok(lf)
    }

    /// Load the bar columns with normalized types.
    pub fn load_dataframe(&self) -> Result<DataFrame, LoaderError> {
        let df = self
            .load_lazy()?
            .select([
                col("date").cast(DataType::String),
                col("open").cast(DataType::Float64),
                col("high").cast(DataType::Float64),
                col("low").cast(DataType::Float64),
                col("close").cast(DataType::Float64),
                col("volume").cast(DataType::Int64),
            ])
            .collect()?;
        Ok(df)
    }

    /// Load bars sorted ascending by date.
    pub fn load_bars(&self) -> Result<Vec<DailyBar>, LoaderError> {
        let df = self.load_dataframe()?;
        let mut bars = dataframe_to_bars(&df)?;
        bars.sort_by_key(|b| b.date);
        Ok(bars)
    }

    /// Load bars and estimate volatility from closes over `vol_window`
    /// returns.
    pub fn load_history(
        &self,
        symbol: &str,
        vol_window: usize,
    ) -> Result<SymbolHistory, LoaderError> {
        let bars = self.load_bars()?;
        if bars.is_empty() {
            return Err(LoaderError::InvalidData(format!(
                "No bars in {}",
                self.path.display()
            )));
        }
        Ok(SymbolHistory::with_historical_volatility(symbol, bars, vol_window))
    }
}

/// Convert a normalized DataFrame to bars. Rows with a null price are
/// skipped; an unparseable date is an error.
fn dataframe_to_bars(df: &DataFrame) -> Result<Vec<DailyBar>, LoaderError> {
    let dates = df.column("date")?.str()?;
    let opens = df.column("open")?.f64()?;
    let highs = df.column("high")?.f64()?;
    let lows = df.column("low")?.f64()?;
    let closes = df.column("close")?.f64()?;
    let volumes = df.column("volume")?.i64()?;

    let mut bars = Vec::with_capacity(df.height());
    for idx in 0..df.height() {
        let (Some(date), Some(open), Some(high), Some(low), Some(close)) = (
            dates.get(idx),
            opens.get(idx),
            highs.get(idx),
            lows.get(idx),
            closes.get(idx),
        ) else {
            continue;
        };

        let date = parse_date(date)?;
        bars.push(DailyBar {
            date,
            open,
            high,
            low,
            close,
            volume: volumes.get(idx).unwrap_or(0),
        });
    }

    Ok(bars)
}

fn parse_date(value: &str) -> Result<NaiveDate, LoaderError> {
    // Datetime columns cast to strings carry a time suffix.
    let day = value.get(..10).unwrap_or(value);
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .map_err(|e| LoaderError::InvalidData(format!("Invalid date '{}': {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(BarFormat::from_path(Path::new("spy.csv")).unwrap(), BarFormat::Csv);
        assert_eq!(
            BarFormat::from_path(Path::new("spy.PARQUET")).unwrap(),
            BarFormat::Parquet
        );
        assert!(matches!(
            BarFormat::from_path(Path::new("spy.json")),
            Err(LoaderError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let loader = BarLoader::new("does/not/exist.csv");
        assert!(matches!(loader.load_bars(), Err(LoaderError::FileNotFound(_))));
    }

    #[test]
    fn test_parse_date_variants() {
        assert_eq!(
            parse_date("2024-01-05").unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()
        );
        assert_eq!(
            parse_date("2024-01-05 00:00:00").unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()
        );
        assert!(parse_date("01/05/2024").is_err());
    }

    #[test]
    fn test_load_csv() {
        let dir = std::env::temp_dir()
            .join(format!("options-backtest-loader-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bars.csv");
        std::fs::write(
            &path,
            "date,open,high,low,close,volume\n\
             2024-01-03,101,102,100,101.5,2000\n\
             2024-01-02,100,101,99,100.5,1000\n",
        )
        .unwrap();

        let bars = BarLoader::new(&path).load_bars().unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(bars[0].close, 100.5);
        assert_eq!(bars[1].volume, 2000);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_column() {
        let dir = std::env::temp_dir()
            .join(format!("options-backtest-columns-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bars.csv");
        std::fs::write(&path, "date,open,high,low,volume\n2024-01-02,100,101,99,1000\n").unwrap();

        let result = BarLoader::new(&path).load_bars();
        assert!(matches!(result, Err(LoaderError::InvalidData(ref msg)) if msg.contains("close")));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
