//! CSV loader for bulk-importing daily OHLCV history into the price bundle.

pub mod cleaner;

use crate::models::{DailyBar, RawCsvRow};
use anyhow::{Context, Result};
use chrono::Utc;
use csv::StringRecord;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use self::cleaner::csv_row_to_bar;

/// Extract symbol from CSV filename: `AAPL.csv`, `aapl_daily.csv` → "AAPL".
pub fn extract_symbol_from_filename(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let symbol = stem
        .split(['_', ' '])
        .next()?
        .trim()
        .to_uppercase();

    if symbol.is_empty() { None } else { Some(symbol) }
}

/// Column positions resolved from the header row.
#[derive(Debug, Clone, Copy)]
struct Columns {
    date: usize,
    close: usize,
    open: Option<usize>,
    high: Option<usize>,
    low: Option<usize>,
    volume: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &StringRecord) -> Option<Self> {
        let names: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();
        let find = |want: &[&str]| names.iter().position(|n| want.contains(&n.as_str()));

        Some(Self {
            date: find(&["date", "timestamp"])?,
            close: find(&["close", "price", "last"])?,
            open: find(&["open"]),
            high: find(&["high"]),
            low: find(&["low"]),
            volume: find(&["volume", "vol."]),
        })
    }

    fn raw_row(&self, record: &StringRecord) -> RawCsvRow {
        let get = |i: Option<usize>| i.and_then(|i| record.get(i)).map(|s| s.to_string());
        RawCsvRow {
            date: get(Some(self.date)),
            close: get(Some(self.close)),
            open: get(self.open),
            high: get(self.high),
            low: get(self.low),
            volume: get(self.volume),
        }
    }
}

/// Parse a daily bar CSV with a header row naming at least Date and Close.
pub fn load_csv(path: &Path) -> Result<(String, Vec<DailyBar>)> {
    let symbol = extract_symbol_from_filename(path)
        .with_context(|| format!("No symbol in filename {:?}", path))?;

    debug!("Loading {} from {:?}", symbol, path);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let columns = Columns::from_headers(reader.headers()?)
        .with_context(|| format!("{:?}: header needs Date and Close columns", path))?;

    let now = Utc::now().naive_utc();
    let mut bars = Vec::new();

    for (i, result) in reader.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                warn!("Row {} in {:?}: {}", i + 1, path, e);
                continue;
            }
        };

        if let Some(bar) = csv_row_to_bar(&symbol, &columns.raw_row(&record), now) {
            bars.push(bar);
        }
    }

    info!("{}: {} bars loaded", symbol, bars.len());
    Ok((symbol, bars))
}

pub fn discover_csv_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == "csv") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
