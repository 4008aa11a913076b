use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── Price bundle ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyBar {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: f64,
    pub volume: Option<i64>,
    pub loaded_at: NaiveDateTime,
}

/// Daily OHLCV CSV: Date, Close, Open, High, Low, Volume
#[derive(Debug, Clone, Default)]
pub struct RawCsvRow {
    pub date: Option<String>,
    pub close: Option<String>,
    pub open: Option<String>,
    pub high: Option<String>,
    pub low: Option<String>,
    pub volume: Option<String>,
}

// ── Market data ───────────────────────────────────────────────────────────────

/// One daily close.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: f64,
}

/// Quarterly statement line items, keyed by period end date.
///
/// `None` means the provider did not report the line item at all, which is
/// distinct from an empty series.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuarterlyFinancials {
    pub net_income: Option<BTreeMap<NaiveDate, f64>>,
    pub shares_issued: Option<BTreeMap<NaiveDate, f64>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct KeyStats {
    pub trailing_eps: Option<f64>,
    pub forward_eps: Option<f64>,
    pub trailing_pe: Option<f64>,
    pub forward_pe: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EpsRange {
    pub low: Option<f64>,
    pub high: Option<f64>,
    pub avg: Option<f64>,
}

/// Analyst EPS estimates for the current/next quarter and year.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AnalystEstimates {
    pub current_quarter: EpsRange,
    pub next_quarter: EpsRange,
    pub current_year: EpsRange,
    pub next_year: EpsRange,
}

impl AnalystEstimates {
    /// Slot for a provider period label ("0q", "+1q", "0y", "+1y").
    pub fn slot_mut(&mut self, period: &str) -> Option<&mut EpsRange> {
        match period {
            "0q" => Some(&mut self.current_quarter),
            "+1q" => Some(&mut self.next_quarter),
            "0y" => Some(&mut self.current_year),
            "+1y" => Some(&mut self.next_year),
            _ => None,
        }
    }
}

// ── Store rows ────────────────────────────────────────────────────────────────

/// One row of `stock_financial_data`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValuationSnapshot {
    pub ticker: String,
    pub date: NaiveDate,
    pub stats: KeyStats,
    pub pe_range_low_5y: Option<f64>,
    pub pe_range_high_5y: Option<f64>,
    pub analyst: AnalystEstimates,
    pub forward_pe_perc_25: Option<f64>,
    pub forward_pe_perc_75: Option<f64>,
    pub estimated_forward_price_low: Option<f64>,
    pub estimated_forward_price_high: Option<f64>,
    pub peg_ratio: Option<f64>,
}

/// One row of `stock_forward_pe_history`.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardPePoint {
    pub ticker: String,
    pub date: NaiveDate,
    pub forward_pe: f64,
}

/// Latest stored valuation bounds for a ticker.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardPriceEstimate {
    pub ticker: String,
    pub estimated_forward_price_low: f64,
    pub estimated_forward_price_high: f64,
    pub latest_date: NaiveDate,
}

/// Latest stored fields used by the extended report.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtendedEstimate {
    pub base: ForwardPriceEstimate,
    pub forward_eps: Option<f64>,
    pub trailing_eps: Option<f64>,
    pub forward_pe: Option<f64>,
    pub forward_pe_perc_25: Option<f64>,
    pub forward_pe_perc_75: Option<f64>,
    pub analyst_eps_avg_next_year: Option<f64>,
    pub peg_ratio: Option<f64>,
}
