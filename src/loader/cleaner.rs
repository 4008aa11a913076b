use crate::models::{DailyBar, RawCsvRow};
use chrono::{NaiveDate, NaiveDateTime};
use tracing::warn;

// ── Parsers ───────────────────────────────────────────────────────────────────

/// Parse price: strip everything except digits, dot, minus.
/// "$1,234.56" → 1234.56 | "610.00" → 610.0
pub fn parse_price(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() || s == "N/A" || s == "-" || s == "—" {
        return None;
    }
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    cleaned.parse().ok()
}

/// Parse volume with K/M/B suffixes.
/// "1.2M" → 1,200,000 | "345K" → 345,000 | "12345" → 12345
pub fn parse_volume(s: &str) -> Option<i64> {
    let s = s.trim().to_uppercase().replace(',', "");

    if s.is_empty() || s == "N/A" || s == "-" || s == "—" {
        return None;
    }

    let (num_str, multiplier) = if s.ends_with('B') {
        (s.trim_end_matches('B'), 1_000_000_000.0)
    } else if s.ends_with('M') {
        (s.trim_end_matches('M'), 1_000_000.0)
    } else if s.ends_with('K') {
        (s.trim_end_matches('K'), 1_000.0)
    } else {
        // Plain number, possibly exported as "12345.0"
        let num: f64 = s.parse().ok()?;
        return Some(num as i64);
    };

    let num: f64 = num_str.trim().parse().ok()?;
    Some((num * multiplier) as i64)
}

/// Parse dates: ISO, "Feb 20, 2024", or slashed US/EU forms.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    // Some exports carry a time component: "2024-02-20 00:00:00-05:00"
    let s = s.split_whitespace().next().unwrap_or(s);

    ["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

fn parse_long_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%b %d, %Y").ok()
}

pub fn normalise_symbol(s: &str) -> String {
    s.trim().to_uppercase()
}

// ── CSV row → DailyBar ────────────────────────────────────────────────────────

pub fn csv_row_to_bar(symbol: &str, row: &RawCsvRow, now: NaiveDateTime) -> Option<DailyBar> {
    let date_str = row.date.as_deref()?.trim();
    let date = parse_long_date(date_str).or_else(|| parse_date(date_str))?;

    let close = parse_price(row.close.as_deref()?)?;

    if close <= 0.0 {
        warn!("Invalid close {} for {} on {}", close, symbol, date);
        return None;
    }

    Some(DailyBar {
        symbol: normalise_symbol(symbol),
        date,
        open: row.open.as_deref().and_then(parse_price),
        high: row.high.as_deref().and_then(parse_price),
        low: row.low.as_deref().and_then(parse_price),
        close,
        volume: row.volume.as_deref().and_then(parse_volume),
        loaded_at: now,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
