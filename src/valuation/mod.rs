//! Valuation arithmetic: P/E ranges, forward P/E percentiles, price bands,
//! quote classification and PEG.

pub mod classify;
pub mod growth;
pub mod pe_range;

pub use self::classify::{Position, classify};
pub use self::growth::{eps_growth, peg_ratio};
pub use self::pe_range::historical_pe_range;

/// Forward P/E history needs at least this many points for percentiles.
pub const MIN_PERCENTILE_POINTS: usize = 4;

/// Percentile with linear interpolation between closest ranks.
/// `q` is in `[0, 100]`. Returns `None` for an empty slice.
pub fn percentile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let rank = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;

    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
}

/// 25th and 75th percentile of historical forward P/E.
pub fn forward_pe_band(history: &[f64]) -> Option<(f64, f64)> {
    let finite: Vec<f64> = history.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.len() < MIN_PERCENTILE_POINTS {
        return None;
    }
    Some((percentile(&finite, 25.0)?, percentile(&finite, 75.0)?))
}

/// EPS × P/E, only when both are known and EPS is non-zero.
pub fn estimated_price(eps: Option<f64>, pe: Option<f64>) -> Option<f64> {
    match (eps, pe) {
        (Some(eps), Some(pe)) if eps != 0.0 => Some(eps * pe),
        _ => None,
    }
}

/// Drop NaN and infinities so they land in the store as NULL.
pub fn finite(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite())
}
