//! Historical P/E range from quarterly statements and daily closes.
//!
//! Quarterly EPS is net income over shares issued on the dates both line items
//! share. Four consecutive quarters sum to a trailing-twelve-month figure,
//! which is padded forward onto every later trading day. The range is the
//! min/max of `close / ttm_eps` over days with positive earnings.

use crate::models::{PricePoint, QuarterlyFinancials};
use chrono::NaiveDate;
use thiserror::Error;

/// Quarters summed into one TTM value.
pub const TTM_WINDOW: usize = 4;

/// Why no P/E range could be produced.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum Unavailable {
    #[error("quarterly net income not reported")]
    MissingNetIncome,
    #[error("quarterly shares issued not reported")]
    MissingSharesIssued,
    #[error("net income and shares issued share no quarter")]
    NoCommonQuarters,
    #[error("fewer than {TTM_WINDOW} quarters of EPS")]
    InsufficientQuarters,
    #[error("no daily price history")]
    NoPriceHistory,
    #[error("no trading day with positive trailing earnings")]
    NoPositiveEarnings,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeRange {
    pub low: f64,
    pub high: f64,
}

/// One trading day after alignment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignedDay {
    pub date: NaiveDate,
    pub close: f64,
    pub ttm_eps: f64,
}

/// Per-quarter EPS on the intersection of both line items, ascending by date.
pub fn quarterly_eps(financials: &QuarterlyFinancials) -> Result<Vec<(NaiveDate, f64)>, Unavailable> {
    let net_income = financials
        .net_income
        .as_ref()
        .filter(|s| !s.is_empty())
        .ok_or(Unavailable::MissingNetIncome)?;
    let shares = financials
        .shares_issued
        .as_ref()
        .filter(|s| !s.is_empty())
        .ok_or(Unavailable::MissingSharesIssued)?;

    // BTreeMap iteration is already ascending
    let eps: Vec<(NaiveDate, f64)> = net_income
        .iter()
        .filter_map(|(date, income)| shares.get(date).map(|s| (*date, income / s)))
        .collect();

    if eps.is_empty() {
        return Err(Unavailable::NoCommonQuarters);
    }
    Ok(eps)
}

/// Rolling 4-quarter sums, stamped with the last quarter of each window.
/// `n` quarters yield `n - 3` values.
pub fn trailing_twelve_month(eps: &[(NaiveDate, f64)]) -> Vec<(NaiveDate, f64)> {
    eps.windows(TTM_WINDOW)
        .map(|w| (w[TTM_WINDOW - 1].0, w.iter().map(|(_, v)| v).sum()))
        .collect()
}

/// Pad TTM EPS forward onto each price date. Days before the first TTM date
/// are dropped; both inputs must be ascending.
pub fn forward_fill(ttm: &[(NaiveDate, f64)], prices: &[PricePoint]) -> Vec<AlignedDay> {
    let mut aligned = Vec::with_capacity(prices.len());
    let mut next = 0;
    let mut current: Option<f64> = None;

    for price in prices {
        while next < ttm.len() && ttm[next].0 <= price.date {
            current = Some(ttm[next].1);
            next += 1;
        }
        if let Some(ttm_eps) = current {
            aligned.push(AlignedDay {
                date: price.date,
                close: price.close,
                ttm_eps,
            });
        }
    }

    aligned
}

/// P/E per day, skipping days whose trailing earnings are not positive.
pub fn pe_series(aligned: &[AlignedDay]) -> Vec<(NaiveDate, f64)> {
    aligned
        .iter()
        .filter(|d| d.ttm_eps > 0.0 && d.ttm_eps.is_finite() && d.close.is_finite())
        .map(|d| (d.date, d.close / d.ttm_eps))
        .collect()
}

/// Full estimator: statements + daily closes → (min, max) P/E.
pub fn historical_pe_range(
    financials: &QuarterlyFinancials,
    prices: &[PricePoint],
) -> Result<PeRange, Unavailable> {
    let eps = quarterly_eps(financials)?;

    let ttm = trailing_twelve_month(&eps);
    if ttm.is_empty() {
        return Err(Unavailable::InsufficientQuarters);
    }

    if prices.is_empty() {
        return Err(Unavailable::NoPriceHistory);
    }

    let mut prices = prices.to_vec();
    prices.sort_by_key(|p| p.date);

    let pe = pe_series(&forward_fill(&ttm, &prices));

    let (low, high) = pe
        .iter()
        .map(|(_, v)| *v)
        .fold(None, |acc: Option<(f64, f64)>, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
        .ok_or(Unavailable::NoPositiveEarnings)?;

    Ok(PeRange { low, high })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn quarter_ends() -> Vec<NaiveDate> {
        vec![
            d(2023, 3, 31),
            d(2023, 6, 30),
            d(2023, 9, 30),
            d(2023, 12, 31),
            d(2024, 3, 31),
        ]
    }

    fn financials(income: &[f64], shares: &[f64]) -> QuarterlyFinancials {
        let dates = quarter_ends();
        QuarterlyFinancials {
            net_income: Some(dates.iter().copied().zip(income.iter().copied()).collect()),
            shares_issued: Some(dates.iter().copied().zip(shares.iter().copied()).collect()),
        }
    }

    fn daily(from: NaiveDate, days: i64, close: impl Fn(i64) -> f64) -> Vec<PricePoint> {
        (0..days)
            .map(|i| PricePoint {
                date: from + chrono::Duration::days(i),
                close: close(i),
            })
            .collect()
    }

    #[test]
    fn test_quarterly_eps_and_ttm_scenario() {
        let fin = financials(&[100.0, 110.0, 120.0, 130.0, 140.0], &[10.0; 5]);
        let eps = quarterly_eps(&fin).unwrap();
        let values: Vec<f64> = eps.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![10.0, 11.0, 12.0, 13.0, 14.0]);

        let ttm = trailing_twelve_month(&eps);
        assert_eq!(ttm, vec![(d(2023, 12, 31), 46.0), (d(2024, 3, 31), 50.0)]);
    }

    #[test]
    fn test_ttm_count_is_quarters_minus_three() {
        for n in 0..10usize {
            let eps: Vec<(NaiveDate, f64)> = (0..n)
                .map(|i| (d(2015, 1, 1) + chrono::Duration::days(91 * i as i64), 1.0))
                .collect();
            assert_eq!(trailing_twelve_month(&eps).len(), n.saturating_sub(3));
        }
    }

    #[test]
    fn test_forward_fill_never_assigns_before_first_ttm() {
        let ttm = vec![(d(2023, 12, 31), 46.0), (d(2024, 3, 31), 50.0)];
        let prices = daily(d(2023, 12, 1), 150, |_| 100.0);

        let aligned = forward_fill(&ttm, &prices);
        assert!(aligned.iter().all(|a| a.date >= d(2023, 12, 31)));
        assert_eq!(aligned.first().unwrap().date, d(2023, 12, 31));
        assert_eq!(aligned.first().unwrap().ttm_eps, 46.0);

        let switch = aligned.iter().find(|a| a.date == d(2024, 3, 31)).unwrap();
        assert_eq!(switch.ttm_eps, 50.0);
        let before = aligned.iter().find(|a| a.date == d(2024, 3, 30)).unwrap();
        assert_eq!(before.ttm_eps, 46.0);
    }

    #[test]
    fn test_range_scenario() {
        let fin = financials(&[100.0, 110.0, 120.0, 130.0, 140.0], &[10.0; 5]);
        // Closes rise 1.0 per day from 900
        let prices = daily(d(2023, 12, 1), 150, |i| 900.0 + i as f64);

        let range = historical_pe_range(&fin, &prices).unwrap();

        // 2023-12-31 is day 30 (TTM 46) and the last day on TTM 46 is
        // 2024-03-30, day 120. From 2024-03-31 TTM is 50 and P/E drops.
        assert_eq!(range.low, 930.0 / 46.0);
        assert_eq!(range.high, 1020.0 / 46.0);

        let aligned = forward_fill(
            &trailing_twelve_month(&quarterly_eps(&fin).unwrap()),
            &prices,
        );
        let pe = pe_series(&aligned);
        assert_eq!(pe.len(), 120);
        assert!(pe.iter().all(|(_, v)| *v >= range.low && *v <= range.high));
    }

    #[test]
    fn test_non_positive_ttm_days_are_excluded() {
        // EPS [-10, -5, -4, 1, 30] → TTM [-18, 22]
        let fin = financials(&[-100.0, -50.0, -40.0, 10.0, 300.0], &[10.0; 5]);
        let eps = quarterly_eps(&fin).unwrap();
        let ttm = trailing_twelve_month(&eps);
        assert_eq!(ttm[0].1, -18.0);
        assert_eq!(ttm[1].1, 22.0);

        let prices = daily(d(2023, 12, 1), 150, |_| 110.0);
        let aligned = forward_fill(&ttm, &prices);
        let pe = pe_series(&aligned);
        assert!(pe.iter().all(|(date, _)| *date >= d(2024, 3, 31)));

        let range = historical_pe_range(&fin, &prices).unwrap();
        assert_eq!(range, PeRange { low: 5.0, high: 5.0 });
    }

    #[test]
    fn test_all_negative_earnings_unavailable() {
        let fin = financials(&[-1.0; 5], &[10.0; 5]);
        let prices = daily(d(2023, 12, 1), 150, |_| 50.0);
        assert_eq!(
            historical_pe_range(&fin, &prices),
            Err(Unavailable::NoPositiveEarnings)
        );
    }

    #[test]
    fn test_missing_and_disjoint_inputs() {
        let prices = daily(d(2023, 12, 1), 10, |_| 50.0);

        let missing = QuarterlyFinancials {
            net_income: None,
            shares_issued: Some(BTreeMap::from([(d(2023, 3, 31), 1.0)])),
        };
        assert_eq!(
            historical_pe_range(&missing, &prices),
            Err(Unavailable::MissingNetIncome)
        );

        let empty_shares = QuarterlyFinancials {
            net_income: Some(BTreeMap::from([(d(2023, 3, 31), 1.0)])),
            shares_issued: Some(BTreeMap::new()),
        };
        assert_eq!(
            historical_pe_range(&empty_shares, &prices),
            Err(Unavailable::MissingSharesIssued)
        );

        let disjoint = QuarterlyFinancials {
            net_income: Some(BTreeMap::from([(d(2023, 3, 31), 1.0)])),
            shares_issued: Some(BTreeMap::from([(d(2023, 6, 30), 1.0)])),
        };
        assert_eq!(
            historical_pe_range(&disjoint, &prices),
            Err(Unavailable::NoCommonQuarters)
        );

        let mut short = financials(&[1.0; 5], &[1.0; 5]);
        if let Some(income) = short.net_income.as_mut() {
            income.retain(|date, _| *date < d(2023, 12, 31));
        }
        assert_eq!(
            historical_pe_range(&short, &prices),
            Err(Unavailable::InsufficientQuarters)
        );

        let fin = financials(&[1.0; 5], &[1.0; 5]);
        assert_eq!(historical_pe_range(&fin, &[]), Err(Unavailable::NoPriceHistory));
    }

    #[test]
    fn test_intersection_only_uses_shared_quarters() {
        let fin = QuarterlyFinancials {
            net_income: Some(BTreeMap::from([
                (d(2023, 3, 31), 10.0),
                (d(2023, 6, 30), 20.0),
                (d(2023, 9, 30), 30.0),
            ])),
            shares_issued: Some(BTreeMap::from([
                (d(2023, 6, 30), 10.0),
                (d(2023, 9, 30), 10.0),
                (d(2023, 12, 31), 10.0),
            ])),
        };
        let eps = quarterly_eps(&fin).unwrap();
        assert_eq!(eps, vec![(d(2023, 6, 30), 2.0), (d(2023, 9, 30), 3.0)]);
    }

    #[test]
    fn test_estimator_is_idempotent_and_order_insensitive() {
        let fin = financials(&[100.0, 110.0, 120.0, 130.0, 140.0], &[10.0; 5]);
        let prices = daily(d(2023, 12, 1), 150, |i| 900.0 + ((i * 37) % 11) as f64);
        let mut reversed = prices.clone();
        reversed.reverse();

        let first = historical_pe_range(&fin, &prices).unwrap();
        let second = historical_pe_range(&fin, &prices).unwrap();
        let third = historical_pe_range(&fin, &reversed).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, third);
    }
}
