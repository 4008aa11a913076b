//! Report assembly: the daily factor summary and the forward-price reports.

pub mod html;
pub mod mailer;
pub mod snapshot;

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::factors::FactorRow;
use crate::factors::indicators::Bands;
use crate::market::PriceSource;
use crate::models::{ExtendedEstimate, ForwardPriceEstimate};
use crate::utils::round2;
use crate::valuation::{Position, classify, eps_growth, peg_ratio};

use self::html::{HtmlTable, document, num};
pub use self::mailer::{Email, Mailer};

// ── Daily factor report ───────────────────────────────────────────────────────

fn round_opt(v: Option<f64>) -> Option<f64> {
    v.map(round2)
}

/// End-date rows in presentation units (dollar volume in billions, daily
/// return in percent), rounded to 2 decimals, sorted by RSI with missing
/// RSI last.
pub fn end_of_day(table: Vec<FactorRow>, end: NaiveDate) -> Vec<FactorRow> {
    let mut rows: Vec<FactorRow> = table
        .into_iter()
        .filter(|r| r.date == end)
        .map(|r| FactorRow {
            dollar_volume: round_opt(r.dollar_volume.map(|v| v / 1e9)),
            daily_return: round_opt(r.daily_return.map(|v| v * 100.0)),
            rsi: round_opt(r.rsi),
            macd: round_opt(r.macd),
            macd_signal: round_opt(r.macd_signal),
            close: round2(r.close),
            bollinger: r.bollinger.map(|b| Bands {
                lower: round2(b.lower),
                middle: round2(b.middle),
                upper: round2(b.upper),
            }),
            ..r
        })
        .collect();

    rows.sort_by(|a, b| match (a.rsi, b.rsi) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    rows
}

pub fn daily_email(rows: &[FactorRow], end: NaiveDate) -> Email {
    let mut table = HtmlTable::new([
        "asset",
        "Dollar Volume",
        "daily return",
        "RSI",
        "MACD",
        "macdhist",
        "close",
        "Bollinger",
        "shorts",
    ]);
    for r in rows {
        table.push_row(vec![
            r.asset.clone(),
            num(r.dollar_volume),
            num(r.daily_return),
            num(r.rsi),
            num(r.macd),
            num(r.macd_signal),
            num(Some(r.close)),
            r.bollinger
                .map(|b| format!("({:.2}, {:.2}, {:.2})", b.lower, b.middle, b.upper))
                .unwrap_or_default(),
            r.shorts.to_string(),
        ]);
    }

    Email {
        subject: "Holdings Daily Report".to_string(),
        html: document(&format!("Daily Summary for {end}"), &table),
    }
}

// ── Forward-price reports ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ForwardRow {
    pub estimate: ForwardPriceEstimate,
    pub current_price: Option<f64>,
    pub position: Option<Position>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtendedRow {
    pub quoted: ForwardRow,
    pub fields: ExtendedEstimate,
    pub eps_growth: Option<f64>,
    pub peg: Option<f64>,
    pub analyst_price_low: Option<f64>,
    pub analyst_price_high: Option<f64>,
}

fn product(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    Some(a? * b?).filter(|v| v.is_finite())
}

/// Quote one ticker and place it against its band. A failed quote leaves
/// both fields empty.
async fn quote<P: PriceSource + ?Sized>(prices: &P, estimate: ForwardPriceEstimate) -> ForwardRow {
    match prices.latest_close(&estimate.ticker).await {
        Ok(price) => {
            let position = classify(
                estimate.estimated_forward_price_low,
                estimate.estimated_forward_price_high,
                price,
            );
            debug!("{}: {:.2} is {}", estimate.ticker, price, position);
            ForwardRow { estimate, current_price: Some(price), position: Some(position) }
        }
        Err(e) => {
            warn!("Could not get current price for {}: {}", estimate.ticker, e);
            ForwardRow { estimate, current_price: None, position: None }
        }
    }
}

/// One output row per estimate, in input order, whatever the quote outcome.
pub async fn quote_estimates<P: PriceSource + ?Sized>(
    prices: &P,
    estimates: Vec<ForwardPriceEstimate>,
) -> Vec<ForwardRow> {
    let mut rows = Vec::with_capacity(estimates.len());
    for estimate in estimates {
        rows.push(quote(prices, estimate).await);
    }
    rows
}

pub async fn quote_extended<P: PriceSource + ?Sized>(
    prices: &P,
    estimates: Vec<ExtendedEstimate>,
) -> Vec<ExtendedRow> {
    let mut rows = Vec::with_capacity(estimates.len());
    for fields in estimates {
        let quoted = quote(prices, fields.base.clone()).await;
        let growth = eps_growth(fields.forward_eps, fields.trailing_eps);
        rows.push(ExtendedRow {
            quoted,
            eps_growth: growth,
            peg: peg_ratio(fields.forward_pe, growth),
            analyst_price_low: product(fields.forward_pe_perc_25, fields.analyst_eps_avg_next_year),
            analyst_price_high: product(fields.forward_pe_perc_75, fields.analyst_eps_avg_next_year),
            fields,
        });
    }
    rows
}

fn forward_cells(row: &ForwardRow) -> Vec<String> {
    vec![
        row.estimate.ticker.clone(),
        num(Some(row.estimate.estimated_forward_price_low)),
        num(Some(row.estimate.estimated_forward_price_high)),
        row.estimate.latest_date.to_string(),
        num(row.current_price),
        row.position.map(|p| p.to_string()).unwrap_or_default(),
    ]
}

const FORWARD_HEADERS: [&str; 6] = [
    "ticker",
    "estimated_forward_price_low",
    "estimated_forward_price_high",
    "latest_date",
    "current_price",
    "position",
];

pub fn forward_email(rows: &[ForwardRow], today: NaiveDate) -> Email {
    let mut table = HtmlTable::new(FORWARD_HEADERS);
    for row in rows {
        table.push_row(forward_cells(row));
    }
    Email {
        subject: format!("Forward Price Estimate Report - {today}"),
        html: document(&format!("Estimated Forward Price Report for {today}"), &table),
    }
}

pub fn extended_email(rows: &[ExtendedRow], today: NaiveDate) -> Email {
    let headers = FORWARD_HEADERS.iter().copied().chain([
        "forward_eps",
        "trailing_eps",
        "forward_pe",
        "eps_growth",
        "peg",
        "peg_ratio",
        "forward_pe_perc_25",
        "forward_pe_perc_75",
        "analyst_eps_avg_p1y",
        "analyst_price_low",
        "analyst_price_high",
    ]);
    let mut table = HtmlTable::new(headers);
    for row in rows {
        let mut cells = forward_cells(&row.quoted);
        cells.extend([
            num(row.fields.forward_eps),
            num(row.fields.trailing_eps),
            num(row.fields.forward_pe),
            num(row.eps_growth),
            num(row.peg),
            num(row.fields.peg_ratio),
            num(row.fields.forward_pe_perc_25),
            num(row.fields.forward_pe_perc_75),
            num(row.fields.analyst_eps_avg_next_year),
            num(row.analyst_price_low),
            num(row.analyst_price_high),
        ]);
        table.push_row(cells);
    }
    Email {
        subject: format!("Extended Forward Price Report - {today}"),
        html: document(&format!("Extended Forward Price Report for {today}"), &table),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::FetchError;
    use crate::models::PricePoint;
    use async_trait::async_trait;
    use std::collections::HashMap;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    struct Quotes(HashMap<&'static str, f64>);

    #[async_trait]
    impl PriceSource for Quotes {
        async fn daily_closes(&self, _: &str, _: &str) -> Result<Vec<PricePoint>, FetchError> {
            Ok(vec![])
        }

        async fn latest_close(&self, ticker: &str) -> Result<f64, FetchError> {
            self.0
                .get(ticker)
                .copied()
                .ok_or_else(|| FetchError::NoData { ticker: ticker.to_string() })
        }
    }

    fn estimate(ticker: &str, low: f64, high: f64) -> ForwardPriceEstimate {
        ForwardPriceEstimate {
            ticker: ticker.to_string(),
            estimated_forward_price_low: low,
            estimated_forward_price_high: high,
            latest_date: d(2024, 6, 28),
        }
    }

    #[tokio::test]
    async fn test_failed_quote_keeps_row() {
        let quotes = Quotes(HashMap::from([("AAPL", 95.0), ("MSFT", 500.0)]));
        let rows = quote_estimates(
            &quotes,
            vec![
                estimate("AAPL", 100.0, 150.0),
                estimate("GOOG", 100.0, 150.0),
                estimate("MSFT", 300.0, 400.0),
            ],
        )
        .await;

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].position, Some(Position::Below));
        assert_eq!(rows[1].current_price, None);
        assert_eq!(rows[1].position, None);
        assert_eq!(rows[2].position, Some(Position::Above));

        let email = forward_email(&rows, d(2024, 7, 1));
        assert_eq!(email.subject, "Forward Price Estimate Report - 2024-07-01");
        assert!(email.html.contains("Estimated Forward Price Report for 2024-07-01"));
        assert!(email.html.contains("<td>GOOG</td><td>100.00</td><td>150.00</td><td>2024-06-28</td><td></td><td></td>"));
    }

    #[tokio::test]
    async fn test_extended_columns() {
        let quotes = Quotes(HashMap::from([("AAPL", 110.0)]));
        let fields = ExtendedEstimate {
            base: estimate("AAPL", 100.0, 150.0),
            forward_eps: Some(5.0),
            trailing_eps: Some(4.0),
            forward_pe: Some(20.0),
            forward_pe_perc_25: Some(18.0),
            forward_pe_perc_75: Some(26.0),
            analyst_eps_avg_next_year: Some(6.0),
            peg_ratio: Some(1.9),
        };
        let shrinking = ExtendedEstimate {
            base: estimate("INTC", 20.0, 30.0),
            forward_eps: Some(1.0),
            trailing_eps: Some(2.0),
            forward_pe: Some(25.0),
            analyst_eps_avg_next_year: None,
            ..fields.clone()
        };

        let rows = quote_extended(&quotes, vec![fields, shrinking]).await;

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].quoted.position, Some(Position::Within));
        assert_eq!(rows[0].eps_growth, Some(0.25));
        assert!((rows[0].peg.unwrap() - 0.8).abs() < 1e-12);
        assert_eq!(rows[0].analyst_price_low, Some(108.0));
        assert_eq!(rows[0].analyst_price_high, Some(156.0));

        assert_eq!(rows[1].eps_growth, Some(-0.5));
        assert_eq!(rows[1].peg, None);
        assert_eq!(rows[1].analyst_price_low, None);
        assert_eq!(rows[1].quoted.current_price, None);

        let email = extended_email(&rows, d(2024, 7, 1));
        assert_eq!(email.subject, "Extended Forward Price Report - 2024-07-01");
        assert!(email.html.contains("<th>peg</th><th>peg_ratio</th>"));
    }

    fn factor(asset: &str, rsi: Option<f64>) -> FactorRow {
        FactorRow {
            date: d(2024, 6, 28),
            asset: asset.to_string(),
            dollar_volume: Some(12_345_678_901.0),
            daily_return: Some(0.012345),
            rsi,
            macd: Some(1.23456),
            macd_signal: None,
            close: 187.456,
            bollinger: Some(Bands { lower: 180.111, middle: 185.557, upper: 190.999 }),
            shorts: false,
        }
    }

    #[test]
    fn test_end_of_day_units_and_order() {
        let mut earlier = factor("OLD", Some(1.0));
        earlier.date = d(2024, 6, 27);
        let table = vec![
            factor("AAA", None),
            factor("BBB", Some(70.0)),
            earlier,
            factor("CCC", Some(30.0)),
        ];

        let rows = end_of_day(table, d(2024, 6, 28));
        let order: Vec<&str> = rows.iter().map(|r| r.asset.as_str()).collect();
        assert_eq!(order, ["CCC", "BBB", "AAA"]);

        let r = &rows[0];
        assert_eq!(r.dollar_volume, Some(12.35));
        assert_eq!(r.daily_return, Some(1.23));
        assert_eq!(r.macd, Some(1.23));
        assert_eq!(r.close, 187.46);
        assert_eq!(r.bollinger, Some(Bands { lower: 180.11, middle: 185.56, upper: 191.0 }));

        let email = daily_email(&rows, d(2024, 6, 28));
        assert_eq!(email.subject, "Holdings Daily Report");
        assert!(email.html.contains("Daily Summary for 2024-06-28"));
        assert!(email.html.contains("(180.11, 185.56, 191.00)"));
    }
}
