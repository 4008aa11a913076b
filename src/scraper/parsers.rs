use chrono::{Datelike, NaiveDate};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use super::ScrapeError;

/// Title fragment served by the anti-bot interstitial.
const CHALLENGE_TITLE: &str = "Attention Required!";

/// One quarter as it appears on the page: `("2024-03", 31.2)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawQuarter {
    pub month: String,
    pub forward_pe: f64,
}

pub fn is_challenge_title(title: &str) -> bool {
    title.contains(CHALLENGE_TITLE)
}

fn selector(css: &str) -> Result<Selector, ScrapeError> {
    Selector::parse(css).map_err(|e| ScrapeError::Parse(format!("selector {css}: {e:?}")))
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text().collect::<String>().trim().to_string()
}

/// Parse the quarterly history table.
///
/// Row 2 holds the `YYYY-MM` headers (blank cells dropped), row 3 the
/// values after a leading label cell. Pairs are zipped by position; a value
/// that is missing or not a number drops that quarter.
pub fn parse_forward_pe_table(html: &str) -> Result<Vec<RawQuarter>, ScrapeError> {
    let doc = Html::parse_document(html);

    let thead_sel = selector("thead#historical-quarter")?;
    let tr_sel = selector("tr")?;
    let td_sel = selector("td")?;

    let thead = doc
        .select(&thead_sel)
        .next()
        .ok_or_else(|| ScrapeError::Parse("no thead#historical-quarter".to_string()))?;

    let table = thead
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|e| e.value().name() == "table")
        .ok_or_else(|| ScrapeError::Parse("thead has no parent table".to_string()))?;

    let rows: Vec<ElementRef<'_>> = table.select(&tr_sel).collect();
    if rows.len() < 3 {
        return Err(ScrapeError::Parse(format!(
            "expected at least 3 rows, found {}",
            rows.len()
        )));
    }

    let months: Vec<String> = rows[1]
        .select(&td_sel)
        .map(cell_text)
        .filter(|t| !t.is_empty())
        .collect();

    let values: Vec<String> = rows[2].select(&td_sel).skip(1).map(cell_text).collect();

    let quarters: Vec<RawQuarter> = months
        .into_iter()
        .enumerate()
        .filter_map(|(i, month)| {
            let forward_pe = values.get(i)?.parse::<f64>().ok()?;
            Some(RawQuarter { month, forward_pe })
        })
        .collect();

    debug!("Parsed {} quarters from history table", quarters.len());
    Ok(quarters)
}

/// `"YYYY-MM"` to the last calendar day of that month.
pub fn month_end(month: &str) -> Option<NaiveDate> {
    let (y, m) = month.trim().split_once('-')?;
    let first = NaiveDate::from_ymd_opt(y.parse().ok()?, m.parse().ok()?, 1)?;
    let next = if first.month() == 12 {
        NaiveDate::from_ymd_opt(first.year() + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1)?
    };
    next.pred_opt()
}

/// Quarters with month-end dates. Headers that are not `YYYY-MM` are dropped.
pub fn to_month_ends(quarters: Vec<RawQuarter>) -> Vec<(NaiveDate, f64)> {
    quarters
        .into_iter()
        .filter_map(|q| match month_end(&q.month) {
            Some(date) => Some((date, q.forward_pe)),
            None => {
                warn!("Skipping unrecognised quarter header {:?}", q.month);
                None
            }
        })
        .collect()
}
