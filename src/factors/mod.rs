//! Cross-sectional factor table over the daily price bundle.

pub mod indicators;

use crate::config::ReportConfig;
use crate::models::DailyBar;
use chrono::{Duration, NaiveDate};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::debug;

use self::indicators::Bands;

/// Calendar days of bundle history loaded ahead of the report window; enough
/// for the longest lookback (120 ten-bar returns).
pub const HISTORY_LOOKBACK_DAYS: i64 = 400;

const DOLLAR_VOLUME_WINDOW: usize = 5;
const RSI_WINDOW: usize = 14;
const MACD_FAST: usize = 12;
const MACD_SLOW: usize = 26;
const MACD_SIGNAL: usize = 9;
const MACD_RECURSIVE_WINDOW: usize = 120;
const BOLLINGER_WINDOW: usize = 14;
const BOLLINGER_K: f64 = 1.8;
const REVERSION_RETURN_WINDOW: usize = 10;
const REVERSION_WINDOW: usize = 120;

#[derive(Debug, Error, PartialEq)]
pub enum FactorError {
    #[error("no bars in the price bundle up to {0}")]
    EmptyBundle(NaiveDate),

    #[error("{0} is not a trading session in the price bundle")]
    NotASession(NaiveDate),
}

/// One (session, asset) row of the factor table.
#[derive(Debug, Clone, PartialEq)]
pub struct FactorRow {
    pub date: NaiveDate,
    pub asset: String,
    pub dollar_volume: Option<f64>,
    pub daily_return: Option<f64>,
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub close: f64,
    pub bollinger: Option<Bands>,
    pub shorts: bool,
}

/// Per-asset history, ascending by date.
struct Series<'a> {
    dates: Vec<NaiveDate>,
    closes: Vec<f64>,
    volumes: Vec<Option<f64>>,
    asset: &'a str,
}

impl<'a> Series<'a> {
    /// Index one past the bar on `session`, if the asset traded that day.
    fn end_index(&self, session: NaiveDate) -> Option<usize> {
        self.dates.binary_search(&session).ok().map(|i| i + 1)
    }
}

fn group_by_asset(bars: &[DailyBar], end: NaiveDate) -> BTreeMap<&str, Series<'_>> {
    let mut by_asset: BTreeMap<&str, Vec<&DailyBar>> = BTreeMap::new();
    for bar in bars.iter().filter(|b| b.date <= end) {
        by_asset.entry(bar.symbol.as_str()).or_default().push(bar);
    }

    by_asset
        .into_iter()
        .map(|(asset, mut bars)| {
            bars.sort_by_key(|b| b.date);
            bars.dedup_by_key(|b| b.date);
            let series = Series {
                dates: bars.iter().map(|b| b.date).collect(),
                closes: bars.iter().map(|b| b.close).collect(),
                volumes: bars.iter().map(|b| b.volume.map(|v| v as f64)).collect(),
                asset,
            };
            (asset, series)
        })
        .collect()
}

/// Evaluate the factor table on every session in `[end - window_days, end]`.
///
/// On each session the universe is the `universe_size` assets with the
/// highest trailing dollar volume. `shorts` marks universe assets that are
/// among the `shorts_count` highest mean-reversion scores across the whole
/// bundle.
pub fn evaluate(
    bars: &[DailyBar],
    end: NaiveDate,
    config: &ReportConfig,
) -> Result<Vec<FactorRow>, FactorError> {
    let assets = group_by_asset(bars, end);
    let sessions: BTreeSet<NaiveDate> = assets.values().flat_map(|s| s.dates.iter().copied()).collect();

    if sessions.is_empty() {
        return Err(FactorError::EmptyBundle(end));
    }
    if !sessions.contains(&end) {
        return Err(FactorError::NotASession(end));
    }

    let start = end - Duration::days(config.window_days);
    let mut table = Vec::new();

    for &session in sessions.range(start..=end) {
        let mut ranked: Vec<(&Series<'_>, usize, f64)> = assets
            .values()
            .filter_map(|s| {
                let upto = s.end_index(session)?;
                let adv = indicators::average_dollar_volume(
                    &s.closes[..upto],
                    &s.volumes[..upto],
                    DOLLAR_VOLUME_WINDOW,
                )?;
                Some((s, upto, adv))
            })
            .collect();
        ranked.sort_by(|a, b| b.2.total_cmp(&a.2).then_with(|| a.0.asset.cmp(b.0.asset)));
        ranked.truncate(config.universe_size);

        let shorts = top_reversion(&assets, session, config.shorts_count);

        let rows: Vec<FactorRow> = ranked
            .into_iter()
            .map(|(s, upto, adv)| {
                let closes = &s.closes[..upto];
                FactorRow {
                    date: session,
                    asset: s.asset.to_string(),
                    dollar_volume: Some(adv),
                    daily_return: indicators::returns(closes, 2),
                    rsi: indicators::rsi(closes, RSI_WINDOW),
                    macd: indicators::macd_signal_windowed(closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL),
                    macd_signal: indicators::macd_signal_recursive(
                        closes,
                        MACD_FAST,
                        MACD_SLOW,
                        MACD_SIGNAL,
                        MACD_RECURSIVE_WINDOW,
                    ),
                    close: closes[closes.len() - 1],
                    bollinger: indicators::bollinger(closes, BOLLINGER_WINDOW, BOLLINGER_K),
                    shorts: shorts.contains(s.asset),
                }
            })
            .collect();

        debug!("{}: {} assets in universe, shorts {:?}", session, rows.len(), shorts);
        table.extend(rows);
    }

    Ok(table)
}

/// The `count` assets with the highest mean-reversion score on `session`,
/// ranked over every asset with enough history, not only the universe.
fn top_reversion<'a>(
    assets: &BTreeMap<&'a str, Series<'a>>,
    session: NaiveDate,
    count: usize,
) -> BTreeSet<&'a str> {
    let mut scored: Vec<(&'a str, f64)> = assets
        .iter()
        .filter_map(|(&asset, s)| {
            let upto = s.end_index(session)?;
            let z = indicators::mean_reversion(&s.closes[..upto], REVERSION_RETURN_WINDOW, REVERSION_WINDOW)?;
            Some((asset, z))
        })
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    scored.into_iter().take(count).map(|(asset, _)| asset).collect()
}
