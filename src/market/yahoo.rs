//! Yahoo Finance: chart data through `yahoo_finance_api`, fundamentals through
//! the quoteSummary and fundamentals-timeseries JSON endpoints.

use crate::config::YahooConfig;
use crate::market::http_client::HttpClient;
use crate::market::{FetchError, FundamentalsSource, PriceSource, TickerSummary};
use crate::models::{AnalystEstimates, EpsRange, KeyStats, PricePoint, QuarterlyFinancials};
use async_trait::async_trait;
use chrono::{DateTime, Months, NaiveDate, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;
use yahoo_finance_api as yahoo;

const SUMMARY_MODULES: &str = "defaultKeyStatistics,summaryDetail,earningsTrend";
const NET_INCOME: &str = "quarterlyNetIncome";
const SHARES_ISSUED: &str = "quarterlyShareIssued";
const TRAILING_PEG: &str = "trailingPegRatio";

/// How far back statement timeseries are requested.
const TIMESERIES_LOOKBACK_MONTHS: u32 = 120;

pub struct YahooClient {
    http: HttpClient,
    chart: yahoo::YahooConnector,
    config: YahooConfig,
    crumb: Mutex<Option<String>>,
}

impl YahooClient {
    pub fn new(config: &YahooConfig) -> Result<Self, FetchError> {
        Ok(Self {
            http: HttpClient::new(config)?,
            chart: yahoo::YahooConnector::new()?,
            config: config.clone(),
            crumb: Mutex::new(None),
        })
    }

    fn url(&self, base: &str, path: &str, query: &[(&str, &str)]) -> Result<Url, FetchError> {
        let raw = format!("{}{}", base.trim_end_matches('/'), path);
        Url::parse_with_params(&raw, query).map_err(|e| FetchError::Transport(format!("{raw}: {e}")))
    }

    /// Session crumb required by quoteSummary, fetched once per run.
    async fn crumb(&self) -> Result<String, FetchError> {
        let mut cached = self.crumb.lock().await;
        if let Some(crumb) = cached.as_ref() {
            return Ok(crumb.clone());
        }

        let cookie_url = Url::parse(&self.config.cookie_url)
            .map_err(|e| FetchError::Transport(format!("{}: {e}", self.config.cookie_url)))?;
        self.http.visit(&cookie_url).await?;

        let crumb_url = self.url(&self.config.query1_url, "/v1/test/getcrumb", &[])?;
        let crumb = self.http.get_text(&crumb_url).await?.trim().to_string();
        if crumb.is_empty() || crumb.contains('<') {
            return Err(FetchError::Provider("no crumb issued".to_string()));
        }

        debug!("Obtained Yahoo crumb");
        *cached = Some(crumb.clone());
        Ok(crumb)
    }

    async fn timeseries(
        &self,
        ticker: &str,
        types: &[&str],
    ) -> Result<HashMap<String, BTreeMap<NaiveDate, f64>>, FetchError> {
        let now = Utc::now();
        let start = now
            .checked_sub_months(Months::new(TIMESERIES_LOOKBACK_MONTHS))
            .unwrap_or(now);
        let period1 = start.timestamp().to_string();
        let period2 = now.timestamp().to_string();
        let joined = types.join(",");

        let url = self.url(
            &self.config.query2_url,
            &format!("/ws/fundamentals-timeseries/v1/finance/timeseries/{ticker}"),
            &[
                ("symbol", ticker),
                ("type", joined.as_str()),
                ("period1", period1.as_str()),
                ("period2", period2.as_str()),
            ],
        )?;

        let envelope: TimeseriesEnvelope = self.http.get_json(&url).await?;
        envelope.into_series()
    }
}

#[async_trait]
impl PriceSource for YahooClient {
    async fn daily_closes(&self, ticker: &str, range: &str) -> Result<Vec<PricePoint>, FetchError> {
        let response = self.chart.get_quote_range(ticker, "1d", range).await?;
        let quotes = response.quotes()?;

        let mut points: Vec<PricePoint> = quotes
            .iter()
            .filter_map(|q| {
                let ts = i64::try_from(q.timestamp).ok()?;
                let date = DateTime::from_timestamp(ts, 0)?.date_naive();
                q.close.is_finite().then_some(PricePoint { date, close: q.close })
            })
            .collect();
        points.sort_by_key(|p| p.date);
        points.dedup_by_key(|p| p.date);

        debug!("{}: {} daily closes over {}", ticker, points.len(), range);
        Ok(points)
    }

    async fn latest_close(&self, ticker: &str) -> Result<f64, FetchError> {
        self.daily_closes(ticker, "1d")
            .await?
            .first()
            .map(|p| p.close)
            .ok_or_else(|| FetchError::NoData { ticker: ticker.to_string() })
    }
}

#[async_trait]
impl FundamentalsSource for YahooClient {
    async fn summary(&self, ticker: &str) -> Result<TickerSummary, FetchError> {
        let crumb = self.crumb().await?;
        let url = self.url(
            &self.config.query2_url,
            &format!("/v10/finance/quoteSummary/{ticker}"),
            &[("modules", SUMMARY_MODULES), ("crumb", crumb.as_str())],
        )?;

        let envelope: QuoteSummaryEnvelope = self.http.get_json(&url).await?;
        envelope.into_summary(ticker)
    }

    async fn quarterly_financials(&self, ticker: &str) -> Result<QuarterlyFinancials, FetchError> {
        let mut series = self.timeseries(ticker, &[NET_INCOME, SHARES_ISSUED]).await?;
        Ok(QuarterlyFinancials {
            net_income: series.remove(NET_INCOME),
            shares_issued: series.remove(SHARES_ISSUED),
        })
    }

    async fn trailing_peg_ratio(&self, ticker: &str) -> Result<Option<f64>, FetchError> {
        let mut series = self.timeseries(ticker, &[TRAILING_PEG]).await?;
        Ok(series
            .remove(TRAILING_PEG)
            .and_then(|s| s.into_iter().next_back().map(|(_, v)| v)))
    }
}

// ── quoteSummary ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct QuoteSummaryEnvelope {
    #[serde(rename = "quoteSummary")]
    quote_summary: QuoteSummary,
}

#[derive(Debug, Deserialize)]
struct QuoteSummary {
    #[serde(default)]
    result: Option<Vec<SummaryResult>>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

impl ApiError {
    fn message(&self) -> String {
        format!(
            "{}: {}",
            self.code.as_deref().unwrap_or("error"),
            self.description.as_deref().unwrap_or("")
        )
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryResult {
    #[serde(default)]
    default_key_statistics: Option<KeyStatistics>,
    #[serde(default)]
    summary_detail: Option<SummaryDetail>,
    #[serde(default)]
    earnings_trend: Option<EarningsTrend>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyStatistics {
    #[serde(default)]
    forward_eps: RawValue,
    #[serde(default)]
    trailing_eps: RawValue,
}

#[derive(Debug, Default, Deserialize)]
struct SummaryDetail {
    #[serde(rename = "trailingPE", default)]
    trailing_pe: RawValue,
    #[serde(rename = "forwardPE", default)]
    forward_pe: RawValue,
}

#[derive(Debug, Default, Deserialize)]
struct EarningsTrend {
    #[serde(default)]
    trend: Vec<Trend>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Trend {
    #[serde(default)]
    period: Option<String>,
    #[serde(default)]
    earnings_estimate: Option<EstimateBlock>,
}

#[derive(Debug, Default, Deserialize)]
struct EstimateBlock {
    #[serde(default)]
    avg: RawValue,
    #[serde(default)]
    low: RawValue,
    #[serde(default)]
    high: RawValue,
}

/// Yahoo wraps numbers as `{"raw": 1.2, "fmt": "1.20"}`, or `{}` when absent.
#[derive(Debug, Default, Deserialize)]
struct RawValue {
    #[serde(default)]
    raw: Option<f64>,
}

impl RawValue {
    fn get(&self) -> Option<f64> {
        self.raw.filter(|v| v.is_finite())
    }
}

impl QuoteSummaryEnvelope {
    fn into_summary(self, ticker: &str) -> Result<TickerSummary, FetchError> {
        if let Some(err) = self.quote_summary.error {
            return Err(FetchError::Provider(err.message()));
        }
        let result = self
            .quote_summary
            .result
            .and_then(|r| r.into_iter().next())
            .ok_or_else(|| FetchError::NoData { ticker: ticker.to_string() })?;

        let key_stats = result.default_key_statistics.unwrap_or_default();
        let detail = result.summary_detail.unwrap_or_default();

        let stats = KeyStats {
            trailing_eps: key_stats.trailing_eps.get(),
            forward_eps: key_stats.forward_eps.get(),
            trailing_pe: detail.trailing_pe.get(),
            forward_pe: detail.forward_pe.get(),
        };

        let mut analyst = AnalystEstimates::default();
        for trend in result.earnings_trend.map(|t| t.trend).unwrap_or_default() {
            let (Some(period), Some(estimate)) = (trend.period, trend.earnings_estimate) else {
                continue;
            };
            if let Some(slot) = analyst.slot_mut(&period) {
                *slot = EpsRange {
                    low: estimate.low.get(),
                    high: estimate.high.get(),
                    avg: estimate.avg.get(),
                };
            }
        }

        Ok(TickerSummary { stats, analyst })
    }
}

// ── fundamentals-timeseries ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TimeseriesEnvelope {
    timeseries: Timeseries,
}

#[derive(Debug, Deserialize)]
struct Timeseries {
    #[serde(default)]
    result: Option<Vec<TimeseriesResult>>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct TimeseriesResult {
    meta: TimeseriesMeta,
    #[serde(flatten)]
    series: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct TimeseriesMeta {
    #[serde(rename = "type", default)]
    kinds: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TimeseriesPoint {
    #[serde(rename = "asOfDate")]
    as_of_date: NaiveDate,
    #[serde(rename = "reportedValue", default)]
    reported_value: RawValue,
}

impl TimeseriesEnvelope {
    /// Series keyed by type. A type the provider returned no entries for is
    /// absent from the map.
    fn into_series(self) -> Result<HashMap<String, BTreeMap<NaiveDate, f64>>, FetchError> {
        if let Some(err) = self.timeseries.error {
            return Err(FetchError::Provider(err.message()));
        }

        let mut out = HashMap::new();
        for mut result in self.timeseries.result.unwrap_or_default() {
            let Some(kind) = result.meta.kinds.first().cloned() else { continue };
            let Some(serde_json::Value::Array(entries)) = result.series.remove(&kind) else {
                continue;
            };

            let mut points = BTreeMap::new();
            for entry in entries.into_iter().filter(|e| !e.is_null()) {
                let point: TimeseriesPoint = serde_json::from_value(entry)
                    .map_err(|e| FetchError::Decode(format!("{kind}: {e}")))?;
                if let Some(v) = point.reported_value.get() {
                    points.insert(point.as_of_date, v);
                }
            }
            out.insert(kind, points);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_quote_summary_parsing() {
        let body = r#"{
          "quoteSummary": {
            "result": [{
              "defaultKeyStatistics": {
                "forwardEps": {"raw": 7.46, "fmt": "7.46"},
                "trailingEps": {"raw": 6.42, "fmt": "6.42"},
                "pegRatio": {}
              },
              "summaryDetail": {
                "trailingPE": {"raw": 29.3, "fmt": "29.30"},
                "forwardPE": {}
              },
              "earningsTrend": {
                "trend": [
                  {"period": "0q", "earningsEstimate": {"avg": {"raw": 1.5}, "low": {"raw": 1.4}, "high": {"raw": 1.6}}},
                  {"period": "+1y", "earningsEstimate": {"avg": {"raw": 7.9}, "low": {}, "high": {"raw": 8.4}}},
                  {"period": "+5y", "earningsEstimate": {"avg": {}, "low": {}, "high": {}}},
                  {"period": "-5y"}
                ]
              }
            }],
            "error": null
          }
        }"#;

        let envelope: QuoteSummaryEnvelope = serde_json::from_str(body).unwrap();
        let summary = envelope.into_summary("AAPL").unwrap();

        assert_eq!(summary.stats.forward_eps, Some(7.46));
        assert_eq!(summary.stats.trailing_eps, Some(6.42));
        assert_eq!(summary.stats.trailing_pe, Some(29.3));
        assert_eq!(summary.stats.forward_pe, None);
        assert_eq!(
            summary.analyst.current_quarter,
            EpsRange { low: Some(1.4), high: Some(1.6), avg: Some(1.5) }
        );
        assert_eq!(
            summary.analyst.next_year,
            EpsRange { low: None, high: Some(8.4), avg: Some(7.9) }
        );
        assert_eq!(summary.analyst.next_quarter, EpsRange::default());
    }

    #[test]
    fn test_quote_summary_error() {
        let body = r#"{"quoteSummary": {"result": null,
            "error": {"code": "Not Found", "description": "Quote not found for symbol: ZZZZ"}}}"#;
        let envelope: QuoteSummaryEnvelope = serde_json::from_str(body).unwrap();
        match envelope.into_summary("ZZZZ") {
            Err(FetchError::Provider(msg)) => assert!(msg.contains("Not Found")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_timeseries_parsing() {
        let body = r#"{
          "timeseries": {
            "result": [
              {
                "meta": {"symbol": ["AAPL"], "type": ["quarterlyNetIncome"]},
                "timestamp": [1688083200, 1696032000],
                "quarterlyNetIncome": [
                  {"asOfDate": "2023-06-30", "periodType": "3M", "reportedValue": {"raw": 19881000000, "fmt": "19.88B"}},
                  null,
                  {"asOfDate": "2023-09-30", "periodType": "3M", "reportedValue": {"raw": 22956000000, "fmt": "22.96B"}}
                ]
              },
              {
                "meta": {"symbol": ["AAPL"], "type": ["quarterlyShareIssued"]}
              }
            ],
            "error": null
          }
        }"#;

        let envelope: TimeseriesEnvelope = serde_json::from_str(body).unwrap();
        let series = envelope.into_series().unwrap();

        let income = &series[NET_INCOME];
        assert_eq!(income.len(), 2);
        assert_eq!(income[&d(2023, 9, 30)], 22_956_000_000.0);
        // Type present in meta but carrying no entries
        assert!(!series.contains_key(SHARES_ISSUED));
    }
}
