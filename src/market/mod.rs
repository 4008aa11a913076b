//! Market data sources: daily prices, live quotes and company fundamentals.

pub mod http_client;
pub mod yahoo;

use crate::models::{AnalystEstimates, KeyStats, PricePoint, QuarterlyFinancials};
use async_trait::async_trait;
use thiserror::Error;

pub use self::yahoo::YahooClient;

/// A single per-ticker fetch failed. Callers turn this into NULL fields.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("rate limited by provider")]
    RateLimited,

    #[error("unexpected response shape: {0}")]
    Decode(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("no data returned for {ticker}")]
    NoData { ticker: String },
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            FetchError::Decode(e.to_string())
        } else {
            FetchError::Transport(e.to_string())
        }
    }
}

impl From<yahoo_finance_api::YahooError> for FetchError {
    fn from(e: yahoo_finance_api::YahooError) -> Self {
        let msg = e.to_string();
        if msg.contains("429") || msg.contains("Too Many") {
            FetchError::RateLimited
        } else {
            FetchError::Provider(msg)
        }
    }
}

/// Summary fields served together by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickerSummary {
    pub stats: KeyStats,
    pub analyst: AnalystEstimates,
}

/// Daily closes and the live quote.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Daily closes over `range` ("1d", "5y", ...), ascending by date.
    async fn daily_closes(&self, ticker: &str, range: &str) -> Result<Vec<PricePoint>, FetchError>;

    /// First close of the most recent 1-day range.
    async fn latest_close(&self, ticker: &str) -> Result<f64, FetchError>;
}

/// Statement and analyst data.
#[async_trait]
pub trait FundamentalsSource: Send + Sync {
    async fn summary(&self, ticker: &str) -> Result<TickerSummary, FetchError>;

    async fn quarterly_financials(&self, ticker: &str) -> Result<QuarterlyFinancials, FetchError>;

    /// Provider-computed trailing PEG, latest value.
    async fn trailing_peg_ratio(&self, ticker: &str) -> Result<Option<f64>, FetchError>;
}
