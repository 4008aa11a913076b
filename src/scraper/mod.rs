//! Forward-P/E history from the rendered valuation page.

pub mod browser;
pub mod parsers;

use crate::config::ScraperConfig;
use crate::models::ForwardPePoint;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use self::browser::ChromeRenderer;
use self::parsers::{is_challenge_title, parse_forward_pe_table, to_month_ends};

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("blocked by anti-bot challenge page")]
    Blocked,

    #[error("browser error: {0}")]
    Browser(String),

    #[error("navigation timed out after {0:?}")]
    Timeout(Duration),

    #[error("could not parse history table: {0}")]
    Parse(String),
}

impl From<chromiumoxide::error::CdpError> for ScrapeError {
    fn from(e: chromiumoxide::error::CdpError) -> Self {
        ScrapeError::Browser(e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub title: String,
    pub html: String,
}

/// Loads a URL in a JS-capable browser and returns the settled DOM.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str) -> Result<RenderedPage, ScrapeError>;
}

pub struct ForwardPeScraper<R> {
    renderer: R,
    base_url: String,
}

impl<R: PageRenderer> ForwardPeScraper<R> {
    pub fn new(renderer: R, config: &ScraperConfig) -> Self {
        Self {
            renderer,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    fn ticker_url(&self, ticker: &str) -> String {
        format!("{}/{}", self.base_url, ticker)
    }

    /// One render, no retry.
    pub async fn fetch(&self, ticker: &str) -> Result<Vec<ForwardPePoint>, ScrapeError> {
        let url = self.ticker_url(ticker);
        info!("Rendering {}", url);

        let page = self.renderer.render(&url).await?;
        if is_challenge_title(&page.title) {
            warn!("{}: challenge page served ({:?})", ticker, page.title);
            return Err(ScrapeError::Blocked);
        }
        debug!("{}: page title {:?}", ticker, page.title);

        let points: Vec<ForwardPePoint> = to_month_ends(parse_forward_pe_table(&page.html)?)
            .into_iter()
            .map(|(date, forward_pe)| ForwardPePoint {
                ticker: ticker.to_string(),
                date,
                forward_pe,
            })
            .collect();

        info!("{}: {} forward P/E quarters", ticker, points.len());
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::sync::Mutex;

    struct StaticPage {
        title: &'static str,
        html: &'static str,
        requested: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PageRenderer for StaticPage {
        async fn render(&self, url: &str) -> Result<RenderedPage, ScrapeError> {
            self.requested.lock().unwrap().push(url.to_string());
            Ok(RenderedPage { title: self.title.into(), html: self.html.into() })
        }
    }

    const HISTORY: &str = r#"<table>
        <thead id="historical-quarter"><tr><th>Quarterly</th></tr></thead>
        <tbody>
          <tr><td></td><td>2024-02</td><td>2024-05</td></tr>
          <tr><td>Forward PE</td><td>25.5</td><td>-</td></tr>
        </tbody></table>"#;

    fn scraper(title: &'static str, html: &'static str) -> ForwardPeScraper<StaticPage> {
        let renderer = StaticPage { title, html, requested: Mutex::new(vec![]) };
        ForwardPeScraper::new(renderer, &ScraperConfig::default())
    }

    #[tokio::test]
    async fn test_fetch_builds_points() {
        let s = scraper("MSFT Forward PE Ratio", HISTORY);
        let points = s.fetch("MSFT").await.unwrap();

        assert_eq!(
            points,
            vec![ForwardPePoint {
                ticker: "MSFT".into(),
                date: NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(),
                forward_pe: 25.5,
            }]
        );
        assert_eq!(
            s.renderer.requested.lock().unwrap().as_slice(),
            ["https://www.gurufocus.com/term/forward-pe-ratio/MSFT"]
        );
    }

    #[tokio::test]
    async fn test_challenge_page_is_blocked() {
        let s = scraper("Attention Required! | Cloudflare", HISTORY);
        assert!(matches!(s.fetch("MSFT").await, Err(ScrapeError::Blocked)));
    }
}
