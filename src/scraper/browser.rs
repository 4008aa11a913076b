use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use super::{PageRenderer, RenderedPage, ScrapeError};
use crate::config::ScraperConfig;
use crate::utils::jittered;

/// Headless Chromium, launched fresh for every page.
pub struct ChromeRenderer {
    config: ScraperConfig,
}

impl ChromeRenderer {
    pub fn new(config: &ScraperConfig) -> Self {
        Self { config: config.clone() }
    }

    fn browser_config(&self) -> Result<BrowserConfig, ScrapeError> {
        let mut builder = BrowserConfig::builder()
            .window_size(self.config.window_width, self.config.window_height)
            .arg(format!("--user-agent={}", self.config.user_agent));
        if let Some(path) = &self.config.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        builder.build().map_err(ScrapeError::Browser)
    }

    async fn load(&self, page: &Page, url: &str) -> Result<RenderedPage, ScrapeError> {
        let nav_timeout = Duration::from_secs(self.config.navigation_timeout_secs);
        timeout(nav_timeout, page.goto(url))
            .await
            .map_err(|_| ScrapeError::Timeout(nav_timeout))??;

        let settle = jittered(self.config.settle_min_ms, self.config.settle_max_ms);
        debug!("Settling {:?} on {}", settle, url);
        sleep(settle).await;

        let title = page.get_title().await?.unwrap_or_default();
        let html = page.content().await?;
        Ok(RenderedPage { title, html })
    }
}

#[async_trait]
impl PageRenderer for ChromeRenderer {
    async fn render(&self, url: &str) -> Result<RenderedPage, ScrapeError> {
        let (mut browser, mut handler) = Browser::launch(self.browser_config()?).await?;
        let events = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let result = match browser.new_page("about:blank").await {
            Ok(page) => self.load(&page, url).await,
            Err(e) => Err(e.into()),
        };

        if let Err(e) = browser.close().await {
            warn!("Browser did not close cleanly: {}", e);
        }
        let _ = browser.wait().await;
        events.abort();

        result
    }
}
