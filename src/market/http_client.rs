use crate::config::YahooConfig;
use crate::market::FetchError;
use crate::utils::jittered;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;
use url::Url;

/// Paced HTTP client with a cookie jar. One attempt per request.
pub struct HttpClient {
    inner: reqwest::Client,
    request_delay_ms: u64,
    jitter_ms: u64,
}

impl HttpClient {
    pub fn new(config: &YahooConfig) -> Result<Self, FetchError> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            // Yahoo hands out its crumb against a session cookie
            .cookie_store(true)
            .build()?;

        Ok(Self {
            inner,
            request_delay_ms: config.request_delay_ms,
            jitter_ms: config.jitter_ms,
        })
    }

    /// Fetch a URL as text; non-2xx is an error.
    pub async fn get_text(&self, url: &Url) -> Result<String, FetchError> {
        self.polite_delay().await;
        debug!("GET {}", url);

        let resp = self.inner.get(url.clone()).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status, url));
        }
        Ok(resp.text().await?)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &Url) -> Result<T, FetchError> {
        let body = self.get_text(url).await?;
        serde_json::from_str(&body).map_err(|e| FetchError::Decode(format!("{}: {}", url.path(), e)))
    }

    /// Visit a URL only for the cookies it sets; any HTTP status is accepted.
    pub async fn visit(&self, url: &Url) -> Result<(), FetchError> {
        debug!("VISIT {}", url);
        self.inner.get(url.clone()).send().await?;
        Ok(())
    }

    /// Sleep for the configured delay + random jitter.
    async fn polite_delay(&self) {
        let delay = jittered(self.request_delay_ms, self.request_delay_ms + self.jitter_ms);
        sleep(delay).await;
    }
}

fn status_error(status: StatusCode, url: &Url) -> FetchError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        FetchError::RateLimited
    } else {
        FetchError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_mapping() {
        let url = Url::parse("https://example.com/x").unwrap();
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, &url),
            FetchError::RateLimited
        ));
        match status_error(StatusCode::NOT_FOUND, &url) {
            FetchError::Status { status, url } => {
                assert_eq!(status, 404);
                assert_eq!(url, "https://example.com/x");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
