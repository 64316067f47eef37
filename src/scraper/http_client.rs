use crate::config::ScraperConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use std::time::Duration;
use tokio::time::sleep;
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, warn};

use super::{FetchError, FetchStrategy};

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

/// Plain HTTP GET with a browser-like header set. Cheaper than rendering,
/// good enough for pages that do not build their tables in JavaScript.
pub struct HttpClient {
    inner: reqwest::Client,
    request_delay: Duration,
    max_retries: u32,
}

impl HttpClient {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static(ACCEPT_HTML));
        headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(header::UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));

        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            // Accept cookies so session-based pages work
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            inner,
            request_delay: Duration::from_millis(config.request_delay_ms),
            max_retries: config.max_retries,
        })
    }

    async fn get_once(&self, url: &str) -> Result<String, FetchError> {
        let resp = self.inner.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status { status: status.as_u16(), url: url.to_string() });
        }
        Ok(resp.text().await?)
    }

    /// Fetch a URL as text, retrying transport errors, 429 and 5xx with
    /// exponential backoff.
    pub async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        sleep(self.request_delay).await;

        let strategy = ExponentialBackoff::from_millis(2)
            .factor(250)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.max_retries as usize);

        let mut attempt = 0u32;
        RetryIf::spawn(
            strategy,
            || {
                attempt += 1;
                debug!("GET {} (attempt {})", url, attempt);
                self.get_once(url)
            },
            |e: &FetchError| {
                let retry = e.is_retryable();
                if retry {
                    warn!("GET {} failed: {}, retrying", url, e);
                }
                retry
            },
        )
        .await
    }
}

#[async_trait]
impl FetchStrategy for HttpClient {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn fetch_html(&self, url: &str) -> Result<String, FetchError> {
        self.get_text(url).await
    }
}
