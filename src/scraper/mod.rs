pub mod extractors;
pub mod http_client;
pub mod parsers;
pub mod renderer;

use crate::config::ScraperConfig;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scraper::Html;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use self::http_client::HttpClient;
use self::renderer::ChromeRenderer;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("renderer unavailable: {0}")]
    RendererUnavailable(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("renderer exited with {0}")]
    RendererFailed(String),

    #[error("no <table> appeared within {0:?}")]
    NoTable(Duration),

    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// Worth another attempt with the same strategy.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Request(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

// ── Strategy trait ────────────────────────────────────────────────────────────

/// One way of obtaining a page's HTML.
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    async fn fetch_html(&self, url: &str) -> Result<String, FetchError>;
}

// ── Fetched page ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub html: String,
    pub strategy: &'static str,
    pub fetched_at: DateTime<Utc>,
}

impl FetchedPage {
    pub fn document(&self) -> Html {
        Html::parse_document(&self.html)
    }
}

// ── Fetcher ───────────────────────────────────────────────────────────────────

/// Tries each strategy in order and keeps the first non-empty page.
pub struct PageFetcher {
    strategies: Vec<Box<dyn FetchStrategy>>,
}

impl PageFetcher {
    pub fn new(strategies: Vec<Box<dyn FetchStrategy>>) -> Self {
        Self { strategies }
    }

    /// Headless render first, plain HTTP as fallback.
    pub fn from_config(config: &ScraperConfig) -> Result<Self> {
        Ok(Self::new(vec![
            Box::new(ChromeRenderer::new(config)),
            Box::new(HttpClient::new(config)?),
        ]))
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// `None` when no strategy produced content; failures are logged here
    /// and never returned.
    pub async fn fetch(&self, url: &str) -> Option<FetchedPage> {
        for strategy in &self.strategies {
            match strategy.fetch_html(url).await {
                Ok(html) if !html.trim().is_empty() => {
                    debug!("{}: fetched via {} ({} bytes)", url, strategy.name(), html.len());
                    return Some(FetchedPage {
                        url: url.to_string(),
                        html,
                        strategy: strategy.name(),
                        fetched_at: Utc::now(),
                    });
                }
                Ok(_) => debug!("{}: {} returned an empty body", url, strategy.name()),
                Err(FetchError::RendererUnavailable(why)) => {
                    debug!("{}: {} unavailable ({})", url, strategy.name(), why)
                }
                Err(e) => warn!("{}: {} failed: {}", url, strategy.name(), e),
            }
        }

        warn!("{}: no document from any strategy", url);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Strategy returning a fixed outcome and counting its calls.
    struct Canned {
        name: &'static str,
        html: Option<&'static str>,
        calls: Arc<AtomicUsize>,
    }

    impl Canned {
        fn ok(name: &'static str, html: &'static str) -> Self {
            Self { name, html: Some(html), calls: Arc::default() }
        }

        fn failing(name: &'static str) -> Self {
            Self { name, html: None, calls: Arc::default() }
        }
    }

    #[async_trait]
    impl FetchStrategy for Canned {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn fetch_html(&self, _url: &str) -> Result<String, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.html {
                Some(html) => Ok(html.to_string()),
                None => Err(FetchError::Timeout(Duration::from_secs(1))),
            }
        }
    }

    #[tokio::test]
    async fn render_result_preferred() {
        let http = Canned::ok("http", "<table>http</table>");
        let http_calls = Arc::clone(&http.calls);
        let fetcher = PageFetcher::new(vec![
            Box::new(Canned::ok("render", "<table>render</table>")),
            Box::new(http),
        ]);

        let page = fetcher.fetch("https://x").await.unwrap();
        assert_eq!(page.strategy, "render");
        assert!(page.html.contains("render"));
        assert_eq!(http_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn falls_back_when_render_fails() {
        let fetcher = PageFetcher::new(vec![
            Box::new(Canned::failing("render")),
            Box::new(Canned::ok("http", "<table>http</table>")),
        ]);
        let page = fetcher.fetch("https://x").await.unwrap();
        assert_eq!(page.strategy, "http");
    }

    #[tokio::test]
    async fn empty_body_falls_through() {
        let fetcher = PageFetcher::new(vec![
            Box::new(Canned::ok("render", "   ")),
            Box::new(Canned::ok("http", "<p>ok</p>")),
        ]);
        assert_eq!(fetcher.fetch("https://x").await.unwrap().strategy, "http");
    }

    #[test]
    fn no_document_when_all_fail() {
        let fetcher = PageFetcher::new(vec![
            Box::new(Canned::failing("render")),
            Box::new(Canned::failing("http")),
        ]);
        assert!(tokio_test::block_on(fetcher.fetch("https://x")).is_none());
    }

    #[test]
    fn retry_classification() {
        let status = |s| FetchError::Status { status: s, url: "u".into() };
        assert!(status(429).is_retryable());
        assert!(status(503).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(!FetchError::NoTable(Duration::from_secs(1)).is_retryable());
    }

    #[test]
    fn default_strategy_order() {
        let fetcher = PageFetcher::from_config(&ScraperConfig::default()).unwrap();
        assert_eq!(fetcher.strategy_names(), vec!["render", "http"]);
    }
}
