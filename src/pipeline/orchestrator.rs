//! Exchange orchestrator: fetch → parse for one or every configured exchange.
//!
//! Exchanges share nothing, so each one runs as its own task (bounded by a
//! semaphore). A failed fetch or a panicking parse costs that exchange its
//! records and nothing else.

use crate::config::ExchangeConfig;
use crate::models::{ScrapedTickerRecord, source_tag};
use crate::scraper::parsers::{RowContext, parse_tables};
use crate::scraper::{FetchedPage, PageFetcher};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use url::Url;

/// An exchange with its fully resolved listing-page URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeTarget {
    pub code: String,
    pub name: String,
    pub url: String,
}

/// Resolve every configured path against `base_url`.
pub fn resolve_targets(base_url: &str, exchanges: &[ExchangeConfig]) -> Result<Vec<ExchangeTarget>> {
    let base = if base_url.ends_with('/') {
        base_url.to_string()
    } else {
        format!("{}/", base_url)
    };
    let base = Url::parse(&base).with_context(|| format!("Invalid base URL {}", base_url))?;

    exchanges
        .iter()
        .map(|e| {
            let url = base
                .join(e.path.trim_start_matches('/'))
                .with_context(|| format!("Invalid listing path for {}: {}", e.code, e.path))?;
            Ok(ExchangeTarget {
                code: e.code.to_uppercase(),
                name: e.name.clone(),
                url: url.to_string(),
            })
        })
        .collect()
}

pub struct ExchangeOrchestrator {
    fetcher: Arc<PageFetcher>,
    targets: Arc<[ExchangeTarget]>,
    site_id: Arc<str>,
    concurrency: usize,
}

impl ExchangeOrchestrator {
    pub fn new(
        fetcher: PageFetcher,
        targets: Vec<ExchangeTarget>,
        site_id: &str,
        concurrency: usize,
    ) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            targets: targets.into(),
            site_id: site_id.into(),
            concurrency: concurrency.max(1),
        }
    }

    pub fn targets(&self) -> &[ExchangeTarget] {
        &self.targets
    }

    /// Targets that `scrape(exchange)` covers; empty for an unknown code.
    pub fn selected_targets(&self, exchange: Option<&str>) -> Vec<&ExchangeTarget> {
        self.targets
            .iter()
            .filter(|t| exchange.is_none_or(|code| t.code.eq_ignore_ascii_case(code)))
            .collect()
    }

    /// One named exchange, or every target when `exchange` is `None`.
    pub async fn scrape(&self, exchange: Option<&str>) -> Vec<ScrapedTickerRecord> {
        match exchange {
            Some(code) => self.scrape_exchange(code).await,
            None => self.scrape_all().await,
        }
    }

    pub async fn scrape_exchange(&self, code: &str) -> Vec<ScrapedTickerRecord> {
        let Some(target) = self.targets.iter().find(|t| t.code.eq_ignore_ascii_case(code)) else {
            warn!("{}: not a configured exchange", code);
            return vec![];
        };
        self.run(vec![target.clone()]).await
    }

    pub async fn scrape_all(&self) -> Vec<ScrapedTickerRecord> {
        self.run(self.targets.to_vec()).await
    }

    async fn run(&self, targets: Vec<ExchangeTarget>) -> Vec<ScrapedTickerRecord> {
        let sem = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(targets.len());

        for target in targets {
            let fetcher = Arc::clone(&self.fetcher);
            let sem = Arc::clone(&sem);
            let site_id = Arc::clone(&self.site_id);
            let code = target.code.clone();

            let handle = tokio::spawn(async move {
                let Ok(_permit) = sem.acquire().await else {
                    return Vec::new();
                };
                scrape_target(&fetcher, &target, &site_id).await
            });

            handles.push((code, handle));
        }

        let mut records = Vec::new();
        let mut failed = 0usize;

        for (code, handle) in handles {
            match handle.await {
                Ok(batch) => records.extend(batch),
                Err(e) => {
                    error!("{}: scrape task failed: {}", code, e);
                    failed += 1;
                }
            }
        }

        info!("Scraped {} records ({} exchanges failed)", records.len(), failed);
        records
    }
}

async fn scrape_target(
    fetcher: &PageFetcher,
    target: &ExchangeTarget,
    site_id: &str,
) -> Vec<ScrapedTickerRecord> {
    let Some(page) = fetcher.fetch(&target.url).await else {
        warn!("{}: no page, skipping", target.code);
        return Vec::new();
    };

    let records = parse_page(&page, site_id, &target.code);
    if records.is_empty() {
        warn!("{}: no ticker rows recognised on {}", target.code, page.url);
    } else {
        info!("{}: {} tickers (via {})", target.code, records.len(), page.strategy);
    }
    records
}

fn parse_page(page: &FetchedPage, site_id: &str, code: &str) -> Vec<ScrapedTickerRecord> {
    let ctx = RowContext {
        source: source_tag(site_id, code),
        captured_at: page.fetched_at,
    };
    parse_tables(&page.document(), &ctx)
}
