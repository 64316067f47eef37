//! Pipeline: ties scraper → storage together.
//!
//! `run()` is what the scheduler calls on every cycle:
//!   1. Open the repository, apply migrations and register the configured
//!      exchanges (both optional, see `[storage]`)
//!   2. Scrape one exchange or all of them (render first, HTTP fallback)
//!   3. Persist the records grouped by exchange, one transaction per group
//!   Idempotent: re-running overwrites each `(symbol, exchange)` snapshot.

pub mod orchestrator;

use crate::config::AppConfig;
use crate::models::ScrapedTickerRecord;
use crate::scraper::PageFetcher;
use crate::storage::{Repository, persist};
use anyhow::{Context, Result};
use tracing::info;

pub use self::orchestrator::{ExchangeOrchestrator, ExchangeTarget, resolve_targets};

pub struct Pipeline {
    config: AppConfig,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn orchestrator(&self) -> Result<ExchangeOrchestrator> {
        let fetcher = PageFetcher::from_config(&self.config.scraper)
            .context("Failed to build page fetcher")?;
        let targets = resolve_targets(&self.config.scraper.base_url, &self.config.exchanges)?;
        Ok(ExchangeOrchestrator::new(
            fetcher,
            targets,
            &self.config.scraper.site_id,
            self.config.pipeline.concurrency,
        ))
    }

    /// Scrape without touching storage.
    pub async fn scrape(&self, exchange: Option<&str>) -> Result<Vec<ScrapedTickerRecord>> {
        Ok(self.orchestrator()?.scrape(exchange).await)
    }

    pub async fn run(&self, exchange: Option<&str>) -> Result<PipelineStats> {
        let repo = Repository::open(&self.config.storage.db_path)
            .context("Failed to open DuckDB")?;

        if self.config.storage.run_migrations {
            repo.run_migrations()?;
        }
        if self.config.storage.seed_exchanges {
            let n = repo.register_exchanges(&self.config.exchanges)?;
            info!("{} exchanges registered", n);
        }

        let orchestrator = self.orchestrator()?;
        let exchanges = orchestrator.selected_targets(exchange).len();
        let run_id = repo.begin_scrape_run(exchange).unwrap_or(0);

        info!("=== Step 1: Scraping {} exchange(s) ===", exchanges);
        let records = orchestrator.scrape(exchange).await;

        info!("=== Step 2: Persisting {} records ===", records.len());
        let persisted = persist(&repo, &records);

        let stats = PipelineStats {
            exchanges,
            records_scraped: records.len(),
            records_persisted: persisted,
        };

        let skipped = stats.records_scraped.saturating_sub(stats.records_persisted);
        let note = (skipped > 0).then(|| format!("{} records not persisted", skipped));
        repo.finish_scrape_run(
            run_id,
            stats.records_scraped,
            stats.records_persisted,
            note.as_deref(),
        ).ok();

        info!("=== Done: {} exchanges | {} scraped | {} persisted ===",
            stats.exchanges, stats.records_scraped, stats.records_persisted,
        );

        Ok(stats)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStats {
    pub exchanges: usize,
    pub records_scraped: usize,
    pub records_persisted: usize,
}
