use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default = "default_exchanges")]
    pub exchanges: Vec<ExchangeConfig>,
}

/// Scraper configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    /// Provenance prefix stamped on every record (`<site_id>/<exchange>`).
    #[serde(default = "default_site_id")]
    pub site_id: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default)]
    pub render: RenderConfig,
}

/// Headless browser rendering
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RenderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_browser_path")]
    pub browser_path: PathBuf,

    #[serde(default = "default_navigation_timeout_secs")]
    pub navigation_timeout_secs: u64,

    #[serde(default = "default_table_wait_secs")]
    pub table_wait_secs: u64,

    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,

    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,

    /// Needed when running as root inside containers.
    #[serde(default)]
    pub no_sandbox: bool,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,

    /// Register every configured exchange in the registry before persisting.
    #[serde(default = "default_true")]
    pub seed_exchanges: bool,
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Exchanges fetched in parallel.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

/// One supported exchange and the path of its listing page under `base_url`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ExchangeConfig {
    pub code: String,
    pub name: String,
    pub path: String,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_site_id() -> String {
    "african-markets".to_string()
}
fn default_base_url() -> String {
    "https://www.african-markets.com/en/stock-markets/".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_request_delay_ms() -> u64 {
    500
}
fn default_max_retries() -> u32 {
    3
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/129.0.0.0 Safari/537.36"
        .to_string()
}
fn default_browser_path() -> PathBuf {
    PathBuf::from("chromium")
}
fn default_navigation_timeout_secs() -> u64 {
    30
}
fn default_table_wait_secs() -> u64 {
    10
}
fn default_viewport_width() -> u32 {
    1920
}
fn default_viewport_height() -> u32 {
    1080
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/afx.duckdb")
}
fn default_true() -> bool {
    true
}
fn default_concurrency() -> usize {
    4
}

fn exchange(code: &str, name: &str, path: &str) -> ExchangeConfig {
    ExchangeConfig { code: code.into(), name: name.into(), path: path.into() }
}

fn default_exchanges() -> Vec<ExchangeConfig> {
    vec![
        exchange("JSE", "Johannesburg Stock Exchange", "jse/listed-companies"),
        exchange("ZSE", "Zimbabwe Stock Exchange", "zse/listed-companies"),
        exchange("NGX", "Nigerian Exchange", "ngse/listed-companies"),
        exchange("GSE", "Ghana Stock Exchange", "gse/listed-companies"),
        exchange("NSE", "Nairobi Securities Exchange", "nse/listed-companies"),
        exchange("BRVM", "Bourse Regionale des Valeurs Mobilieres", "brvm/listed-companies"),
        exchange("BSE", "Botswana Stock Exchange", "bse/listed-companies"),
        exchange("LUSE", "Lusaka Securities Exchange", "luse/listed-companies"),
        exchange("DSE", "Dar es Salaam Stock Exchange", "dse/listed-companies"),
        exchange("USE", "Uganda Securities Exchange", "use/listed-companies"),
    ]
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            site_id: default_site_id(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            request_delay_ms: default_request_delay_ms(),
            max_retries: default_max_retries(),
            user_agent: default_user_agent(),
            render: RenderConfig::default(),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            browser_path: default_browser_path(),
            navigation_timeout_secs: default_navigation_timeout_secs(),
            table_wait_secs: default_table_wait_secs(),
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            no_sandbox: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            run_migrations: true,
            seed_exchanges: true,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { concurrency: default_concurrency() }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scraper: ScraperConfig::default(),
            storage: StorageConfig::default(),
            pipeline: PipelineConfig::default(),
            exchanges: default_exchanges(),
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("AFX").separator("__"))
            .build()?;

        let app_cfg: AppConfig = cfg.try_deserialize().unwrap_or_else(|e| {
            warn!("Invalid configuration ({}), using defaults", e);
            AppConfig::default()
        });
        Ok(app_cfg)
    }

    pub fn exchange(&self, code: &str) -> Option<&ExchangeConfig> {
        self.exchanges.iter().find(|e| e.code.eq_ignore_ascii_case(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_ten_exchanges() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.exchanges.len(), 10);
        assert_eq!(cfg.exchange("jse").map(|e| e.code.as_str()), Some("JSE"));
        assert!(cfg.exchange("XYZ").is_none());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(
                "[pipeline]\nconcurrency = 1\n[scraper.render]\nenabled = false\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.pipeline.concurrency, 1);
        assert!(!cfg.scraper.render.enabled);
        assert_eq!(cfg.scraper.render.table_wait_secs, 10);
        assert_eq!(cfg.scraper.site_id, "african-markets");
        assert_eq!(cfg.exchanges.len(), 10);
    }
}
