//! JavaScript-capable rendering through a headless Chromium process.
//!
//! Every render gets its own browser process and a throw-away profile
//! directory, so no cookies or cache leak between pages. The child is
//! killed when its handle is dropped and the profile is deleted when the
//! `TempDir` is dropped; both happen on every exit path, timeouts included.

use crate::config::{RenderConfig, ScraperConfig};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::{FetchError, FetchStrategy};

pub struct ChromeRenderer {
    enabled: bool,
    binary: PathBuf,
    user_agent: String,
    viewport: (u32, u32),
    navigation_timeout: Duration,
    table_wait: Duration,
    no_sandbox: bool,
}

impl ChromeRenderer {
    pub fn new(config: &ScraperConfig) -> Self {
        let RenderConfig {
            enabled,
            browser_path,
            navigation_timeout_secs,
            table_wait_secs,
            viewport_width,
            viewport_height,
            no_sandbox,
        } = &config.render;

        Self {
            enabled: *enabled,
            binary: browser_path.clone(),
            user_agent: config.user_agent.clone(),
            viewport: (*viewport_width, *viewport_height),
            navigation_timeout: Duration::from_secs(*navigation_timeout_secs),
            table_wait: Duration::from_secs(*table_wait_secs),
            no_sandbox: *no_sandbox,
        }
    }

    fn args(&self, profile_dir: &std::path::Path, url: &str) -> Vec<String> {
        let mut args = vec![
            "--headless=new".to_string(),
            "--disable-gpu".to_string(),
            "--disable-extensions".to_string(),
            "--no-first-run".to_string(),
            "--no-default-browser-check".to_string(),
            format!("--user-data-dir={}", profile_dir.display()),
            format!("--user-agent={}", self.user_agent),
            format!("--window-size={},{}", self.viewport.0, self.viewport.1),
            format!("--timeout={}", self.navigation_timeout.as_millis()),
            // lets scripts and network settle before the DOM is dumped
            format!("--virtual-time-budget={}", self.table_wait.as_millis()),
            "--dump-dom".to_string(),
        ];
        if self.no_sandbox {
            args.push("--no-sandbox".to_string());
        }
        args.push(url.to_string());
        args
    }

    pub async fn render(&self, url: &str) -> Result<String, FetchError> {
        if !self.enabled {
            return Err(FetchError::RendererUnavailable("rendering disabled".into()));
        }

        let profile = tempfile::Builder::new().prefix("afx-render-").tempdir()?;

        let child = Command::new(&self.binary)
            .args(self.args(profile.path(), url))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                    FetchError::RendererUnavailable(format!("{}: {}", self.binary.display(), e))
                }
                _ => FetchError::Io(e),
            })?;

        let budget = self.navigation_timeout + self.table_wait;
        debug!("Rendering {} (budget {:?})", url, budget);

        let output = timeout(budget, child.wait_with_output())
            .await
            .map_err(|_| FetchError::Timeout(budget))??;

        if !output.status.success() {
            return Err(FetchError::RendererFailed(output.status.to_string()));
        }

        let html = String::from_utf8_lossy(&output.stdout).into_owned();
        if !contains_table(&html) {
            return Err(FetchError::NoTable(self.table_wait));
        }
        Ok(html)
    }
}

fn contains_table(html: &str) -> bool {
    html.to_ascii_lowercase().contains("<table")
}

#[async_trait]
impl FetchStrategy for ChromeRenderer {
    fn name(&self) -> &'static str {
        "render"
    }

    async fn fetch_html(&self, url: &str) -> Result<String, FetchError> {
        self.render(url).await
    }
}
