//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which describes one entry per crawler: how to log in, the request timeout
//! and where its session is kept.
//!
//! Configuration is stored at `~/.config/portalsync/config.json`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::FormLoginConfig;
use crate::http::{SessionSettings, DEFAULT_HTTP_TIMEOUT_SECS, USER_AGENT};

/// Application name used for config/state directory paths
const APP_NAME: &str = "portalsync";

/// Config file name
const CONFIG_FILE: &str = "config.json";

fn default_http_timeout() -> f64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub crawlers: BTreeMap<String, CrawlerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    pub login: FormLoginConfig,
    /// Username to look up in the keychain or to prompt for
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: f64,
    /// Encrypt the saved session with `PORTALSYNC_SESSION_KEY`
    #[serde(default)]
    pub encrypt_session: bool,
    /// Overrides the per-crawler directory under the user's state dir
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

impl CrawlerConfig {
    /// Request settings for this crawler.
    ///
    /// Fails when `http_timeout_secs` is negative, NaN or too large to be a
    /// `Duration`.
    pub fn session_settings(&self) -> Result<SessionSettings> {
        let timeout = Duration::try_from_secs_f64(self.http_timeout_secs).with_context(|| {
            format!("Invalid http_timeout_secs {}", self.http_timeout_secs)
        })?;
        Ok(SessionSettings {
            timeout,
            user_agent: USER_AGENT.to_string(),
        })
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn crawler(&self, name: &str) -> Result<&CrawlerConfig> {
        self.crawlers.get(name).ok_or_else(|| {
            let known: Vec<&str> = self.crawlers.keys().map(String::as_str).collect();
            anyhow::anyhow!(
                "Unknown crawler '{}' (configured: {})",
                name,
                if known.is_empty() { "none".to_string() } else { known.join(", ") }
            )
        })
    }

    /// Private state directory of one crawler
    pub fn state_dir(&self, name: &str) -> Result<PathBuf> {
        if let Some(dir) = self.crawlers.get(name).and_then(|c| c.state_dir.clone()) {
            return Ok(dir);
        }
        let base = dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .ok_or_else(|| anyhow::anyhow!("Could not find state directory"))?;
        Ok(base.join(APP_NAME).join(name))
    }
}
