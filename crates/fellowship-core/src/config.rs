//! Application configuration management.
//!
//! This module handles loading and saving the host configuration: backend
//! location and credentials, the last signed-in identity, and background
//! timing knobs.
//!
//! Configuration is stored at `~/.config/fellowship/config.json`. The
//! staleness window and maximum queue age are fixed and not configurable.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::client::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::scheduler::DEFAULT_TICK_INTERVAL_SECS;

/// Application name used for config/data directory paths
const APP_NAME: &str = "fellowship";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment overrides
const ENV_API_URL: &str = "FELLOWSHIP_API_URL";
const ENV_API_TOKEN: &str = "FELLOWSHIP_API_TOKEN";
const ENV_IDENTITY: &str = "FELLOWSHIP_IDENTITY";

/// Delay before the first background sync after mount.
const DEFAULT_STARTUP_SYNC_DELAY_SECS: u64 = 3;

/// How often connectivity is re-checked (and queues drained).
const DEFAULT_CONNECTIVITY_CHECK: &str = "*/5 * * * *";

fn default_tick_interval_secs() -> u64 {
    DEFAULT_TICK_INTERVAL_SECS
}

fn default_startup_sync_delay_secs() -> u64 {
    DEFAULT_STARTUP_SYNC_DELAY_SECS
}

fn default_connectivity_check() -> String {
    DEFAULT_CONNECTIVITY_CHECK.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default)]
    pub last_identity: Option<String>,
    /// Override for where cache and queues are stored
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_startup_sync_delay_secs")]
    pub startup_sync_delay_secs: u64,
    /// Cron-style schedule for the connectivity check task
    #[serde(default = "default_connectivity_check")]
    pub connectivity_check: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: None,
            api_token: None,
            last_identity: None,
            data_dir: None,
            tick_interval_secs: default_tick_interval_secs(),
            startup_sync_delay_secs: default_startup_sync_delay_secs(),
            connectivity_check: default_connectivity_check(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply `FELLOWSHIP_*` environment variables on top of the file values
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(ENV_API_URL) {
            self.api_base_url = Some(url);
        }
        if let Ok(token) = std::env::var(ENV_API_TOKEN) {
            self.api_token = Some(token);
        }
        if let Ok(identity) = std::env::var(ENV_IDENTITY) {
            self.last_identity = Some(identity);
        }
        self
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory for the durable store
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.data_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    pub fn startup_sync_delay(&self) -> Duration {
        Duration::from_secs(self.startup_sync_delay_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}
