//! Configuration loading and defaults.
//!
//! The worker reads one JSON file; every section falls back to defaults so
//! a missing or partial file still yields a runnable configuration.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::infrastructure::http_client::FetcherConfig;

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub http: HttpConfig,
    pub browser: BrowserConfig,
    pub batch: BatchConfig,
    pub telegram: TelegramConfig,
    pub classifier: ClassifierConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/shopscout.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
    /// Request budget per second across one worker.
    pub max_requests_per_second: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            max_requests_per_second: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Per-attempt budget for a rendered fetch, in seconds.
    pub render_timeout_seconds: u64,
    /// Render attempts before giving up on a page.
    pub render_attempts: u32,
    /// Base delay of the exponential render backoff, in milliseconds.
    pub render_backoff_base_ms: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            render_timeout_seconds: 45,
            render_attempts: 3,
            render_backoff_base_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Store passes allowed to run concurrently within one region batch.
    pub max_concurrent_stores: usize,
    /// Minimum age of a catalog row before it is refreshed, in hours.
    pub staleness_hours: i64,
    /// Default cap on candidate URLs per store import pass.
    pub default_import_limit: Option<usize>,
    /// Active-product floor used by the low-catalog audit.
    pub low_catalog_threshold: i64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_stores: 4,
            staleness_hours: 8,
            default_import_limit: None,
            low_catalog_threshold: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_api_key: Option<String>,
    pub chat_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Category classification endpoint; unset leaves products uncategorized.
    pub endpoint: Option<String>,
}

impl AppConfig {
    /// Load configuration from a JSON file, falling back to defaults when
    /// the file does not exist.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Fetcher settings assembled from the http and browser sections.
    pub fn fetcher_config(&self) -> FetcherConfig {
        FetcherConfig {
            timeout_seconds: self.http.timeout_seconds,
            max_requests_per_second: self.http.max_requests_per_second,
            render_timeout_seconds: self.browser.render_timeout_seconds,
            render_attempts: self.browser.render_attempts,
            render_backoff_base_ms: self.browser.render_backoff_base_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"http": {"timeout_seconds": 5}}"#).unwrap();
        assert_eq!(config.http.timeout_seconds, 5);
        assert_eq!(config.http.max_requests_per_second, 4);
        assert_eq!(config.batch.staleness_hours, 8);
        assert!(config.telegram.bot_api_key.is_none());
    }
}
