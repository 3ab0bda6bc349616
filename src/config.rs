//! Configuration loader and validator for the Shopify→Hanteo sync service.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub shopify: Shopify,
    pub hanteo: Hanteo,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub bind_addr: String,
    /// Cadence of the periodic recent-order sweep.
    pub sweep_interval_secs: u64,
    /// Update-time window the periodic sweep looks back over.
    pub sweep_hours_ago: i64,
    /// Page size / per-sweep order ceiling passed to the order listing.
    pub sweep_limit: u32,
    /// Catalog snapshots older than this are rebuilt before a sweep.
    pub catalog_max_age_secs: u64,
    pub request_timeout_secs: u64,
}

/// Shopify shop settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Shopify {
    pub shop_url: String,
    pub access_token: String,
    pub api_version: String,
    pub webhook_secret: String,
    /// Comma-delimited tags marking a product as a reportable album.
    pub album_tags: String,
    pub page_size: u32,
}

/// Hanteo chart API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Hanteo {
    pub base_url: String,
    pub client_key: String,
    pub family_code: i64,
    pub branch_code: i64,
    /// Ceiling on records per bulk-collect call. Hanteo rejects more than 100.
    pub max_batch_size: usize,
    /// Pause between sequential chunks, to stay under Hanteo's own rate limit.
    pub chunk_delay_ms: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.bind_addr.trim().is_empty() {
        return Err(ConfigError::Invalid("app.bind_addr must be non-empty"));
    }
    if cfg.app.sweep_interval_secs == 0 {
        return Err(ConfigError::Invalid("app.sweep_interval_secs must be > 0"));
    }
    if cfg.app.sweep_hours_ago <= 0 {
        return Err(ConfigError::Invalid("app.sweep_hours_ago must be > 0"));
    }
    if cfg.app.sweep_limit == 0 {
        return Err(ConfigError::Invalid("app.sweep_limit must be > 0"));
    }
    if cfg.app.request_timeout_secs == 0 {
        return Err(ConfigError::Invalid("app.request_timeout_secs must be > 0"));
    }

    if cfg.shopify.shop_url.trim().is_empty() {
        return Err(ConfigError::Invalid("shopify.shop_url must be non-empty"));
    }
    if cfg.shopify.access_token.trim().is_empty() {
        return Err(ConfigError::Invalid("shopify.access_token must be non-empty"));
    }
    if cfg.shopify.api_version.trim().is_empty() {
        return Err(ConfigError::Invalid("shopify.api_version must be non-empty"));
    }
    if cfg.shopify.webhook_secret.trim().is_empty() {
        return Err(ConfigError::Invalid("shopify.webhook_secret must be non-empty"));
    }
    if cfg.shopify.album_tags.split(',').all(|t| t.trim().is_empty()) {
        return Err(ConfigError::Invalid("shopify.album_tags must name at least one tag"));
    }
    if cfg.shopify.page_size == 0 || cfg.shopify.page_size > 250 {
        return Err(ConfigError::Invalid("shopify.page_size must be in 1..=250"));
    }

    if cfg.hanteo.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("hanteo.base_url must be non-empty"));
    }
    if cfg.hanteo.client_key.trim().is_empty() {
        return Err(ConfigError::Invalid("hanteo.client_key must be non-empty"));
    }
    if cfg.hanteo.family_code <= 0 {
        return Err(ConfigError::Invalid("hanteo.family_code must be > 0"));
    }
    if cfg.hanteo.branch_code <= 0 {
        return Err(ConfigError::Invalid("hanteo.branch_code must be > 0"));
    }
    if cfg.hanteo.max_batch_size == 0 || cfg.hanteo.max_batch_size > 100 {
        return Err(ConfigError::Invalid("hanteo.max_batch_size must be in 1..=100"));
    }
    if cfg.hanteo.max_retries == 0 {
        return Err(ConfigError::Invalid("hanteo.max_retries must be > 0"));
    }
    if cfg.hanteo.initial_backoff_ms == 0 {
        return Err(ConfigError::Invalid("hanteo.initial_backoff_ms must be > 0"));
    }
    if cfg.hanteo.max_backoff_ms < cfg.hanteo.initial_backoff_ms {
        return Err(ConfigError::Invalid(
            "hanteo.max_backoff_ms must be >= hanteo.initial_backoff_ms",
        ));
    }

    Ok(())
}

/// Example YAML configuration, also used as the config-test fixture.
pub fn example() -> &'static str {
    r#"app:
  bind_addr: "0.0.0.0:8080"
  sweep_interval_secs: 600
  sweep_hours_ago: 24
  sweep_limit: 250
  catalog_max_age_secs: 3600
  request_timeout_secs: 30

shopify:
  shop_url: "https://your-shop.myshopify.com"
  access_token: "YOUR_SHOPIFY_ADMIN_TOKEN"
  api_version: "2024-01"
  webhook_secret: "YOUR_WEBHOOK_SECRET"
  album_tags: "album,kpop-album"
  page_size: 250

hanteo:
  base_url: "https://api.hanteochart.io"
  client_key: "YOUR_HANTEO_CLIENT_KEY"
  family_code: 1000
  branch_code: 1
  max_batch_size: 100
  chunk_delay_ms: 1000
  max_retries: 3
  initial_backoff_ms: 500
  max_backoff_ms: 10000
"#
}
