//! Configuration Module
//!
//! This module defines all configuration structures for the signing service.
//! Configuration is loaded from TOML files and parsed using serde.

use serde::Deserialize;
use std::fs;
use std::time::Duration;

/// Main configuration structure
///
/// Contains all configuration sections for the service.
/// Loaded from a TOML file (e.g., config/default.toml).
///
/// # Example TOML
/// ```toml
/// [authority]
/// base_url = "https://api-partners.didox.uz"
/// timestamp_url = "https://api-partners.didox.uz"
/// partner_token = "..."
///
/// [queue]
/// concurrency = 5
/// max_attempts = 3
/// backoff_base_ms = 5000
///
/// [api]
/// host = "127.0.0.1"
/// port = 8600
///
/// [database]
/// url = "sqlite://docsign.db"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub authority: AuthorityConfig,
    #[serde(default)]
    pub token: TokenConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    pub api: ApiConfig,
    pub database: DatabaseConfig,
}

/// Document authority connection settings
///
/// # Fields
/// - `base_url`: Partner API root (documents, auth, signing)
/// - `timestamp_url`: Root of the timestamping service used during proof exchange
/// - `partner_token`: Partner credential sent with every document call
/// - `timeout_ms`: Per-request timeout
/// - `locale`: Locale passed to token exchange and `Accept-Language`
#[derive(Clone, Deserialize)]
pub struct AuthorityConfig {
    pub base_url: String,
    pub timestamp_url: String,
    #[serde(default)]
    pub partner_token: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_locale")]
    pub locale: String,
}

impl std::fmt::Debug for AuthorityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorityConfig")
            .field("base_url", &self.base_url)
            .field("timestamp_url", &self.timestamp_url)
            .field("partner_token", &"<redacted>")
            .field("timeout_ms", &self.timeout_ms)
            .field("locale", &self.locale)
            .finish()
    }
}

/// Session token settings
///
/// The authority issues tokens valid for about six hours.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub ttl_minutes: i64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self { ttl_minutes: 360 }
    }
}

/// Signing queue settings
///
/// # Fields
/// - `concurrency`: Number of jobs in flight at once
/// - `max_attempts`: Delivery attempts before a job is dead-lettered
/// - `backoff_base_ms`: Delay before the first retry; doubles on each further retry
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    pub concurrency: usize,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            max_attempts: 3,
            backoff_base_ms: 5000,
        }
    }
}

impl QueueConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

/// Batch signing settings
///
/// `throttle_ms` is the pause between two documents so the local signing
/// device's transport is not flooded.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    pub throttle_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { throttle_ms: 250 }
    }
}

/// Status synchronization paging defaults
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    pub default_limit: u32,
    pub max_limit: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_limit: 50,
            max_limit: 100,
        }
    }
}

/// API server configuration
///
/// Controls the JSON-RPC API endpoint settings.
///
/// # Fields
/// - `host`: IP address to bind to (e.g., "127.0.0.1" or "0.0.0.0")
/// - `port`: TCP port to listen on
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
///
/// # Fields
/// - `url`: Database connection URL (e.g., "sqlite://docsign.db")
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_locale() -> String {
    "ru".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    /// * `path` - Path to the TOML configuration file
    ///
    /// # Returns
    /// * `Ok(Config)` if the file was successfully loaded and parsed
    /// * `Err` if the file couldn't be read or the TOML is invalid
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }
}
