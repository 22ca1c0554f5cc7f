use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// Key-value state backend (checkpoints + result cache)
    pub state: StateConfig,

    /// Relational source backend
    #[serde(default)]
    pub source: SourceConfig,

    /// Search index configuration
    pub search: SearchConfig,

    /// Sync pipeline configuration
    pub sync: SyncConfig,

    /// Cache TTL configuration
    pub cache: CacheConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/default.toml".to_string());

        config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            // Override with config file if it exists
            .add_source(config::File::with_name(&config_path).required(false))
            // Override with environment variables (prefix: PROSPECT_SEARCH_)
            .add_source(
                config::Environment::with_prefix("PROSPECT_SEARCH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Request timeout (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Key-value backend type
    #[serde(default)]
    pub backend: StateBackend,

    /// Path for the embedded database (sled)
    pub path: Option<PathBuf>,

    /// Redis connection string
    pub redis_url: Option<String>,

    /// Prefix for every key written by this service
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StateBackend {
    #[default]
    Memory,
    Sled,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SourceConfig {
    /// Relational source backend type
    #[serde(default)]
    pub backend: SourceBackend,
}

/// The relational store is an external collaborator; the in-memory backend
/// serves local mode and tests. Production deployments implement the
/// `RelationalStore` trait against their database.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SourceBackend {
    #[default]
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Path to the search index directory
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,

    /// Index writer heap size in bytes
    #[serde(default = "default_writer_heap_size")]
    pub writer_heap_size: usize,

    /// Hard cap on page size
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,

    /// Page size used when the request does not specify one
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,

    /// Candidate pool size for suggestion queries
    #[serde(default = "default_suggest_oversample")]
    pub suggest_oversample: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            index_path: default_index_path(),
            writer_heap_size: default_writer_heap_size(),
            max_page_size: default_max_page_size(),
            default_page_size: default_page_size(),
            suggest_oversample: default_suggest_oversample(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Run the change-capture listener loop
    #[serde(default = "default_true")]
    pub listener_enabled: bool,

    /// Run the periodic denormalization refresher loop
    #[serde(default = "default_true")]
    pub refresher_enabled: bool,

    /// Maximum change events per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Listener poll interval when the stream is idle (seconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Refresher interval (seconds)
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// Max index-write attempts per batch before the health alarm
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff between attempts (seconds, doubled per attempt)
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            listener_enabled: true,
            refresher_enabled: true,
            batch_size: default_batch_size(),
            poll_interval_secs: default_poll_interval(),
            refresh_interval_secs: default_refresh_interval(),
            max_retries: default_max_retries(),
            retry_backoff_secs: default_retry_backoff(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Serve search results through the result cache
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Result cache TTL (seconds). This is the only invalidation mechanism:
    /// results may be stale by up to sync lag + this TTL.
    #[serde(default = "default_result_ttl")]
    pub result_ttl_secs: u64,

    /// Suggestion cache TTL (seconds)
    #[serde(default = "default_suggest_ttl")]
    pub suggest_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            result_ttl_secs: default_result_ttl(),
            suggest_ttl_secs: default_suggest_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub prometheus_enabled: bool,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
}

fn default_key_prefix() -> String {
    "prospect-search".to_string()
}

fn default_index_path() -> PathBuf {
    PathBuf::from("./data/search_index")
}

fn default_writer_heap_size() -> usize {
    50_000_000 // 50MB
}

fn default_max_page_size() -> usize {
    100
}

fn default_page_size() -> usize {
    25
}

fn default_suggest_oversample() -> usize {
    200
}

fn default_batch_size() -> usize {
    500
}

fn default_poll_interval() -> u64 {
    2
}

fn default_refresh_interval() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_backoff() -> u64 {
    1
}

fn default_result_ttl() -> u64 {
    30
}

fn default_suggest_ttl() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        assert_eq!(default_http_port(), 8080);
        assert_eq!(default_page_size(), 25);
        assert_eq!(default_result_ttl(), 30);
        assert!(default_suggest_ttl() > default_result_ttl());
        assert!(default_true());
    }

    #[test]
    fn test_state_backend_default() {
        assert_eq!(StateBackend::default(), StateBackend::Memory);
    }
}
