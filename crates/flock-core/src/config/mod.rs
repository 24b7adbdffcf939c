//! Application configuration with layered loading.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: Hardcoded in struct `Default` implementations
//! 2. **Config file**: TOML file specified by `FLOCK_CONFIG` env var
//! 3. **Environment variables**: `FLOCK__*` env vars override specific fields
//! 4. **`HEADERS`**: extra upstream headers as `Key=Value` lines, merged into `node.headers`
//!
//! # Configuration Sections
//!
//! - [`ServerConfig`]: HTTP server settings (bind address, limits)
//! - [`NodeConfig`]: the upstream node and how to reach it
//! - [`RoutesConfig`]: inbound paths that qualify methods with an endpoint prefix
//! - [`StoreConfig`]: location of the redb file
//! - [`FinalityConfig`]: watermark poll interval
//! - [`SyncConfig`]: backfill tuning
//! - [`InfoConfig`]: rewriting of the node status document served on `GET /`
//! - [`MetricsConfig`] / [`LoggingConfig`]
//!
//! # Example
//!
//! ```toml
//! [server]
//! bind_port = 8080
//!
//! [node]
//! url = "https://engine.example.com/"
//! headers = { "x-api-key" = "secret" }
//!
//! [sync]
//! window_size = 100
//! ```

use crate::{sync::BackfillConfig, upstream::worst_case_duration};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path, time::Duration};

/// HTTP server configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// IP address to bind the server to. Defaults to `0.0.0.0`.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port number to listen on. Must be greater than 0. Defaults to `8080`.
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,

    /// Maximum number of concurrent RPC requests. Defaults to `256`.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Request timeout in seconds. Defaults to `30`.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    /// Largest accepted request body. Defaults to 1 MiB.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_bind_port() -> u16 {
    8080
}

fn default_max_concurrent_requests() -> usize {
    256
}

fn default_request_timeout_seconds() -> u64 {
    30
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

/// The upstream node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Base URL. JSON-RPC batches are posted here.
    #[serde(default = "default_node_url")]
    pub url: String,

    /// Path of the status document, relative to `url`. Empty means `url` itself.
    #[serde(default)]
    pub info_path: String,

    #[serde(default = "default_node_timeout_seconds")]
    pub timeout_seconds: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Extra headers sent with every upstream request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_node_url() -> String {
    "http://127.0.0.1:5000/".to_string()
}

fn default_node_timeout_seconds() -> u64 {
    9
}

fn default_user_agent() -> String {
    concat!("flock/", env!("CARGO_PKG_VERSION")).to_string()
}

/// Inbound paths whose requests are qualified with an endpoint prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutesConfig {
    #[serde(default = "default_blockchain_path")]
    pub blockchain_path: String,

    #[serde(default = "default_contracts_path")]
    pub contracts_path: String,
}

fn default_blockchain_path() -> String {
    "/blockchain".to_string()
}

fn default_contracts_path() -> String {
    "/contracts".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_path() -> String {
    "data/flock.redb".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalityConfig {
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
}

fn default_poll_interval_seconds() -> u64 {
    3
}

/// Backfill tuning. See [`BackfillConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_window_size")]
    pub window_size: u64,

    #[serde(default = "default_safety_margin")]
    pub safety_margin: u64,

    #[serde(default = "default_window_delay_ms")]
    pub window_delay_ms: u64,

    #[serde(default = "default_idle_interval_seconds")]
    pub idle_interval_seconds: u64,
}

fn default_true() -> bool {
    true
}

fn default_window_size() -> u64 {
    100
}

fn default_safety_margin() -> u64 {
    100
}

fn default_window_delay_ms() -> u64 {
    100
}

fn default_idle_interval_seconds() -> u64 {
    3
}

/// Rewriting applied to the node status document served on `GET /`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InfoConfig {
    /// Replaces the node's `domain` field.
    #[serde(default)]
    pub public_domain: Option<String>,

    /// Appended to `disabledMethods.message`.
    #[serde(default)]
    pub notice: Option<String>,
}

/// Prometheus metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (`trace`, `debug`, `info`, `warn`, `error`). Defaults to `"info"`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: `"json"` or `"pretty"`. Defaults to `"pretty"`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Deployment environment (e.g., "development", "production"). Defaults to `"development"`.
    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub node: NodeConfig,

    #[serde(default)]
    pub routes: RoutesConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub finality: FinalityConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub info: InfoConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_environment() -> String {
    "development".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            bind_port: default_bind_port(),
            max_concurrent_requests: default_max_concurrent_requests(),
            request_timeout_seconds: default_request_timeout_seconds(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            url: default_node_url(),
            info_path: String::new(),
            timeout_seconds: default_node_timeout_seconds(),
            user_agent: default_user_agent(),
            headers: BTreeMap::new(),
        }
    }
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            blockchain_path: default_blockchain_path(),
            contracts_path: default_contracts_path(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { path: default_store_path() }
    }
}

impl Default for FinalityConfig {
    fn default() -> Self {
        Self { poll_interval_seconds: default_poll_interval_seconds() }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_size: default_window_size(),
            safety_margin: default_safety_margin(),
            window_delay_ms: default_window_delay_ms(),
            idle_interval_seconds: default_idle_interval_seconds(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            server: ServerConfig::default(),
            node: NodeConfig::default(),
            routes: RoutesConfig::default(),
            store: StoreConfig::default(),
            finality: FinalityConfig::default(),
            sync: SyncConfig::default(),
            info: InfoConfig::default(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Parses `Key=Value` lines as used by the `HEADERS` environment variable.
///
/// Lines without `=` or with an empty key are skipped.
#[must_use]
pub fn parse_header_lines(raw: &str) -> Vec<(String, String)> {
    raw.lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

impl AppConfig {
    /// Loads configuration from a TOML file with environment variable overrides.
    ///
    /// Environment variables with the `FLOCK__` prefix can override any configuration value.
    /// Use `__` as a separator for nested fields (e.g., `FLOCK__SERVER__BIND_PORT=9000`).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed, or deserialized.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let config_builder = Config::builder()
            .set_default("environment", "development")?
            .set_default("server.bind_address", "0.0.0.0")?
            .set_default("server.bind_port", 8080)?
            .set_default("node.url", "http://127.0.0.1:5000/")?
            .set_default("store.path", "data/flock.redb")?
            .set_default("metrics.enabled", true)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("FLOCK").separator("__"))
            .build()?;

        config_builder.try_deserialize()
    }

    /// Loads configuration from `config/config.toml` with fallback to defaults.
    ///
    /// The config file path can be overridden using the `FLOCK_CONFIG` environment variable.
    /// Header lines from `HEADERS` are merged into `node.headers`, replacing same-named entries.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration cannot be loaded or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("FLOCK_CONFIG").unwrap_or_else(|_| "config/config.toml".to_string());
        let mut config = Self::from_file(&config_path)?;

        if let Ok(raw) = std::env::var("HEADERS") {
            config.node.headers.extend(parse_header_lines(&raw));
        }

        Ok(config)
    }

    /// Returns the parsed socket address for the HTTP server.
    ///
    /// # Errors
    ///
    /// Returns an error string if the address cannot be parsed into a valid [`SocketAddr`].
    ///
    /// [`SocketAddr`]: std::net::SocketAddr
    pub fn socket_addr(&self) -> Result<std::net::SocketAddr, String> {
        format!("{}:{}", self.server.bind_address, self.server.bind_port)
            .parse()
            .map_err(|_| {
                format!(
                    "Invalid socket address: {}:{}",
                    self.server.bind_address, self.server.bind_port
                )
            })
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_seconds)
    }

    #[must_use]
    pub fn node_timeout(&self) -> Duration {
        Duration::from_secs(self.node.timeout_seconds)
    }

    #[must_use]
    pub fn finality_poll_interval(&self) -> Duration {
        Duration::from_secs(self.finality.poll_interval_seconds)
    }

    /// Backfill settings derived from the `[sync]` section.
    #[must_use]
    pub fn backfill_config(&self) -> BackfillConfig {
        BackfillConfig {
            window_size: self.sync.window_size,
            safety_margin: self.sync.safety_margin,
            window_delay: Duration::from_millis(self.sync.window_delay_ms),
            idle_interval: Duration::from_secs(self.sync.idle_interval_seconds),
        }
    }

    /// Validates the configuration for correctness and consistency.
    ///
    /// # Errors
    ///
    /// Returns a descriptive error string if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if self.node.url.is_empty() {
            return Err("Node URL must not be empty".to_string());
        }
        if !self.node.url.starts_with("http") {
            return Err(format!("Invalid node URL: {}", self.node.url));
        }

        if self.node.timeout_seconds == 0 {
            return Err("Node timeout must be greater than 0".to_string());
        }

        if self.server.request_timeout_seconds == 0 {
            return Err("Request timeout must be greater than 0".to_string());
        }

        // A failed upstream call must still answer before the server gives up on the request
        let worst_case = worst_case_duration(self.node_timeout());
        if worst_case >= self.request_timeout() {
            return Err(format!(
                "Node timeout of {}s allows upstream calls of up to {:.1}s, which reaches the request timeout of {}s",
                self.node.timeout_seconds,
                worst_case.as_secs_f64(),
                self.server.request_timeout_seconds
            ));
        }

        for (name, path) in [
            ("blockchain_path", &self.routes.blockchain_path),
            ("contracts_path", &self.routes.contracts_path),
        ] {
            if !path.starts_with('/') || path.len() < 2 {
                return Err(format!("Route {name} must start with '/' and not be the root: {path}"));
            }
        }
        if self.routes.blockchain_path == self.routes.contracts_path {
            return Err("Route paths must be distinct".to_string());
        }

        if self.store.path.is_empty() {
            return Err("Store path must not be empty".to_string());
        }

        if self.finality.poll_interval_seconds == 0 {
            return Err("Finality poll interval must be greater than 0".to_string());
        }

        if self.sync.window_size == 0 {
            return Err("Sync window size must be greater than 0".to_string());
        }

        if self.sync.idle_interval_seconds == 0 {
            return Err("Sync idle interval must be greater than 0".to_string());
        }

        if self.server.max_concurrent_requests == 0 {
            return Err("Max concurrent requests must be greater than 0".to_string());
        }

        if self.server.bind_port == 0 {
            return Err("Bind port must be greater than 0".to_string());
        }

        if self.server.max_body_bytes == 0 {
            return Err("Max body size must be greater than 0".to_string());
        }

        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err("Logging format must be 'json' or 'pretty'".to_string());
        }

        Ok(())
    }
}
