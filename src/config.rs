//! Configuration loading and types for swift-search.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct, then validated once with [`Config::validate`].  Each
//! subsection governs a different part of the system: the broker queue,
//! indexing rules, event dispatch, metadata lookups, and the proxy host.

use garde::Validate;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    #[garde(dive)]
    pub server: ServerConfig,

    /// Upstream storage service the proxy forwards to.
    #[serde(default)]
    #[garde(dive)]
    pub upstream: UpstreamConfig,

    /// Message broker connection and queue settings.
    #[serde(default)]
    #[garde(dive)]
    pub queue: QueueConfig,

    /// Indexing eligibility settings.
    #[serde(default)]
    #[garde(dive)]
    pub indexing: IndexingConfig,

    /// Event dispatch settings.
    #[serde(default)]
    #[garde(dive)]
    pub dispatch: DispatchConfig,

    /// Account/container metadata lookup settings.
    #[serde(default)]
    #[garde(dive)]
    pub metadata: MetadataConfig,

    /// Logging settings.
    #[serde(default)]
    #[garde(skip)]
    pub logging: LoggingConfig,

    /// Observability settings.
    #[serde(default)]
    #[garde(skip)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    #[garde(length(min = 1))]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    #[garde(range(min = 1))]
    pub port: u16,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    #[garde(skip)]
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Upstream storage endpoint.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpstreamConfig {
    /// Base URL requests are proxied to, e.g. `http://127.0.0.1:8080`.
    #[serde(default = "default_upstream_url")]
    #[garde(length(min = 1))]
    pub url: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
        }
    }
}

/// Broker connection settings.
///
/// Field names also accept the flat `queue_*` spellings used by older
/// proxy pipeline configs (`queue_username`, `queue_url`, ...).
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct QueueConfig {
    #[serde(alias = "queue_username", default = "default_queue_username")]
    #[garde(skip)]
    pub username: String,

    #[serde(alias = "queue_password", default = "default_queue_password")]
    #[garde(skip)]
    pub password: String,

    /// Broker host (also accepts `queue_url`).
    #[serde(alias = "queue_host", alias = "queue_url", default = "default_queue_host")]
    #[garde(length(min = 1))]
    pub host: String,

    #[serde(alias = "queue_port", default = "default_queue_port")]
    #[garde(range(min = 1))]
    pub port: u16,

    #[serde(alias = "queue_vhost", default = "default_queue_vhost")]
    #[garde(length(min = 1))]
    pub vhost: String,

    /// Durable queue name, also used as the routing key.
    #[serde(alias = "queue_name", default = "default_queue_name")]
    #[garde(length(min = 1, max = 255))]
    pub name: String,

    /// Upper bound on connect and publish-confirm waits.
    #[serde(default = "default_connection_timeout")]
    #[garde(range(min = 1))]
    pub connection_timeout_seconds: u64,
}

impl QueueConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_seconds)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            username: default_queue_username(),
            password: default_queue_password(),
            host: default_queue_host(),
            port: default_queue_port(),
            vhost: default_queue_vhost(),
            name: default_queue_name(),
            connection_timeout_seconds: default_connection_timeout(),
        }
    }
}

/// Indexing eligibility settings.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct IndexingConfig {
    /// Account/container metadata key that opts a scope in,
    /// e.g. `search-enabled` or `queuer-enabled`.
    #[serde(default = "default_opt_in_key")]
    #[garde(length(min = 1))]
    pub opt_in_key: String,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            opt_in_key: default_opt_in_key(),
        }
    }
}

/// Where publishing happens relative to the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Publish inside the middleware before forwarding the request.
    #[default]
    Inline,
    /// Hand events to a single background task through a bounded queue.
    Background,
}

/// What to discard when the background queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    /// Discard the incoming event.
    #[default]
    DropNewest,
    /// Evict the oldest queued event to make room.
    DropOldest,
}

/// Event dispatch settings.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct DispatchConfig {
    #[serde(default)]
    #[garde(skip)]
    pub mode: DispatchMode,

    /// Maximum pending events in background mode.
    #[serde(default = "default_queue_depth")]
    #[garde(range(min = 1))]
    pub queue_depth: usize,

    #[serde(default)]
    #[garde(skip)]
    pub drop_policy: DropPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mode: DispatchMode::default(),
            queue_depth: default_queue_depth(),
            drop_policy: DropPolicy::default(),
        }
    }
}

/// Metadata source type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MetadataSource {
    /// `HEAD` requests against the storage service.
    #[default]
    Http,
    /// Fixed table from this config file.
    Static,
}

/// Metadata lookup configuration.
#[derive(Debug, Clone, Deserialize, Validate, Default)]
pub struct MetadataConfig {
    #[serde(default)]
    #[garde(skip)]
    pub source: MetadataSource,

    /// HTTP lookup settings. Defaults to the upstream URL when absent.
    #[serde(default)]
    #[garde(skip)]
    pub http: Option<HttpMetadataConfig>,

    /// Fixed metadata table.
    #[serde(default, rename = "static")]
    #[garde(skip)]
    pub fixed: StaticMetadataConfig,
}

/// HTTP metadata lookup settings.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpMetadataConfig {
    /// Base URL of the storage service.
    pub endpoint: String,
    /// Service token sent as `x-auth-token` on lookup requests.  Without
    /// one, lookups carry the token of the request being checked.
    #[serde(default)]
    pub auth_token: Option<String>,
}

/// Fixed metadata table.
///
/// `accounts` is keyed by account name, `containers` by `account/container`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StaticMetadataConfig {
    #[serde(default)]
    pub accounts: HashMap<String, HashMap<String, String>>,
    #[serde(default)]
    pub containers: HashMap<String, HashMap<String, String>>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { metrics: true }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            upstream: UpstreamConfig::default(),
            queue: QueueConfig::default(),
            indexing: IndexingConfig::default(),
            dispatch: DispatchConfig::default(),
            metadata: MetadataConfig::default(),
            logging: LoggingConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Configuration keys recognized under the `queue` section, in their flat
/// pipeline spelling.
pub const RECOGNIZED_QUEUE_KEYS: &[&str] = &[
    "queue_username",
    "queue_password",
    "queue_host",
    "queue_port",
    "queue_vhost",
    "queue_name",
    "connection_timeout_seconds",
];

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8090
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_upstream_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_queue_username() -> String {
    "guest".to_string()
}

fn default_queue_password() -> String {
    "guest".to_string()
}

fn default_queue_host() -> String {
    "127.0.0.1".to_string()
}

fn default_queue_port() -> u16 {
    5672
}

fn default_queue_vhost() -> String {
    "/".to_string()
}

fn default_queue_name() -> String {
    "swift_search".to_string()
}

fn default_connection_timeout() -> u64 {
    5
}

fn default_opt_in_key() -> String {
    "search-enabled".to_string()
}

fn default_queue_depth() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Parse and validate configuration from a YAML string.
pub fn parse_config(contents: &str) -> anyhow::Result<Config> {
    let config: Config = serde_yaml::from_str(contents)?;
    config
        .validate()
        .map_err(|report| anyhow::anyhow!("invalid configuration: {report}"))?;
    Ok(config)
}

/// Load, parse, and validate configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    parse_config(&contents)
}
