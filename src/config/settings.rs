use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub otel: OtelConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Database connection parameters.
///
/// Either `dsn` (with optional `user`/`password`) or a bare `instance` name
/// must be given. An instance name is resolved through the client
/// environment (`PGHOST`, `PGPORT`, `PGUSER`, `PGPASSWORD`).
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub user: Option<String>,
    pub password: Option<String>,
    /// `host[:port]/database`, or a full `postgres://` URL without credentials
    pub dsn: Option<String>,
    /// Bare database/instance identifier
    pub instance: Option<String>,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_min_idle")]
    pub min_idle: u32,
    #[serde(default = "default_max_lifetime")]
    pub max_lifetime_seconds: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_seconds: u64,
    #[serde(default = "default_health_check_timeout")]
    pub health_check_timeout_ms: u64,
    /// Applied server-side as `statement_timeout`
    #[serde(default = "default_query_timeout")]
    pub query_timeout_seconds: u64,
    #[serde(default = "default_exec_timeout")]
    pub exec_timeout_seconds: u64,
    /// Watchdog budget for the initial health check of a fresh handle
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

fn default_pool_size() -> u32 {
    10
}

fn default_min_idle() -> u32 {
    2
}

fn default_max_lifetime() -> u64 {
    1800 // 30 minutes
}

fn default_idle_timeout() -> u64 {
    300 // 5 minutes
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_health_check_timeout() -> u64 {
    5000
}

fn default_query_timeout() -> u64 {
    30
}

fn default_exec_timeout() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    45
}

impl DatabaseConfig {
    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_seconds)
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueSettings {
    #[serde(default = "default_queue_name")]
    pub name: String,
    #[serde(default = "default_consumer_name")]
    pub consumer: String,
    /// How long the first dequeue of a batch blocks waiting for a message
    #[serde(default = "default_first_wait")]
    pub first_wait_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pause between polls when the queue was empty
    #[serde(default = "default_idle_delay")]
    pub idle_delay_ms: u64,
}

pub(crate) fn default_queue_name() -> String {
    "MAIL_QUEUE".to_string()
}

pub(crate) fn default_consumer_name() -> String {
    "MAIL_DISPATCHER".to_string()
}

fn default_first_wait() -> u64 {
    5000
}

fn default_batch_size() -> usize {
    10
}

fn default_idle_delay() -> u64 {
    1000
}

/// Metrics and health endpoint. Off unless enabled, so the dispatcher
/// opens no listener by default.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9090
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "ara-mail-dispatch".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("queue.name", default_queue_name())?
            .set_default("queue.consumer", default_consumer_name())?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // DISPATCH_DATABASE__DSN, DISPATCH_QUEUE__FIRST_WAIT_MS, ...
            .add_source(
                Environment::with_prefix("DISPATCH")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            user: None,
            password: None,
            dsn: None,
            instance: None,
            pool_size: default_pool_size(),
            min_idle: default_min_idle(),
            max_lifetime_seconds: default_max_lifetime(),
            idle_timeout_seconds: default_idle_timeout(),
            acquire_timeout_seconds: default_acquire_timeout(),
            health_check_timeout_ms: default_health_check_timeout(),
            query_timeout_seconds: default_query_timeout(),
            exec_timeout_seconds: default_exec_timeout(),
            connect_timeout_seconds: default_connect_timeout(),
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            name: default_queue_name(),
            consumer: default_consumer_name(),
            first_wait_ms: default_first_wait(),
            batch_size: default_batch_size(),
            idle_delay_ms: default_idle_delay(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}
