use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

const DEFAULT_EXECUTOR_WORKERS: usize = 10;
const DEFAULT_EXECUTOR_QUEUE_CAPACITY: usize = 50;
const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 10_000;

const DEFAULT_CAPTURE_BATCH_SIZE: u64 = 10;
const DEFAULT_CAPTURE_RETRY_BACKOFF_SECS: u64 = 3_600;
const DEFAULT_CAPTURE_MAX_RETRIES: u64 = 48;
const DEFAULT_CAPTURE_INTERVAL_SECS: u64 = 120;

const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 30;

/// Bounded worker pool executing blocking gateway operations off the request
/// path.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    #[serde(default = "default_executor_workers")]
    pub worker_count: usize,

    #[serde(default = "default_executor_queue_capacity")]
    pub queue_capacity: usize,

    /// How long a synchronous caller waits before the operation is reported
    /// as still in progress.
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            worker_count: default_executor_workers(),
            queue_capacity: default_executor_queue_capacity(),
            operation_timeout_ms: default_operation_timeout_ms(),
        }
    }
}

/// Batch capture job tuning.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CaptureProcessConfig {
    #[serde(default = "default_capture_batch_size")]
    pub batch_size: u64,

    /// A charge in CAPTURE_APPROVED_RETRY is only retried once this much time
    /// has passed since its last capture attempt.
    #[serde(default = "default_capture_retry_backoff_secs")]
    pub retry_backoff_secs: u64,

    /// Capture attempts beyond this ceiling move the charge to CAPTURE_ERROR
    /// without another gateway call.
    #[serde(default = "default_capture_max_retries")]
    pub maximum_retries: u64,

    #[serde(default = "default_capture_interval_secs")]
    pub scheduler_interval_secs: u64,
}

impl Default for CaptureProcessConfig {
    fn default() -> Self {
        Self {
            batch_size: default_capture_batch_size(),
            retry_backoff_secs: default_capture_retry_backoff_secs(),
            maximum_retries: default_capture_max_retries(),
            scheduler_interval_secs: default_capture_interval_secs(),
        }
    }
}

/// Outbound gateway endpoints. Wire formats are adapter-private; only the
/// base URLs and the shared request timeout live in configuration.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct GatewaysConfig {
    #[serde(default = "default_worldpay_url")]
    pub worldpay_url: String,

    #[serde(default = "default_smartpay_url")]
    pub smartpay_url: String,

    #[serde(default = "default_gateway_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for GatewaysConfig {
    fn default() -> Self {
        Self {
            worldpay_url: default_worldpay_url(),
            smartpay_url: default_smartpay_url(),
            request_timeout_secs: default_gateway_timeout_secs(),
        }
    }
}

/// Application configuration with validation.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL (postgres in production, sqlite in tests).
    pub database_url: String,

    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging).
    #[serde(default)]
    pub log_json: bool,

    /// Whether to create missing tables on startup (sqlite/dev only).
    #[serde(default)]
    pub auto_migrate: bool,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub capture: CaptureProcessConfig,

    #[serde(default)]
    pub gateways: GatewaysConfig,
}

impl AppConfig {
    /// Minimal constructor used by tests and local tooling.
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            executor: ExecutorConfig::default(),
            capture: CaptureProcessConfig::default(),
            gateways: GatewaysConfig::default(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Loads configuration from `config/default.toml`, an environment-specific
/// overlay, and `APP__`-prefixed environment variables, in that order.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let run_env = std::env::var("RUN_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let mut builder = Config::builder()
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT)?
        .set_default("environment", run_env.clone())?;

    let default_file = Path::new(CONFIG_DIR).join("default.toml");
    if default_file.exists() {
        builder = builder.add_source(File::from(default_file));
    }
    let env_file = Path::new(CONFIG_DIR).join(format!("{run_env}.toml"));
    if env_file.exists() {
        builder = builder.add_source(File::from(env_file));
    }

    let settings = builder
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let config: AppConfig = settings.try_deserialize()?;
    config
        .validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {e}")))?;
    Ok(config)
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_executor_workers() -> usize {
    DEFAULT_EXECUTOR_WORKERS
}
fn default_executor_queue_capacity() -> usize {
    DEFAULT_EXECUTOR_QUEUE_CAPACITY
}
fn default_operation_timeout_ms() -> u64 {
    DEFAULT_OPERATION_TIMEOUT_MS
}
fn default_capture_batch_size() -> u64 {
    DEFAULT_CAPTURE_BATCH_SIZE
}
fn default_capture_retry_backoff_secs() -> u64 {
    DEFAULT_CAPTURE_RETRY_BACKOFF_SECS
}
fn default_capture_max_retries() -> u64 {
    DEFAULT_CAPTURE_MAX_RETRIES
}
fn default_capture_interval_secs() -> u64 {
    DEFAULT_CAPTURE_INTERVAL_SECS
}
fn default_worldpay_url() -> String {
    "https://secure.worldpay.test/jsp/merchant/xml/paymentService.jsp".to_string()
}
fn default_smartpay_url() -> String {
    "https://pal-test.smartpay.test/pal/servlet/soap/Payment".to_string()
}
fn default_gateway_timeout_secs() -> u64 {
    DEFAULT_GATEWAY_TIMEOUT_SECS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = AppConfig::new(
            "sqlite::memory:".into(),
            "127.0.0.1".into(),
            8080,
            "test".into(),
        );
        assert_eq!(cfg.executor.worker_count, DEFAULT_EXECUTOR_WORKERS);
        assert_eq!(cfg.capture.batch_size, DEFAULT_CAPTURE_BATCH_SIZE);
        assert!(!cfg.is_production());
        assert_eq!(cfg.server_addr(), "127.0.0.1:8080");
    }
}
