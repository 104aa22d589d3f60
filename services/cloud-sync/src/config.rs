use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    Missing(String),

    #[error("Invalid configuration value for {key}: {message}")]
    Invalid { key: String, message: String },

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Main configuration for the cloud sync service
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// S3 destination configuration
    #[serde(default)]
    pub s3: S3Config,
    /// Scheduler, bandwidth and retry configuration
    #[serde(default)]
    pub sync: SyncConfig,
    /// Control API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (json or pretty)
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Metrics port, 0 disables the Prometheus exporter
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// S3 destination configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// S3 bucket receiving the video segments
    #[serde(default)]
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// First component of every destination key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Segments larger than this are sent as multipart uploads (100MiB default)
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: u64,
    /// Part size for multipart uploads (100MiB default)
    #[serde(default = "default_part_size")]
    pub part_size_bytes: u64,
}

/// Scheduler, bandwidth and retry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Upload bandwidth ceiling in megabits per second
    #[serde(default = "default_max_bandwidth_mbps")]
    pub max_bandwidth_mbps: f64,
    /// Trailing window used to average upload volume
    #[serde(default = "default_bandwidth_window_secs")]
    pub bandwidth_window_secs: u64,
    /// Retries allowed per task before it is dropped
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Upper bound for the exponential retry backoff
    #[serde(default = "default_max_retry_delay_secs")]
    pub max_retry_delay_secs: u64,
    /// How long the scheduler waits on an empty queue before polling again
    #[serde(default = "default_idle_poll_interval_ms")]
    pub idle_poll_interval_ms: u64,
    /// Pause after an unexpected failure inside the scheduler loop
    #[serde(default = "default_error_cooldown_secs")]
    pub error_cooldown_secs: u64,
    /// Time allowed for the in-flight transfer to finish on shutdown
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

/// API configuration for the control endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Serve the control API
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
}

// Default value functions
fn default_service_name() -> String {
    "cloud-sync-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_key_prefix() -> String {
    "cctv".to_string()
}

fn default_multipart_threshold() -> u64 {
    100 * 1024 * 1024 // 100MiB
}

fn default_part_size() -> u64 {
    100 * 1024 * 1024 // 100MiB
}

fn default_max_bandwidth_mbps() -> f64 {
    10.0
}

fn default_bandwidth_window_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_retry_delay_secs() -> u64 {
    300 // 5 minutes
}

fn default_idle_poll_interval_ms() -> u64 {
    1000
}

fn default_error_cooldown_secs() -> u64 {
    5
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8081
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> Result<Self, ConfigError> {
        let config = config::Config::builder()
            .set_default("service.name", "cloud-sync-service")?
            .set_default("service.log_level", "info")?
            .add_source(config::File::with_name("config/cloud-sync").required(false))
            .add_source(config::File::with_name("/etc/nvr/cloud-sync").required(false))
            // CLOUD_SYNC__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("CLOUD_SYNC")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the scheduler cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.s3.bucket.trim().is_empty() {
            return Err(ConfigError::Missing("s3.bucket".to_string()));
        }
        if self.s3.part_size_bytes == 0 {
            return Err(ConfigError::Invalid {
                key: "s3.part_size_bytes".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.s3.part_size_bytes > self.s3.multipart_threshold_bytes {
            return Err(ConfigError::Invalid {
                key: "s3.part_size_bytes".to_string(),
                message: format!(
                    "{} exceeds multipart threshold {}",
                    self.s3.part_size_bytes, self.s3.multipart_threshold_bytes
                ),
            });
        }
        if self.sync.max_bandwidth_mbps.is_nan() || self.sync.max_bandwidth_mbps <= 0.0 {
            return Err(ConfigError::Invalid {
                key: "sync.max_bandwidth_mbps".to_string(),
                message: "must be a positive number".to_string(),
            });
        }
        if self.sync.bandwidth_window_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "sync.bandwidth_window_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

impl SyncConfig {
    /// Bandwidth ceiling converted to bytes per second
    pub fn max_bytes_per_second(&self) -> f64 {
        self.max_bandwidth_mbps * 1024.0 * 1024.0 / 8.0
    }

    pub fn bandwidth_window(&self) -> Duration {
        Duration::from_secs(self.bandwidth_window_secs)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_secs(self.max_retry_delay_secs)
    }

    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.idle_poll_interval_ms)
    }

    pub fn error_cooldown(&self) -> Duration {
        Duration::from_secs(self.error_cooldown_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
            key_prefix: default_key_prefix(),
            multipart_threshold_bytes: default_multipart_threshold(),
            part_size_bytes: default_part_size(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_bandwidth_mbps: default_max_bandwidth_mbps(),
            bandwidth_window_secs: default_bandwidth_window_secs(),
            max_retries: default_max_retries(),
            max_retry_delay_secs: default_max_retry_delay_secs(),
            idle_poll_interval_ms: default_idle_poll_interval_ms(),
            error_cooldown_secs: default_error_cooldown_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}
