//! Configuration management for the plant monitor service.
//!
//! Settings are loaded once at startup from configuration files and
//! environment variables, validated, and never changed afterwards.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the monitor service.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Camera device configuration
    #[serde(default)]
    pub camera: CameraConfig,

    /// Capture schedule and local storage configuration
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Remote upload configuration
    #[serde(default)]
    pub upload: UploadConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Service-level configuration
    #[serde(default)]
    pub service: ServiceConfig,
}

/// Camera device configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    /// Video device index (`/dev/video<N>`)
    #[serde(default)]
    pub device_index: u32,

    /// Requested frame width in pixels
    #[serde(default = "default_width")]
    pub width: u32,

    /// Requested frame height in pixels
    #[serde(default = "default_height")]
    pub height: u32,

    /// JPEG quality (1-100)
    #[serde(default = "default_quality")]
    pub quality: u8,

    /// Seconds to let the sensor settle before grabbing a frame
    #[serde(default = "default_warmup_secs")]
    pub warmup_secs: u64,

    /// Seconds to wait for a frame once the device is open
    #[serde(default = "default_frame_timeout_secs")]
    pub frame_timeout_secs: u64,

    /// Encoded images smaller than this are treated as a failed capture
    #[serde(default = "default_min_image_bytes")]
    pub min_image_bytes: usize,
}

/// Capture schedule and local storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// Seconds between the start of consecutive captures
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Root directory for date-partitioned images
    #[serde(default = "default_image_root")]
    pub image_root: PathBuf,
}

/// Remote storage configuration (S3-compatible object storage).
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Upload captures to remote storage
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Bucket holding the deployment folder
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

    /// Top-level folder for this deployment
    #[serde(default = "default_root_folder")]
    pub root_folder: String,

    /// Retries after the first failed upload attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Growth factor applied to the delay after each retry (1.0 = fixed)
    #[serde(default = "default_retry_multiplier")]
    pub retry_multiplier: f64,

    /// Upper bound for the retry delay in milliseconds
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Console output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for daily log files
    #[serde(default = "default_log_directory")]
    pub directory: PathBuf,

    /// Daily log files are named `<file_prefix>_<YYYYMMDD>.log`
    #[serde(default = "default_log_file_prefix")]
    pub file_prefix: String,
}

/// Service-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceConfig {
    /// Prometheus exporter port; metrics are not exported when unset
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

// Default value functions
fn default_width() -> u32 {
    1920
}
fn default_height() -> u32 {
    1080
}
fn default_quality() -> u8 {
    95
}
fn default_warmup_secs() -> u64 {
    2
}
fn default_frame_timeout_secs() -> u64 {
    10
}
fn default_min_image_bytes() -> usize {
    1000
}
fn default_interval_secs() -> u64 {
    60
}
fn default_image_root() -> PathBuf {
    PathBuf::from("captured_images")
}
fn default_true() -> bool {
    true
}
fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_root_folder() -> String {
    "plants".to_string()
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_delay_ms() -> u64 {
    5000
}
fn default_retry_multiplier() -> f64 {
    1.0
}
fn default_retry_max_delay_ms() -> u64 {
    60000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}
fn default_log_directory() -> PathBuf {
    PathBuf::from("logs")
}
fn default_log_file_prefix() -> String {
    "plant_monitor".to_string()
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: default_width(),
            height: default_height(),
            quality: default_quality(),
            warmup_secs: default_warmup_secs(),
            frame_timeout_secs: default_frame_timeout_secs(),
            min_image_bytes: default_min_image_bytes(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            image_root: default_image_root(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bucket: String::new(),
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
            root_folder: default_root_folder(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            retry_multiplier: default_retry_multiplier(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            directory: default_log_directory(),
            file_prefix: default_log_file_prefix(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default config file (config/default.toml)
    /// 2. Environment-specific config (config/{env}.toml)
    /// 3. Environment variables (prefixed with MONITOR_)
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // e.g. MONITOR_UPLOAD__BUCKET
            .add_source(
                Environment::with_prefix("MONITOR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.capture.interval_secs == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "capture.interval_secs".to_string(),
                message: "Interval must be greater than 0".to_string(),
            });
        }

        if self.capture.image_root.as_os_str().is_empty() {
            return Err(ConfigValidationError::MissingField(
                "capture.image_root".to_string(),
            ));
        }

        if !(1..=100).contains(&self.camera.quality) {
            return Err(ConfigValidationError::InvalidValue {
                field: "camera.quality".to_string(),
                message: "Quality must be between 1 and 100".to_string(),
            });
        }

        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "camera.width/height".to_string(),
                message: "Dimensions must be greater than 0".to_string(),
            });
        }

        if self.upload.enabled {
            if self.upload.bucket.is_empty() {
                return Err(ConfigValidationError::MissingField(
                    "upload.bucket".to_string(),
                ));
            }
            if self.upload.root_folder.trim_matches('/').is_empty() {
                return Err(ConfigValidationError::MissingField(
                    "upload.root_folder".to_string(),
                ));
            }
            if self.upload.retry_delay_ms == 0 {
                return Err(ConfigValidationError::InvalidValue {
                    field: "upload.retry_delay_ms".to_string(),
                    message: "Retry delay must be greater than 0".to_string(),
                });
            }
            if self.upload.retry_multiplier < 1.0 {
                return Err(ConfigValidationError::InvalidValue {
                    field: "upload.retry_multiplier".to_string(),
                    message: "Multiplier must be at least 1.0".to_string(),
                });
            }
        }

        Ok(())
    }
}

impl CameraConfig {
    /// Get warm-up delay as Duration.
    pub fn warmup(&self) -> Duration {
        Duration::from_secs(self.warmup_secs)
    }

    /// Get frame timeout as Duration.
    pub fn frame_timeout(&self) -> Duration {
        Duration::from_secs(self.frame_timeout_secs)
    }

    /// Device node for the configured index.
    pub fn device_path(&self) -> String {
        format!("/dev/video{}", self.device_index)
    }
}

impl CaptureConfig {
    /// Get capture interval as Duration.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl UploadConfig {
    /// Get the first retry delay as Duration.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Get maximum retry delay as Duration.
    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

#[cfg(test)]
pub(crate) fn test_upload_config() -> UploadConfig {
    UploadConfig {
        bucket: "greenhouse".to_string(),
        ..UploadConfig::default()
    }
}
