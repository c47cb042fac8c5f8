//! Configuration management for s3pilot

use crate::client::DEFAULT_REGION;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::upload::MultipartUploadConfig;
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration directory name
const CONFIG_DIR: &str = "s3pilot";

/// Configuration file name
const CONFIG_FILE: &str = "config.toml";

/// Smallest part S3 accepts in a multipart upload (except the last one)
const MIN_PART_SIZE_MB: usize = 5;
/// Largest part S3 accepts in a multipart upload
const MAX_PART_SIZE_MB: usize = 5 * 1024;
/// Largest object S3 stores; a threshold above it never triggers
const MAX_OBJECT_SIZE_MB: usize = 5 * 1024 * 1024;
const MIB: u64 = 1024 * 1024;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: &[&str] = &["pretty", "compact"];

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub aws: AwsConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    pub advanced: Option<AdvancedConfig>,
    pub logging: Option<LoggingConfig>,
}

/// AWS access configuration. Anything left unset falls back to the SDK's
/// default provider chain (environment, profile, instance metadata).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AwsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,

    /// S3-compatible endpoint (LocalStack, MinIO, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,
}

/// Defaults applied when deploy inputs leave a field out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_accelerated")]
    pub accelerated: bool,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            accelerated: default_accelerated(),
        }
    }
}

/// Advanced configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedConfig {
    /// Wait between visibility probes after a mutating call, in milliseconds
    #[serde(default = "default_retry_interval")]
    pub retry_interval_ms: u64,
    /// Give up after this many probes. Unset retries until the provider converges.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
    /// Files at or above this size (MB) use multipart upload
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_mb: usize,
    /// Multipart upload chunk size in MB
    #[serde(default = "default_multipart_chunk_size")]
    pub multipart_chunk_size_mb: usize,
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: default_retry_interval(),
            max_retries: None,
            max_concurrent_requests: default_max_concurrent(),
            multipart_threshold_mb: default_multipart_threshold(),
            multipart_chunk_size_mb: default_multipart_chunk_size(),
        }
    }
}

impl AdvancedConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            interval: Duration::from_millis(self.retry_interval_ms),
            max_attempts: self.max_retries,
        }
    }

    pub fn multipart(&self) -> MultipartUploadConfig {
        let chunk_mb = self.multipart_chunk_size_mb.min(MAX_PART_SIZE_MB) as u64;
        let threshold_mb = self.multipart_threshold_mb.min(MAX_OBJECT_SIZE_MB) as u64;
        MultipartUploadConfig {
            threshold: threshold_mb.saturating_mul(MIB),
            part_size: usize::try_from(chunk_mb.saturating_mul(MIB)).unwrap_or(usize::MAX),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
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

impl ConfigFile {
    /// Advanced section, or its defaults
    pub fn advanced(&self) -> AdvancedConfig {
        self.advanced.clone().unwrap_or_default()
    }

    /// Logging section, or its defaults
    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }
}

// Default values
fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_accelerated() -> bool {
    true
}

fn default_retry_interval() -> u64 {
    2000 // 2 seconds
}

fn default_max_concurrent() -> usize {
    5
}

fn default_multipart_threshold() -> usize {
    16 // 16MB
}

fn default_multipart_chunk_size() -> usize {
    8 // 8MB
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let home = home_dir()
        .ok_or_else(|| Error::Config("Cannot determine home directory".to_string()))?;
    Ok(home.join(".config").join(CONFIG_DIR))
}

/// Get the configuration file path
pub fn get_config_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join(CONFIG_FILE))
}

/// Load configuration from file
pub fn load_config() -> Result<ConfigFile> {
    let config_path = get_config_path()?;

    if !config_path.exists() {
        return Err(Error::ConfigNotFound(config_path));
    }

    let content = fs::read_to_string(&config_path).map_err(|e| {
        Error::InvalidConfig(format!("Failed to read config file: {}", e))
    })?;

    parse_config(&content)
}

/// Load configuration, falling back to defaults when no file exists
pub fn load_config_or_default() -> Result<ConfigFile> {
    match load_config() {
        Err(Error::ConfigNotFound(path)) => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Ok(ConfigFile::default())
        }
        other => other,
    }
}

/// Parse configuration from TOML text
pub fn parse_config(content: &str) -> Result<ConfigFile> {
    toml::from_str(content).map_err(|e| {
        Error::InvalidConfig(format!("Failed to parse config file: {}", e))
    })
}

/// Save configuration to file
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        fs::create_dir_all(&config_dir).map_err(|e| {
            Error::Config(format!("Failed to create config directory: {}", e))
        })?;
    }
    let config_path = config_dir.join(CONFIG_FILE);

    let content = toml::to_string_pretty(config).map_err(|e| {
        Error::InvalidConfig(format!("Failed to serialize config: {}", e))
    })?;

    fs::write(&config_path, content).map_err(|e| {
        Error::Config(format!("Failed to write config file: {}", e))
    })?;

    // Set secure permissions on config file (read/write for owner only)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(&config_path)?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(&config_path, perms)?;
    }

    Ok(())
}

/// Validate configuration
pub fn validate_config(config: &ConfigFile) -> Result<()> {
    // Static keys only make sense as a pair
    if config.aws.access_key_id.is_some() != config.aws.secret_access_key.is_some() {
        return Err(Error::Config(
            "access_key_id and secret_access_key must be set together".to_string(),
        ));
    }

    if config.aws.session_token.is_some() && config.aws.access_key_id.is_none() {
        return Err(Error::Config(
            "session_token requires access_key_id and secret_access_key".to_string(),
        ));
    }

    if let Some(endpoint) = &config.aws.endpoint_url {
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(Error::InvalidInput(format!(
                "endpoint_url must start with http:// or https:// (got {})",
                endpoint
            )));
        }
    }

    if config.defaults.region.trim().is_empty() {
        return Err(Error::InvalidInput("Default region cannot be empty".to_string()));
    }

    if let Some(advanced) = &config.advanced {
        if advanced.retry_interval_ms == 0 {
            return Err(Error::InvalidInput(
                "retry_interval_ms must be greater than zero".to_string(),
            ));
        }
        if advanced.max_retries == Some(0) {
            return Err(Error::InvalidInput(
                "max_retries must be at least 1 (omit it to retry until visible)".to_string(),
            ));
        }
        if advanced.max_concurrent_requests == 0 {
            return Err(Error::InvalidInput(
                "max_concurrent_requests must be at least 1".to_string(),
            ));
        }
        if advanced.multipart_chunk_size_mb < MIN_PART_SIZE_MB {
            return Err(Error::InvalidInput(format!(
                "multipart_chunk_size_mb must be at least {} (got {})",
                MIN_PART_SIZE_MB, advanced.multipart_chunk_size_mb
            )));
        }
        if advanced.multipart_chunk_size_mb > MAX_PART_SIZE_MB {
            return Err(Error::InvalidInput(format!(
                "multipart_chunk_size_mb must be at most {} (got {})",
                MAX_PART_SIZE_MB, advanced.multipart_chunk_size_mb
            )));
        }
        if advanced.multipart_threshold_mb > MAX_OBJECT_SIZE_MB {
            return Err(Error::InvalidInput(format!(
                "multipart_threshold_mb must be at most {} (got {})",
                MAX_OBJECT_SIZE_MB, advanced.multipart_threshold_mb
            )));
        }
    }

    if let Some(logging) = &config.logging {
        if !LOG_LEVELS.contains(&logging.level.as_str()) {
            return Err(Error::InvalidInput(format!(
                "Unknown log level '{}' (expected one of {})",
                logging.level,
                LOG_LEVELS.join(", ")
            )));
        }
        if !LOG_FORMATS.contains(&logging.format.as_str()) {
            return Err(Error::InvalidInput(format!(
                "Unknown log format '{}' (expected one of {})",
                logging.format,
                LOG_FORMATS.join(", ")
            )));
        }
    }

    Ok(())
}

/// Check if configuration exists
pub fn config_exists() -> bool {
    get_config_path().map(|p| p.exists()).unwrap_or(false)
}

/// Public alias for ConfigFile (used by lib.rs)
pub use ConfigFile as Config;
