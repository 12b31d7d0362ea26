//! Configuration management for the multipart uploader

use crate::error::{Result, UploadError};
use crate::models::StorageClass;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Largest part the storage service accepts (5 GiB)
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Configuration for a multipart upload run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Target bucket (required)
    #[serde(default)]
    pub bucket: String,

    /// Base URL of the S3-compatible endpoint (default: http://127.0.0.1:9000)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Prefix prepended to the object key (default: none)
    #[serde(default)]
    pub key_prefix: String,

    /// Maximum size of each part in bytes (default: 5MB)
    /// Valid range: 1 byte to 5GB
    #[serde(default = "default_part_size")]
    pub part_size: u64,

    /// Number of concurrent upload workers (default: 5)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Total upload attempts per part before the upload is aborted (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Storage class requested at initiation (default: STANDARD)
    #[serde(default)]
    pub storage_class: StorageClass,

    /// Base delay between attempts in milliseconds, doubled per retry (default: 0)
    #[serde(default)]
    pub retry_backoff_ms: u64,

    /// Per-request timeout for the HTTP client in seconds (default: 30)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum number of parts a single upload may be split into (default: 10000)
    #[serde(default = "default_max_parts")]
    pub max_parts: usize,
}

// Default value functions for serde
fn default_endpoint() -> String {
    "http://127.0.0.1:9000".to_string()
}

fn default_part_size() -> u64 {
    5 * 1024 * 1024 // 5MB
}

fn default_workers() -> usize {
    5
}

fn default_max_attempts() -> usize {
    3
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_parts() -> usize {
    10_000
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig {
            bucket: String::new(),
            endpoint: default_endpoint(),
            key_prefix: String::new(),
            part_size: default_part_size(),
            workers: default_workers(),
            max_attempts: default_max_attempts(),
            storage_class: StorageClass::default(),
            retry_backoff_ms: 0,
            request_timeout_secs: default_request_timeout(),
            max_parts: default_max_parts(),
        }
    }
}

impl UploadConfig {
    /// Load configuration from a YAML file
    ///
    /// # Returns
    /// * `Ok(UploadConfig)` if loading and validation succeed
    /// * `Err(UploadError)` if file cannot be read or config is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            UploadError::ConfigError(format!("Failed to read config file: {}", e))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: UploadConfig = serde_yaml::from_str(content).map_err(|e| {
            UploadError::ConfigError(format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - bucket must not be empty
    /// - part_size must be between 1 byte and 5GB
    /// - workers must be > 0
    /// - max_attempts must be >= 1
    /// - max_parts must be > 0
    /// - request_timeout_secs must be > 0
    pub fn validate(&self) -> Result<()> {
        if self.bucket.trim().is_empty() {
            return Err(UploadError::ConfigError(
                "bucket must not be empty".to_string(),
            ));
        }

        if self.part_size == 0 || self.part_size > MAX_PART_SIZE {
            return Err(UploadError::ConfigError(format!(
                "part_size must be between 1 byte and {}GB, got {} bytes",
                MAX_PART_SIZE / (1024 * 1024 * 1024),
                self.part_size
            )));
        }

        if self.workers == 0 {
            return Err(UploadError::ConfigError(
                "workers must be greater than 0".to_string(),
            ));
        }

        if self.max_attempts == 0 {
            return Err(UploadError::ConfigError(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        if self.max_parts == 0 {
            return Err(UploadError::ConfigError(
                "max_parts must be greater than 0".to_string(),
            ));
        }

        if self.request_timeout_secs == 0 {
            return Err(UploadError::ConfigError(
                "request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Create a new UploadConfig with custom values
    pub fn new(
        bucket: impl Into<String>,
        part_size: u64,
        workers: usize,
        max_attempts: usize,
    ) -> Result<Self> {
        let config = UploadConfig {
            bucket: bucket.into(),
            part_size,
            workers,
            max_attempts,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Object key for a file name, honoring `key_prefix`
    pub fn object_key(&self, file_name: &str) -> String {
        let prefix = self.key_prefix.trim_matches('/');
        if prefix.is_empty() {
            file_name.to_string()
        } else {
            format!("{}/{}", prefix, file_name)
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Human readable lines describing the effective configuration
    pub fn summary(&self) -> Vec<String> {
        vec![
            format!("Bucket: {}", self.bucket),
            format!("Endpoint: {}", self.endpoint),
            format!("Part size: {} bytes ({} KB)", self.part_size, self.part_size / 1024),
            format!("Workers: {}", self.workers),
            format!("Max attempts per part: {}", self.max_attempts),
            format!("Storage class: {}", self.storage_class),
        ]
    }
}
