//! s3pilot-core - Core library for S3 Pilot
//!
//! This library reconciles a single S3 bucket: it creates and configures the
//! bucket, tears it down, and uploads content into it. Provider access goes
//! through the [`StorageApi`] trait so every operation can run against an
//! in-memory provider in tests.

pub mod client;
pub mod config;
pub mod error;
pub mod provider;
pub mod reconcile;
pub mod retry;
pub mod state;
pub mod teardown;
pub mod upload;

#[cfg(test)]
mod mock;

// Re-export commonly used types
pub use client::{AwsClientFactory, ClientFactory, ClientPair, S3Handle, DEFAULT_REGION};
pub use config::{
    config_exists, get_config_path, load_config, load_config_or_default, parse_config,
    save_config, validate_config,
};
pub use config::{AdvancedConfig, AwsConfig, Config, ConfigFile, DefaultsConfig, LoggingConfig};
pub use error::{Error, ProviderError, ProviderErrorKind, Result};
pub use provider::{CorsConfiguration, CorsRule, StorageApi};
pub use reconcile::{validate_bucket_name, DeployInputs, Reconciler};
pub use retry::RetryPolicy;
pub use state::{bucket_url, BucketIdentity, BucketState, StateStore};
pub use upload::{requires_multipart_upload, MultipartUploadConfig, UploadOptions};
