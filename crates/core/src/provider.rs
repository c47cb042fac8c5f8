//! The storage provider boundary
//!
//! [`StorageApi`] lists exactly the calls the reconciler, teardown and upload
//! paths make against the provider. [`S3Handle`](crate::client::S3Handle) is the
//! real implementation; tests substitute an in-memory one.

use crate::error::{Error, ProviderError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result of a provider call before classification
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Operations issued against one storage endpoint
#[async_trait]
pub trait StorageApi: Send + Sync {
    /// Existence probe. `NotFound` when absent, `Forbidden` when not ours.
    async fn head_bucket(&self, bucket: &str) -> ProviderResult<()>;

    async fn create_bucket(&self, bucket: &str, region: &str) -> ProviderResult<()>;

    async fn delete_bucket(&self, bucket: &str) -> ProviderResult<()>;

    /// Sets acceleration to `Enabled` or `Suspended`
    async fn put_bucket_accelerate(&self, bucket: &str, enabled: bool) -> ProviderResult<()>;

    async fn put_bucket_cors(&self, bucket: &str, cors: &CorsConfiguration) -> ProviderResult<()>;

    /// One page of keys, starting after `continuation` when given
    async fn list_objects(
        &self,
        bucket: &str,
        continuation: Option<String>,
    ) -> ProviderResult<ObjectPage>;

    async fn delete_object(&self, bucket: &str, key: &str) -> ProviderResult<()>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> ProviderResult<()>;

    /// Starts a multipart upload and returns its upload id
    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
    ) -> ProviderResult<String>;

    /// Uploads one part and returns its ETag
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> ProviderResult<String>;

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> ProviderResult<()>;

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> ProviderResult<()>;
}

/// A page of object keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectPage {
    pub keys: Vec<String>,
    /// Present when more pages follow
    pub next: Option<String>,
}

/// A part acknowledged by the provider during a multipart upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: i32,
    pub etag: String,
}

const CORS_METHODS: &[&str] = &["GET", "PUT", "POST", "DELETE", "HEAD"];

/// CORS configuration for a bucket
///
/// Accepts the camelCase layout used by the config files as well as the
/// PascalCase layout of the provider API (`CORSRules`, `AllowedOrigins`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorsConfiguration {
    #[serde(alias = "CORSRules", alias = "corsRules")]
    pub rules: Vec<CorsRule>,
}

/// CORS rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorsRule {
    #[serde(default, alias = "ID", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(alias = "AllowedOrigins")]
    pub allowed_origins: Vec<String>,
    #[serde(alias = "AllowedMethods")]
    pub allowed_methods: Vec<String>,
    #[serde(default, alias = "AllowedHeaders", skip_serializing_if = "Vec::is_empty")]
    pub allowed_headers: Vec<String>,
    #[serde(default, alias = "ExposeHeaders", skip_serializing_if = "Vec::is_empty")]
    pub expose_headers: Vec<String>,
    #[serde(default, alias = "MaxAgeSeconds", skip_serializing_if = "Option::is_none")]
    pub max_age_seconds: Option<i32>,
}

impl CorsConfiguration {
    /// Reject rule sets the provider would refuse
    pub fn validate(&self) -> Result<()> {
        if self.rules.is_empty() {
            return Err(Error::Validation(
                "CORS configuration must contain at least one rule".to_string(),
            ));
        }

        for (i, rule) in self.rules.iter().enumerate() {
            if rule.allowed_origins.is_empty() {
                return Err(Error::Validation(format!(
                    "CORS rule {} has no allowed origins",
                    i + 1
                )));
            }
            if rule.allowed_methods.is_empty() {
                return Err(Error::Validation(format!(
                    "CORS rule {} has no allowed methods",
                    i + 1
                )));
            }
            if let Some(method) = rule
                .allowed_methods
                .iter()
                .find(|m| !CORS_METHODS.contains(&m.as_str()))
            {
                return Err(Error::Validation(format!(
                    "CORS rule {} uses unsupported method {} (expected one of {})",
                    i + 1,
                    method,
                    CORS_METHODS.join(", ")
                )));
            }
        }

        Ok(())
    }
}
