//! Error types for s3pilot-core

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for s3pilot-core
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for s3pilot-core
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file not found
    #[error("Configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    /// Invalid configuration format
    #[error("Invalid configuration format: {0}")]
    InvalidConfig(String),

    /// Desired configuration rejected before any remote call
    #[error("{0}")]
    Validation(String),

    /// Bucket names are global; someone else owns this one
    #[error("Bucket name \"{0}\" is already taken.")]
    BucketNameTaken(String),

    /// Forbidden response without a message. Providers answer HEAD with an
    /// empty body, so bad credentials and a foreign bucket look the same.
    #[error("Forbidden: Invalid credentials or this AWS S3 bucket name may already be taken")]
    AmbiguousForbidden,

    /// Unclassified provider failure, passed through unchanged
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The bucket never became visible within the configured attempts
    #[error("{operation} on bucket \"{bucket}\" still not visible after {attempts} attempts")]
    RetriesExhausted {
        bucket: String,
        operation: String,
        attempts: u32,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] toml::de::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Archive packing error
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Classify a provider failure against `bucket`.
    ///
    /// The empty-message branch is a best-effort heuristic: it only tells
    /// "we could not read an explanation" apart from an explicit refusal.
    pub fn from_provider(bucket: &str, err: ProviderError) -> Self {
        match err.kind() {
            ProviderErrorKind::Forbidden if err.message().map_or(true, str::is_empty) => {
                Error::AmbiguousForbidden
            }
            ProviderErrorKind::Forbidden | ProviderErrorKind::NameTaken => {
                Error::BucketNameTaken(bucket.to_string())
            }
            _ => Error::Provider(err),
        }
    }

    /// True for failures a later attempt can never fix
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Error::Validation(_) | Error::BucketNameTaken(_) | Error::AmbiguousForbidden
        )
    }
}

/// Broad classes of provider error codes the reconciler reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// `NotFound` / `NoSuchBucket` / HTTP 404
    NotFound,
    /// `BucketAlreadyExists`: owned by another account
    NameTaken,
    /// `BucketAlreadyOwnedByYou`
    AlreadyOwned,
    /// `Forbidden` / `AccessDenied` / HTTP 403
    Forbidden,
    Other,
}

/// Error returned by a [`StorageApi`](crate::provider::StorageApi) call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    kind: ProviderErrorKind,
    code: Option<String>,
    message: Option<String>,
    status: Option<u16>,
}

impl ProviderError {
    /// Build an error from the raw pieces a provider response exposes
    pub fn new(code: Option<String>, message: Option<String>, status: Option<u16>) -> Self {
        let kind = classify(code.as_deref(), status);
        Self {
            kind,
            code,
            message,
            status,
        }
    }

    /// Shorthand for a coded error without HTTP context
    pub fn coded(code: &str, message: &str) -> Self {
        let message = (!message.is_empty()).then(|| message.to_string());
        Self::new(Some(code.to_string()), message, None)
    }

    pub fn kind(&self) -> ProviderErrorKind {
        self.kind
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ProviderErrorKind::NotFound
    }
}

fn classify(code: Option<&str>, status: Option<u16>) -> ProviderErrorKind {
    match (code, status) {
        (Some("NotFound" | "NoSuchBucket"), _) => ProviderErrorKind::NotFound,
        (Some("BucketAlreadyExists"), _) => ProviderErrorKind::NameTaken,
        (Some("BucketAlreadyOwnedByYou"), _) => ProviderErrorKind::AlreadyOwned,
        (Some("Forbidden" | "AccessDenied"), _) => ProviderErrorKind::Forbidden,
        (_, Some(404)) => ProviderErrorKind::NotFound,
        (_, Some(403)) => ProviderErrorKind::Forbidden,
        _ => ProviderErrorKind::Other,
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S3 operation failed")?;
        if let Some(code) = &self.code {
            write!(f, " ({code})")?;
        } else if let Some(status) = self.status {
            write!(f, " (HTTP {status})")?;
        }
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ProviderError {}

// Generic SdkError conversion for all S3 operations
impl<E> From<aws_sdk_s3::error::SdkError<E>> for ProviderError
where
    E: aws_sdk_s3::error::ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    fn from(err: aws_sdk_s3::error::SdkError<E>) -> Self {
        use aws_sdk_s3::error::ProvideErrorMetadata;

        let status = err.raw_response().map(|r| r.status().as_u16());
        let code = err.code().map(str::to_string);
        let message = match err.message() {
            Some(m) => Some(m.to_string()),
            // Transport failures carry no metadata; keep the context chain
            None if code.is_none() && status.is_none() => Some(
                aws_sdk_s3::error::DisplayErrorContext(&err).to_string(),
            ),
            None => None,
        };
        ProviderError::new(code, message, status)
    }
}

// ByteStreamError conversion
impl From<aws_sdk_s3::primitives::ByteStreamError> for ProviderError {
    fn from(err: aws_sdk_s3::primitives::ByteStreamError) -> Self {
        ProviderError::new(None, Some(err.to_string()), None)
    }
}
