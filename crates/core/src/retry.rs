//! Retries for eventually-consistent bucket operations
//!
//! Right after a bucket is created the provider may still answer
//! `NotFound`/`NoSuchBucket` for it. Those answers are propagation lag, so
//! they are retried on a fixed interval; every other failure is final.

use crate::error::{Error, ProviderError, ProviderErrorKind, Result};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How long to keep waiting for a bucket to become visible
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Sleep between attempts
    pub interval: Duration,
    /// Total attempts before giving up. `None` retries until the provider converges.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: None,
        }
    }
}

/// Run `fut`, returning [`Error::Cancelled`] if `cancel` fires first
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        out = fut => Ok(out),
    }
}

/// Retry `op` while the provider reports `bucket` as missing.
///
/// Forbidden and name-conflict answers fail immediately through
/// [`Error::from_provider`]; other errors are returned unchanged.
pub async fn retry_while_missing<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    bucket: &str,
    operation: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, ProviderError>>,
{
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        let err = match cancellable(cancel, op()).await? {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        match err.kind() {
            ProviderErrorKind::NotFound => {}
            ProviderErrorKind::Forbidden | ProviderErrorKind::NameTaken => {
                return Err(Error::from_provider(bucket, err));
            }
            _ => return Err(Error::Provider(err)),
        }

        if policy.max_attempts.is_some_and(|max| attempt >= max) {
            return Err(Error::RetriesExhausted {
                bucket: bucket.to_string(),
                operation: operation.to_string(),
                attempts: attempt,
            });
        }

        tracing::debug!(
            bucket,
            operation,
            attempt,
            "bucket not visible yet, retrying in {:?}",
            policy.interval
        );
        cancellable(cancel, tokio::time::sleep(policy.interval)).await?;
    }
}
