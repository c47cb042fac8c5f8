//! Bucket reconciliation
//!
//! [`Reconciler::deploy`] converges one bucket towards the desired
//! configuration and returns the state to persist. Nothing is written here:
//! the caller saves the returned [`BucketState`] only when the whole run
//! succeeded, so a failed step leaves the previous snapshot in place.

use crate::client::{ClientFactory, DEFAULT_REGION};
use crate::error::{Error, ProviderError, ProviderErrorKind, Result};
use crate::provider::{CorsConfiguration, StorageApi};
use crate::retry::{cancellable, retry_while_missing, RetryPolicy};
use crate::state::BucketState;
use crate::upload::MultipartUploadConfig;
use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Desired bucket configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployInputs {
    /// Falls back to the persisted name when absent
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_accelerated")]
    pub accelerated: bool,
    /// Absent leaves any existing CORS rules untouched
    #[serde(default)]
    pub cors: Option<CorsConfiguration>,
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_accelerated() -> bool {
    true
}

impl Default for DeployInputs {
    fn default() -> Self {
        Self {
            name: None,
            region: default_region(),
            accelerated: default_accelerated(),
            cors: None,
        }
    }
}

impl DeployInputs {
    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::default()
        }
    }
}

/// Check a bucket name against the provider's naming rules.
///
/// Accelerated endpoints are addressed as `<bucket>.s3-accelerate...`, so a
/// dotted name would break the TLS wildcard match.
pub fn validate_bucket_name(name: &str, accelerated: bool) -> Result<()> {
    if accelerated && name.contains('.') {
        return Err(Error::Validation(
            "Accelerated buckets must be DNS-compliant and must NOT contain periods".to_string(),
        ));
    }

    if !(3..=63).contains(&name.len()) {
        return Err(Error::Validation(format!(
            "Bucket name \"{}\" must be between 3 and 63 characters long",
            name
        )));
    }

    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '.' || *c == '-'))
    {
        return Err(Error::Validation(format!(
            "Bucket name \"{}\" contains invalid character '{}' \
             (use lowercase letters, digits, '.' and '-')",
            name, c
        )));
    }

    let alnum = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
    if !alnum(name.chars().next()) || !alnum(name.chars().last()) {
        return Err(Error::Validation(format!(
            "Bucket name \"{}\" must start and end with a letter or digit",
            name
        )));
    }

    if name.contains("..") {
        return Err(Error::Validation(format!(
            "Bucket name \"{}\" must not contain consecutive periods",
            name
        )));
    }

    Ok(())
}

/// Drives one bucket through create, configure and teardown
#[derive(Debug, Clone)]
pub struct Reconciler<F> {
    pub(crate) factory: F,
    pub(crate) retry: RetryPolicy,
    pub(crate) cancel: CancellationToken,
    pub(crate) concurrency: usize,
    pub(crate) multipart: MultipartUploadConfig,
}

impl<F: ClientFactory> Reconciler<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            retry: RetryPolicy::default(),
            cancel: CancellationToken::new(),
            concurrency: 5,
            multipart: MultipartUploadConfig::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Token checked by every remote call and retry sleep
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Bound on concurrent deletes during teardown and uploads in a directory
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_multipart(mut self, multipart: MultipartUploadConfig) -> Self {
        self.multipart = multipart;
        self
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Converge the bucket to `inputs` and return the state to persist
    pub async fn deploy(
        &self,
        inputs: &DeployInputs,
        prior: &BucketState,
    ) -> Result<BucketState> {
        let name = inputs
            .name
            .as_deref()
            .or(prior.name.as_deref())
            .ok_or_else(|| {
                Error::Validation("No bucket name given and none found in state".to_string())
            })?;

        validate_bucket_name(name, inputs.accelerated)?;
        if let Some(cors) = &inputs.cors {
            cors.validate()?;
        }

        let acceleration = self.factory.supports_acceleration();
        if inputs.accelerated && !acceleration {
            return Err(Error::Validation(
                "Transfer acceleration is not available on a custom endpoint".to_string(),
            ));
        }

        tracing::info!("Deploying bucket {} in region {}.", name, inputs.region);

        let clients = self.factory.connect(&inputs.region);
        let control = clients.control();

        self.ensure_bucket(control, name, &inputs.region).await?;

        if acceleration {
            tracing::info!(
                "Setting acceleration to \"{}\" for bucket {}.",
                inputs.accelerated,
                name
            );
            self.set_acceleration(control, name, inputs.accelerated).await?;
        } else {
            tracing::debug!("Endpoint has no transfer acceleration; skipping it for {}.", name);
        }

        if let Some(cors) = &inputs.cors {
            tracing::info!("Setting cors for bucket {}.", name);
            self.set_cors(control, name, cors).await?;
        }

        if let Some(previous) = prior.identity().filter(|p| p.name != name) {
            tracing::info!(
                "Bucket name changed from {} to {}. Removing the previous bucket.",
                previous.name,
                name
            );
            self.teardown(&previous).await?;
        }

        tracing::info!(
            "Bucket {} was successfully deployed to the {} region.",
            name,
            inputs.region
        );

        Ok(BucketState::deployed(name, &inputs.region, inputs.accelerated))
    }

    /// Make sure `name` exists and is visible before anything configures it
    async fn ensure_bucket<H: StorageApi>(
        &self,
        control: &H,
        name: &str,
        region: &str,
    ) -> Result<()> {
        tracing::info!("Checking if bucket {} exists.", name);

        let probe = match cancellable(&self.cancel, control.head_bucket(name)).await? {
            Ok(()) => {
                tracing::debug!("Bucket {} already exists.", name);
                return Ok(());
            }
            Err(err) => err,
        };

        if !probe.is_not_found() {
            return Err(Error::from_provider(name, probe));
        }

        tracing::info!("Bucket {} does not exist. Creating...", name);
        match cancellable(&self.cancel, control.create_bucket(name, region)).await? {
            Ok(()) => {}
            Err(err) if err.kind() == ProviderErrorKind::AlreadyOwned => {
                tracing::debug!("Bucket {} appeared while creating it.", name);
            }
            Err(err) => return Err(Error::from_provider(name, err)),
        }

        // Creation is eventually consistent; later steps must not race it
        tracing::info!("Bucket {} created. Confirming it's ready...", name);
        retry_while_missing(&self.retry, &self.cancel, name, "HeadBucket", || {
            control.head_bucket(name)
        })
        .await?;
        tracing::info!("Bucket {} creation confirmed.", name);

        Ok(())
    }

    /// Always applied; reading the current status costs as much as setting it
    async fn set_acceleration<H: StorageApi>(
        &self,
        control: &H,
        name: &str,
        accelerated: bool,
    ) -> Result<()> {
        retry_while_missing(
            &self.retry,
            &self.cancel,
            name,
            "PutBucketAccelerateConfiguration",
            || control.put_bucket_accelerate(name, accelerated),
        )
        .await
    }

    async fn set_cors<H: StorageApi>(
        &self,
        control: &H,
        name: &str,
        cors: &CorsConfiguration,
    ) -> Result<()> {
        retry_while_missing(&self.retry, &self.cancel, name, "PutBucketCors", || {
            control.put_bucket_cors(name, cors)
        })
        .await
    }

    /// Run a single provider call under the cancellation token
    pub(crate) async fn remote<T, Fut>(&self, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = std::result::Result<T, ProviderError>>,
    {
        Ok(cancellable(&self.cancel, fut).await??)
    }
}
