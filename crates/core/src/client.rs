//! S3 client pair built on the AWS S3 SDK

use crate::config::AwsConfig;
use crate::error::ProviderError;
use crate::provider::{CompletedPart, CorsConfiguration, ObjectPage, ProviderResult, StorageApi};
use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::Region,
    primitives::ByteStream,
    types::{
        AccelerateConfiguration, BucketAccelerateStatus, BucketLocationConstraint,
        CompletedMultipartUpload, CreateBucketConfiguration,
    },
    Client,
};
use aws_smithy_types::error::operation::BuildError;

/// Region buckets land in when none is configured
pub const DEFAULT_REGION: &str = "us-east-1";

/// The two logical handles for one region.
///
/// Bucket creation and deletion are not available through the accelerated
/// endpoint, so control-plane calls always go through `regular`.
#[derive(Debug, Clone)]
pub struct ClientPair<H> {
    pub regular: H,
    pub accelerated: H,
}

impl<H> ClientPair<H> {
    pub fn new(regular: H, accelerated: H) -> Self {
        Self {
            regular,
            accelerated,
        }
    }

    /// Data-plane handle matching a bucket's acceleration mode
    pub fn select(&self, accelerated: bool) -> &H {
        if accelerated {
            &self.accelerated
        } else {
            &self.regular
        }
    }

    /// Control-plane handle
    pub fn control(&self) -> &H {
        &self.regular
    }
}

/// Builds a client pair per region
pub trait ClientFactory: Send + Sync {
    type Handle: StorageApi;

    fn connect(&self, region: &str) -> ClientPair<Self::Handle>;

    /// Whether the endpoint understands bucket transfer acceleration
    fn supports_acceleration(&self) -> bool {
        true
    }
}

/// Factory backed by the AWS SDK configuration chain
#[derive(Debug, Clone)]
pub struct AwsClientFactory {
    sdk_config: aws_config::SdkConfig,
    credentials: Option<Credentials>,
    endpoint_url: Option<String>,
}

impl AwsClientFactory {
    /// Load the default provider chain, overridden by explicit keys in `config`
    pub async fn new(config: &AwsConfig) -> Self {
        let sdk_config = aws_config::load_from_env().await;

        let credentials = match (&config.access_key_id, &config.secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => Some(Credentials::new(
                access_key_id,
                secret_access_key,
                config.session_token.clone(),
                None,
                "s3pilot",
            )),
            _ => None,
        };

        Self {
            sdk_config,
            credentials,
            endpoint_url: config.endpoint_url.clone(),
        }
    }
}

impl ClientFactory for AwsClientFactory {
    type Handle = S3Handle;

    fn connect(&self, region: &str) -> ClientPair<S3Handle> {
        let mut builder = aws_sdk_s3::config::Builder::from(&self.sdk_config)
            .region(Region::new(region.to_string()));

        if let Some(credentials) = &self.credentials {
            builder = builder.credentials_provider(credentials.clone());
        }

        if let Some(endpoint) = &self.endpoint_url {
            // Emulators have no accelerate endpoint; both handles hit the same URL
            tracing::debug!(endpoint = %endpoint, "using custom S3 endpoint");
            let config = builder.endpoint_url(endpoint).force_path_style(true).build();
            let client = Client::from_conf(config);
            return ClientPair::new(
                S3Handle::new(client.clone(), "regular"),
                S3Handle::new(client, "accelerated"),
            );
        }

        let config = builder.build();
        let accelerated = config.to_builder().accelerate(true).build();

        ClientPair::new(
            S3Handle::new(Client::from_conf(config), "regular"),
            S3Handle::new(Client::from_conf(accelerated), "accelerated"),
        )
    }

    fn supports_acceleration(&self) -> bool {
        self.endpoint_url.is_none()
    }
}

/// One S3 endpoint
#[derive(Debug, Clone)]
pub struct S3Handle {
    client: Client,
    label: &'static str,
}

impl S3Handle {
    pub fn new(client: Client, label: &'static str) -> Self {
        Self { client, label }
    }

    /// `regular` or `accelerated`
    pub fn label(&self) -> &'static str {
        self.label
    }
}

impl From<BuildError> for ProviderError {
    fn from(err: BuildError) -> Self {
        ProviderError::new(None, Some(err.to_string()), None)
    }
}

fn to_sdk_cors(
    cors: &CorsConfiguration,
) -> ProviderResult<aws_sdk_s3::types::CorsConfiguration> {
    use aws_sdk_s3::types::CorsRule as S3CorsRule;

    let mut rules = Vec::with_capacity(cors.rules.len());

    for rule in &cors.rules {
        let mut builder = S3CorsRule::builder()
            .set_id(rule.id.clone())
            .set_allowed_origins(Some(rule.allowed_origins.clone()))
            .set_allowed_methods(Some(rule.allowed_methods.clone()));

        if !rule.allowed_headers.is_empty() {
            builder = builder.set_allowed_headers(Some(rule.allowed_headers.clone()));
        }
        if !rule.expose_headers.is_empty() {
            builder = builder.set_expose_headers(Some(rule.expose_headers.clone()));
        }
        if let Some(max_age) = rule.max_age_seconds {
            builder = builder.max_age_seconds(max_age);
        }

        rules.push(builder.build()?);
    }

    Ok(aws_sdk_s3::types::CorsConfiguration::builder()
        .set_cors_rules(Some(rules))
        .build()?)
}

#[async_trait]
impl StorageApi for S3Handle {
    async fn head_bucket(&self, bucket: &str) -> ProviderResult<()> {
        self.client.head_bucket().bucket(bucket).send().await?;
        Ok(())
    }

    async fn create_bucket(&self, bucket: &str, region: &str) -> ProviderResult<()> {
        let mut request = self.client.create_bucket().bucket(bucket);

        // us-east-1 rejects an explicit location constraint
        if region != DEFAULT_REGION {
            let config = CreateBucketConfiguration::builder()
                .location_constraint(BucketLocationConstraint::from(region))
                .build();
            request = request.create_bucket_configuration(config);
        }

        request.send().await?;
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> ProviderResult<()> {
        self.client.delete_bucket().bucket(bucket).send().await?;
        Ok(())
    }

    async fn put_bucket_accelerate(&self, bucket: &str, enabled: bool) -> ProviderResult<()> {
        let status = if enabled {
            BucketAccelerateStatus::Enabled
        } else {
            BucketAccelerateStatus::Suspended
        };

        self.client
            .put_bucket_accelerate_configuration()
            .bucket(bucket)
            .accelerate_configuration(AccelerateConfiguration::builder().status(status).build())
            .send()
            .await?;

        Ok(())
    }

    async fn put_bucket_cors(&self, bucket: &str, cors: &CorsConfiguration) -> ProviderResult<()> {
        self.client
            .put_bucket_cors()
            .bucket(bucket)
            .cors_configuration(to_sdk_cors(cors)?)
            .send()
            .await?;

        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        continuation: Option<String>,
    ) -> ProviderResult<ObjectPage> {
        tracing::trace!(handle = self.label, bucket, "ListObjectsV2");
        let response = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .set_continuation_token(continuation)
            .send()
            .await?;

        let keys = response
            .contents()
            .iter()
            .filter_map(|obj| obj.key().map(str::to_string))
            .collect();

        let next = if response.is_truncated().unwrap_or(false) {
            response.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ObjectPage { keys, next })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> ProviderResult<()> {
        tracing::trace!(handle = self.label, bucket, key, "DeleteObject");
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await?;

        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> ProviderResult<()> {
        tracing::trace!(handle = self.label, bucket, key, size = body.len(), "PutObject");
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await?;

        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
    ) -> ProviderResult<String> {
        let response = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await?;

        response.upload_id().map(str::to_string).ok_or_else(|| {
            ProviderError::new(
                None,
                Some("CreateMultipartUpload returned no upload id".to_string()),
                None,
            )
        })
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> ProviderResult<String> {
        tracing::trace!(handle = self.label, bucket, key, part_number, "UploadPart");
        let response = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await?;

        Ok(response.e_tag().unwrap_or_default().to_string())
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> ProviderResult<()> {
        let parts = parts
            .into_iter()
            .map(|p| {
                aws_sdk_s3::types::CompletedPart::builder()
                    .e_tag(p.etag)
                    .part_number(p.part_number)
                    .build()
            })
            .collect();

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await?;

        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> ProviderResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await?;

        Ok(())
    }
}
