//! In-memory provider for tests

use crate::client::{ClientFactory, ClientPair};
use crate::error::ProviderError;
use crate::provider::{CompletedPart, CorsConfiguration, ObjectPage, ProviderResult, StorageApi};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// A recorded provider call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Head(String),
    Create { bucket: String, region: String },
    DeleteBucket(String),
    Accelerate { bucket: String, enabled: bool },
    Cors(String),
    List(String),
    DeleteObject { bucket: String, key: String },
    Put { bucket: String, key: String, size: usize },
    CreateMultipart { bucket: String, key: String },
    UploadPart { key: String, part_number: i32, size: usize },
    CompleteMultipart { key: String, parts: usize },
    AbortMultipart { key: String },
}

#[derive(Debug, Clone, Default)]
pub struct MockBucket {
    pub region: String,
    pub accelerated: Option<bool>,
    pub cors: Option<CorsConfiguration>,
    pub objects: BTreeMap<String, (Vec<u8>, String)>,
}

#[derive(Debug, Default)]
pub struct World {
    pub buckets: HashMap<String, MockBucket>,
    /// Not-found answers still owed for a freshly created bucket
    pub lag: HashMap<String, u32>,
    /// Lag applied to every bucket created from now on
    pub lag_after_create: u32,
    /// Names owned by another account
    pub foreign: HashSet<String>,
    /// Message attached to forbidden answers; `None` mimics an empty HEAD body
    pub forbidden_message: Option<String>,
    pub page_size: usize,
    /// Keys whose deletion fails with an internal error
    pub undeletable: HashSet<String>,
    /// Keys whose single-part upload fails with an internal error
    pub failing_puts: HashSet<String>,
    /// Not-found answers owed to the next acceleration calls
    pub accelerate_lag: u32,
    /// Not-found answers owed to the next CORS calls
    pub cors_lag: u32,
    /// Part number whose upload fails
    pub failing_part: Option<i32>,
    pub uploads: HashMap<String, Vec<(i32, Vec<u8>)>>,
    pub calls: Vec<(&'static str, Call)>,
}

impl World {
    fn check_visible(&mut self, bucket: &str) -> ProviderResult<()> {
        if self.foreign.contains(bucket) {
            let message = self.forbidden_message.clone().unwrap_or_default();
            return Err(ProviderError::new(
                Some("Forbidden".to_string()).filter(|_| !message.is_empty()),
                Some(message).filter(|m| !m.is_empty()),
                Some(403),
            ));
        }
        if let Some(remaining) = self.lag.get_mut(bucket) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ProviderError::coded("NoSuchBucket", "bucket not visible yet"));
            }
        }
        if !self.buckets.contains_key(bucket) {
            return Err(ProviderError::coded("NoSuchBucket", "The specified bucket does not exist"));
        }
        Ok(())
    }

    fn bucket_mut(&mut self, bucket: &str) -> ProviderResult<&mut MockBucket> {
        self.check_visible(bucket)?;
        self.buckets
            .get_mut(bucket)
            .ok_or_else(|| ProviderError::coded("NoSuchBucket", "gone"))
    }
}

/// Shared handle to the simulated provider
#[derive(Debug, Clone, Default)]
pub struct MockProvider {
    world: Arc<Mutex<World>>,
}

impl MockProvider {
    pub fn new() -> Self {
        let provider = Self::default();
        provider.world().page_size = 1000;
        provider
    }

    pub fn world(&self) -> MutexGuard<'_, World> {
        self.world.lock().unwrap()
    }

    pub fn handle(&self, label: &'static str) -> MockStorage {
        MockStorage {
            world: self.world.clone(),
            label,
        }
    }

    pub fn pair(&self) -> ClientPair<MockStorage> {
        ClientPair::new(self.handle("regular"), self.handle("accelerated"))
    }

    pub fn factory(&self) -> MockFactory {
        MockFactory {
            provider: self.clone(),
            regions: Arc::new(Mutex::new(Vec::new())),
            acceleration: true,
        }
    }

    /// Seed an existing bucket with objects
    pub fn seed(&self, bucket: &str, region: &str, keys: &[&str]) {
        let mut world = self.world();
        let entry = world.buckets.entry(bucket.to_string()).or_default();
        entry.region = region.to_string();
        for key in keys {
            entry
                .objects
                .insert(key.to_string(), (key.as_bytes().to_vec(), "text/plain".to_string()));
        }
    }

    pub fn bucket(&self, bucket: &str) -> Option<MockBucket> {
        self.world().buckets.get(bucket).cloned()
    }

    pub fn calls(&self) -> Vec<(&'static str, Call)> {
        self.world().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.world().calls.iter().filter(|(_, c)| pred(c)).count()
    }

    /// Labels of the handles that served calls matching `pred`
    pub fn handles_for(&self, pred: impl Fn(&Call) -> bool) -> Vec<&'static str> {
        self.world()
            .calls
            .iter()
            .filter(|(_, c)| pred(c))
            .map(|(label, _)| *label)
            .collect()
    }
}

/// One handle onto the mock provider, labelled like the real pair
#[derive(Debug, Clone)]
pub struct MockStorage {
    world: Arc<Mutex<World>>,
    label: &'static str,
}

impl MockStorage {
    fn record(&self, call: Call) -> MutexGuard<'_, World> {
        let mut world = self.world.lock().unwrap();
        world.calls.push((self.label, call));
        world
    }
}

#[async_trait]
impl StorageApi for MockStorage {
    async fn head_bucket(&self, bucket: &str) -> ProviderResult<()> {
        let mut world = self.record(Call::Head(bucket.to_string()));
        world.check_visible(bucket).map_err(|e| {
            // HEAD answers carry no body
            if e.is_not_found() {
                ProviderError::new(Some("NotFound".to_string()), None, Some(404))
            } else {
                e
            }
        })
    }

    async fn create_bucket(&self, bucket: &str, region: &str) -> ProviderResult<()> {
        let mut world = self.record(Call::Create {
            bucket: bucket.to_string(),
            region: region.to_string(),
        });
        if world.foreign.contains(bucket) {
            return Err(ProviderError::coded("BucketAlreadyExists", "owned by someone else"));
        }
        if world.buckets.contains_key(bucket) {
            return Err(ProviderError::coded("BucketAlreadyOwnedByYou", "yours already"));
        }
        world.buckets.insert(
            bucket.to_string(),
            MockBucket {
                region: region.to_string(),
                ..MockBucket::default()
            },
        );
        let lag = world.lag_after_create;
        world.lag.insert(bucket.to_string(), lag);
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> ProviderResult<()> {
        let mut world = self.record(Call::DeleteBucket(bucket.to_string()));
        let empty = world.bucket_mut(bucket)?.objects.is_empty();
        if !empty {
            return Err(ProviderError::coded(
                "BucketNotEmpty",
                "The bucket you tried to delete is not empty",
            ));
        }
        world.buckets.remove(bucket);
        Ok(())
    }

    async fn put_bucket_accelerate(&self, bucket: &str, enabled: bool) -> ProviderResult<()> {
        let mut world = self.record(Call::Accelerate {
            bucket: bucket.to_string(),
            enabled,
        });
        if world.accelerate_lag > 0 {
            world.accelerate_lag -= 1;
            return Err(ProviderError::coded("NoSuchBucket", "bucket not visible yet"));
        }
        world.bucket_mut(bucket)?.accelerated = Some(enabled);
        Ok(())
    }

    async fn put_bucket_cors(&self, bucket: &str, cors: &CorsConfiguration) -> ProviderResult<()> {
        let mut world = self.record(Call::Cors(bucket.to_string()));
        if world.cors_lag > 0 {
            world.cors_lag -= 1;
            return Err(ProviderError::coded("NoSuchBucket", "bucket not visible yet"));
        }
        world.bucket_mut(bucket)?.cors = Some(cors.clone());
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        continuation: Option<String>,
    ) -> ProviderResult<ObjectPage> {
        let mut world = self.record(Call::List(bucket.to_string()));
        let page_size = world.page_size.max(1);
        let objects = &world.bucket_mut(bucket)?.objects;

        let mut keys: Vec<String> = objects
            .keys()
            .filter(|k| continuation.as_ref().map_or(true, |c| *k > c))
            .take(page_size + 1)
            .cloned()
            .collect();

        let next = if keys.len() > page_size {
            keys.truncate(page_size);
            keys.last().cloned()
        } else {
            None
        };

        Ok(ObjectPage { keys, next })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> ProviderResult<()> {
        let mut world = self.record(Call::DeleteObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        if world.undeletable.contains(key) {
            return Err(ProviderError::coded("InternalError", "We encountered an internal error"));
        }
        world.bucket_mut(bucket)?.objects.remove(key);
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> ProviderResult<()> {
        let mut world = self.record(Call::Put {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size: body.len(),
        });
        if world.failing_puts.contains(key) {
            return Err(ProviderError::coded("InternalError", "We encountered an internal error"));
        }
        world
            .bucket_mut(bucket)?
            .objects
            .insert(key.to_string(), (body, content_type.to_string()));
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        _content_type: &str,
    ) -> ProviderResult<String> {
        let mut world = self.record(Call::CreateMultipart {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        world.bucket_mut(bucket)?;
        let upload_id = format!("upload-{}", world.uploads.len() + 1);
        world.uploads.insert(upload_id.clone(), Vec::new());
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> ProviderResult<String> {
        let mut world = self.record(Call::UploadPart {
            key: key.to_string(),
            part_number,
            size: body.len(),
        });
        if world.failing_part == Some(part_number) {
            return Err(ProviderError::coded("RequestTimeout", "part upload timed out"));
        }
        let parts = world
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| ProviderError::coded("NoSuchUpload", "unknown upload"))?;
        parts.push((part_number, body));
        Ok(format!("\"etag-{}\"", part_number))
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> ProviderResult<()> {
        let mut world = self.record(Call::CompleteMultipart {
            key: key.to_string(),
            parts: parts.len(),
        });
        let mut uploaded = world
            .uploads
            .remove(upload_id)
            .ok_or_else(|| ProviderError::coded("NoSuchUpload", "unknown upload"))?;
        uploaded.sort_by_key(|(n, _)| *n);
        let body = uploaded.into_iter().flat_map(|(_, b)| b).collect();
        world
            .bucket_mut(bucket)?
            .objects
            .insert(key.to_string(), (body, "multipart".to_string()));
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        _bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> ProviderResult<()> {
        let mut world = self.record(Call::AbortMultipart {
            key: key.to_string(),
        });
        world.uploads.remove(upload_id);
        Ok(())
    }
}

/// Factory handing out pairs onto one [`MockProvider`], remembering regions
#[derive(Debug, Clone)]
pub struct MockFactory {
    provider: MockProvider,
    regions: Arc<Mutex<Vec<String>>>,
    acceleration: bool,
}

impl MockFactory {
    pub fn regions(&self) -> Vec<String> {
        self.regions.lock().unwrap().clone()
    }

    /// Behave like an S3-compatible endpoint with no acceleration support
    pub fn without_acceleration(mut self) -> Self {
        self.acceleration = false;
        self
    }
}

impl ClientFactory for MockFactory {
    type Handle = MockStorage;

    fn connect(&self, region: &str) -> ClientPair<MockStorage> {
        self.regions.lock().unwrap().push(region.to_string());
        self.provider.pair()
    }

    fn supports_acceleration(&self) -> bool {
        self.acceleration
    }
}
