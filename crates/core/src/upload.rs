//! Content upload into the managed bucket
//!
//! The data-plane handle is chosen from the persisted acceleration mode, not
//! from the current call, because that is what the bucket was configured with.

use crate::client::{ClientFactory, DEFAULT_REGION};
use crate::error::{Error, Result};
use crate::provider::{CompletedPart, StorageApi};
use crate::reconcile::Reconciler;
use crate::state::BucketState;
use futures::{stream, StreamExt, TryStreamExt};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const ARCHIVE_CONTENT_TYPE: &str = "application/zip";

/// What to upload and where
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOptions {
    pub dir: Option<PathBuf>,
    pub file: Option<PathBuf>,
    /// Pack `dir` into a single archive object
    #[serde(default)]
    pub zip: bool,
    pub key: Option<String>,
    /// Overrides the persisted bucket name
    pub name: Option<String>,
    /// Overrides the persisted region
    pub region: Option<String>,
}

/// Multipart upload configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultipartUploadConfig {
    /// Payloads at or above this many bytes go through multipart upload
    pub threshold: u64,
    /// Bytes per part
    pub part_size: usize,
}

impl Default for MultipartUploadConfig {
    fn default() -> Self {
        Self {
            threshold: 16 * 1024 * 1024,
            part_size: 8 * 1024 * 1024,
        }
    }
}

/// Whether a payload of `size` bytes needs multipart upload
pub fn requires_multipart_upload(size: u64, config: &MultipartUploadConfig) -> bool {
    size > 0 && size >= config.threshold
}

/// Pack a directory into an in-memory `.zip`.
///
/// Entry names are relative to `dir` and always use `/` separators.
pub fn pack_dir(dir: &Path) -> Result<Vec<u8>> {
    tracing::debug!("Packing {} into an archive", dir.display());

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

    for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.depth() == 0 {
            continue;
        }

        let name = object_key(dir, entry.path())?;
        if entry.file_type().is_dir() {
            writer.add_directory(name, options)?;
        } else if entry.file_type().is_file() {
            writer.start_file(name, options)?;
            let mut file = std::fs::File::open(entry.path())?;
            std::io::copy(&mut file, &mut writer)?;
        }
    }

    let archive = writer.finish()?.into_inner();
    tracing::debug!("Archive created: {} bytes", archive.len());
    Ok(archive)
}

/// Random object key for an archive upload
pub fn default_archive_key() -> String {
    let id: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();
    format!("{}.zip", id.to_lowercase())
}

/// Key of `path` relative to `root`, joined with `/`
fn object_key(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .map_err(|e| Error::InvalidInput(e.to_string()))?;

    Ok(relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}

/// Every regular file under `dir`, paired with its object key
fn collect_files(dir: &Path) -> Result<Vec<(PathBuf, String)>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let key = object_key(dir, entry.path())?;
        files.push((entry.path().to_path_buf(), key));
    }

    Ok(files)
}

fn content_type_for(path: &Path) -> String {
    mime_guess::from_path(path).first_or_octet_stream().to_string()
}

impl<F: ClientFactory> Reconciler<F> {
    /// Push a directory, archive or single file into the bucket.
    ///
    /// A missing bucket identity or a missing path is logged and skipped.
    pub async fn upload(&self, options: &UploadOptions, state: &BucketState) -> Result<()> {
        let Some(bucket) = options.name.as_deref().or(state.name.as_deref()) else {
            tracing::warn!("No bucket name found in state.");
            return Ok(());
        };
        let region = options
            .region
            .as_deref()
            .or(state.region.as_deref())
            .unwrap_or(DEFAULT_REGION);

        let clients = self.factory.connect(region);
        let handle = clients.select(state.is_accelerated());

        if let Some(dir) = options.dir.as_deref().filter(|d| d.is_dir()) {
            if options.zip {
                let key = options.key.clone().unwrap_or_else(default_archive_key);
                tracing::info!(
                    "Uploading {} to {}/{} as an archive.",
                    dir.display(),
                    bucket,
                    key
                );

                let source = dir.to_path_buf();
                let archive = tokio::task::spawn_blocking(move || pack_dir(&source))
                    .await
                    .map_err(std::io::Error::other)??;
                self.upload_bytes(handle, bucket, &key, archive, ARCHIVE_CONTENT_TYPE)
                    .await?;
            } else {
                tracing::info!("Uploading contents of {} to {}.", dir.display(), bucket);
                let count = self.upload_dir(handle, bucket, dir).await?;
                tracing::info!("Uploaded {} files to {}.", count, bucket);
            }
        } else if let Some(file) = options.file.as_deref().filter(|f| f.is_file()) {
            let key = match &options.key {
                Some(key) => key.clone(),
                None => file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or_else(|| {
                        Error::InvalidInput(format!(
                            "Cannot derive a key from {}",
                            file.display()
                        ))
                    })?,
            };
            tracing::info!("Uploading {} to {}/{}.", file.display(), bucket, key);
            self.upload_file(handle, bucket, &key, file).await?;
        } else {
            tracing::warn!("Nothing to upload: no existing directory or file given.");
        }

        Ok(())
    }

    async fn upload_dir<H: StorageApi>(
        &self,
        handle: &H,
        bucket: &str,
        dir: &Path,
    ) -> Result<usize> {
        let root = dir.to_path_buf();
        let files = tokio::task::spawn_blocking(move || collect_files(&root))
            .await
            .map_err(std::io::Error::other)??;
        let count = files.len();

        stream::iter(files.iter())
            .map(|(path, key)| self.upload_file(handle, bucket, key, path))
            .buffer_unordered(self.concurrency)
            .try_collect::<Vec<()>>()
            .await?;

        Ok(count)
    }

    async fn upload_file<H: StorageApi>(
        &self,
        handle: &H,
        bucket: &str,
        key: &str,
        path: &Path,
    ) -> Result<()> {
        let size = tokio::fs::metadata(path).await?.len();
        let content_type = content_type_for(path);

        if requires_multipart_upload(size, &self.multipart) {
            let file = tokio::fs::File::open(path).await?;
            self.multipart_upload(handle, bucket, key, &content_type, file)
                .await
        } else {
            let body = tokio::fs::read(path).await?;
            self.remote(handle.put_object(bucket, key, body, &content_type))
                .await
        }
    }

    async fn upload_bytes<H: StorageApi>(
        &self,
        handle: &H,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        if requires_multipart_upload(body.len() as u64, &self.multipart) {
            self.multipart_upload(handle, bucket, key, content_type, body.as_slice())
                .await
        } else {
            self.remote(handle.put_object(bucket, key, body, content_type))
                .await
        }
    }

    /// Multipart upload reading parts from `reader`; aborted on any failure
    async fn multipart_upload<H, R>(
        &self,
        handle: &H,
        bucket: &str,
        key: &str,
        content_type: &str,
        mut reader: R,
    ) -> Result<()>
    where
        H: StorageApi,
        R: AsyncRead + Unpin + Send,
    {
        let upload_id = self
            .remote(handle.create_multipart_upload(bucket, key, content_type))
            .await?;

        let parts = match self
            .upload_parts(handle, bucket, key, &upload_id, &mut reader)
            .await
        {
            Ok(parts) => parts,
            Err(err) => {
                tracing::warn!("Multipart upload of {} failed, aborting: {}", key, err);
                if let Err(abort) = handle.abort_multipart_upload(bucket, key, &upload_id).await {
                    tracing::warn!("Could not abort multipart upload {}: {}", upload_id, abort);
                }
                return Err(err);
            }
        };

        self.remote(handle.complete_multipart_upload(bucket, key, &upload_id, parts))
            .await
    }

    async fn upload_parts<H, R>(
        &self,
        handle: &H,
        bucket: &str,
        key: &str,
        upload_id: &str,
        reader: &mut R,
    ) -> Result<Vec<CompletedPart>>
    where
        H: StorageApi,
        R: AsyncRead + Unpin + Send,
    {
        let mut parts = Vec::new();
        let mut part_number: i32 = 1;

        loop {
            let mut chunk = Vec::new();
            (&mut *reader)
                .take(self.multipart.part_size as u64)
                .read_to_end(&mut chunk)
                .await?;

            if chunk.is_empty() {
                break;
            }

            let size = chunk.len();
            let etag = self
                .remote(handle.upload_part(bucket, key, upload_id, part_number, chunk))
                .await?;
            tracing::debug!("{}: part {} uploaded ({} bytes)", key, part_number, size);

            parts.push(CompletedPart { part_number, etag });
            part_number += 1;
        }

        Ok(parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Call, MockProvider};
    use std::fs;
    use std::io::Read;
    use tempfile::tempdir;

    fn small_parts() -> MultipartUploadConfig {
        MultipartUploadConfig {
            threshold: 10,
            part_size: 4,
        }
    }

    fn deployed(provider: &MockProvider, accelerated: bool) -> BucketState {
        provider.seed("site", "us-east-1", &[]);
        BucketState::deployed("site", "us-east-1", accelerated)
    }

    #[test]
    fn test_requires_multipart_upload() {
        let config = MultipartUploadConfig::default();

        assert!(!requires_multipart_upload(0, &config));
        assert!(!requires_multipart_upload(16 * 1024 * 1024 - 1, &config));
        assert!(requires_multipart_upload(16 * 1024 * 1024, &config));
    }

    #[test]
    fn test_default_archive_key() {
        let key = default_archive_key();

        assert!(key.ends_with(".zip"));
        assert_eq!(key.len(), 14);
        assert_eq!(key, key.to_lowercase());
        assert_ne!(key, default_archive_key());
    }

    #[test]
    fn test_collect_files_uses_slash_keys() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("css").join("vendor")).unwrap();
        fs::write(dir.path().join("index.html"), "<html>").unwrap();
        fs::write(dir.path().join("css").join("vendor").join("reset.css"), "*{}").unwrap();

        let mut keys: Vec<String> = collect_files(dir.path())
            .unwrap()
            .into_iter()
            .map(|(_, key)| key)
            .collect();
        keys.sort();

        assert_eq!(keys, vec!["css/vendor/reset.css", "index.html"]);
    }

    #[tokio::test]
    async fn test_upload_file_uses_accelerated_handle() {
        let provider = MockProvider::new();
        let state = deployed(&provider, true);
        let dir = tempdir().unwrap();
        let file = dir.path().join("report.json");
        fs::write(&file, "{}").unwrap();

        let options = UploadOptions {
            file: Some(file),
            ..UploadOptions::default()
        };
        Reconciler::new(provider.factory())
            .upload(&options, &state)
            .await
            .unwrap();

        assert_eq!(
            provider.handles_for(|c| matches!(c, Call::Put { .. })),
            vec!["accelerated"]
        );
        let (body, content_type) = provider.bucket("site").unwrap().objects["report.json"].clone();
        assert_eq!(body, b"{}");
        assert_eq!(content_type, "application/json");
    }

    #[tokio::test]
    async fn test_upload_file_uses_regular_handle() {
        let provider = MockProvider::new();
        let state = deployed(&provider, false);
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, "hello").unwrap();

        let options = UploadOptions {
            file: Some(file),
            key: Some("docs/a.txt".to_string()),
            ..UploadOptions::default()
        };
        Reconciler::new(provider.factory())
            .upload(&options, &state)
            .await
            .unwrap();

        assert_eq!(
            provider.handles_for(|c| matches!(c, Call::Put { .. })),
            vec!["regular"]
        );
        assert!(provider.bucket("site").unwrap().objects.contains_key("docs/a.txt"));
    }

    #[tokio::test]
    async fn test_upload_directory() {
        let provider = MockProvider::new();
        let state = deployed(&provider, true);
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("img")).unwrap();
        fs::write(dir.path().join("index.html"), "<html>").unwrap();
        fs::write(dir.path().join("img").join("logo.svg"), "<svg/>").unwrap();

        let options = UploadOptions {
            dir: Some(dir.path().to_path_buf()),
            ..UploadOptions::default()
        };
        Reconciler::new(provider.factory())
            .upload(&options, &state)
            .await
            .unwrap();

        let objects = provider.bucket("site").unwrap().objects;
        assert_eq!(objects.len(), 2);
        assert_eq!(objects["img/logo.svg"].1, "image/svg+xml");
        assert!(provider
            .handles_for(|c| matches!(c, Call::Put { .. }))
            .iter()
            .all(|label| *label == "accelerated"));
    }

    #[tokio::test]
    async fn test_upload_directory_as_archive() {
        let provider = MockProvider::new();
        let state = deployed(&provider, false);
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("handler.js"), "module.exports = {}").unwrap();
        fs::write(dir.path().join("lib").join("util.js"), "exports.id = 1").unwrap();

        let options = UploadOptions {
            dir: Some(dir.path().to_path_buf()),
            zip: true,
            key: Some("bundle.zip".to_string()),
            ..UploadOptions::default()
        };
        Reconciler::new(provider.factory())
            .upload(&options, &state)
            .await
            .unwrap();

        let objects = provider.bucket("site").unwrap().objects;
        assert_eq!(objects.len(), 1);
        let (archive, content_type) = objects["bundle.zip"].clone();
        assert_eq!(content_type, "application/zip");
        assert_eq!(&archive[..4], b"PK\x03\x04");

        let mut reader = zip::ZipArchive::new(Cursor::new(archive)).unwrap();
        let mut handler = String::new();
        reader.by_name("handler.js")
            .unwrap()
            .read_to_string(&mut handler)
            .unwrap();
        assert_eq!(handler, "module.exports = {}");

        let mut util = String::new();
        reader.by_name("lib/util.js")
            .unwrap()
            .read_to_string(&mut util)
            .unwrap();
        assert_eq!(util, "exports.id = 1");
    }

    #[test]
    fn test_pack_empty_dir_is_valid_zip() {
        let dir = tempdir().unwrap();

        let archive = pack_dir(dir.path()).unwrap();
        let reader = zip::ZipArchive::new(Cursor::new(archive)).unwrap();

        assert_eq!(reader.len(), 0);
    }

    #[tokio::test]
    async fn test_failed_file_fails_directory_upload() {
        let provider = MockProvider::new();
        let state = deployed(&provider, false);
        provider.world().failing_puts.insert("b.txt".to_string());
        let dir = tempdir().unwrap();
        for name in ["a.txt", "b.txt", "c.txt"] {
            fs::write(dir.path().join(name), name).unwrap();
        }

        let options = UploadOptions {
            dir: Some(dir.path().to_path_buf()),
            ..UploadOptions::default()
        };
        let err = Reconciler::new(provider.factory())
            .with_concurrency(1)
            .upload(&options, &state)
            .await
            .unwrap_err();

        match err {
            Error::Provider(e) => assert_eq!(e.code(), Some("InternalError")),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!provider.bucket("site").unwrap().objects.contains_key("b.txt"));
    }

    #[tokio::test]
    async fn test_archive_gets_random_key() {
        let provider = MockProvider::new();
        let state = deployed(&provider, false);
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a"), "a").unwrap();

        let options = UploadOptions {
            dir: Some(dir.path().to_path_buf()),
            zip: true,
            ..UploadOptions::default()
        };
        Reconciler::new(provider.factory())
            .upload(&options, &state)
            .await
            .unwrap();

        let objects = provider.bucket("site").unwrap().objects;
        let key = objects.keys().next().unwrap();
        assert!(key.ends_with(".zip"));
    }

    #[tokio::test]
    async fn test_large_file_goes_multipart() {
        let provider = MockProvider::new();
        let state = deployed(&provider, false);
        let dir = tempdir().unwrap();
        let file = dir.path().join("video.bin");
        fs::write(&file, b"0123456789").unwrap();

        let options = UploadOptions {
            file: Some(file),
            ..UploadOptions::default()
        };
        Reconciler::new(provider.factory())
            .with_multipart(small_parts())
            .upload(&options, &state)
            .await
            .unwrap();

        assert_eq!(provider.count(|c| matches!(c, Call::UploadPart { .. })), 3);
        assert_eq!(provider.count(|c| matches!(c, Call::Put { .. })), 0);
        assert!(provider
            .calls()
            .iter()
            .any(|(_, c)| *c
                == Call::CompleteMultipart {
                    key: "video.bin".to_string(),
                    parts: 3
                }));
        assert_eq!(
            provider.bucket("site").unwrap().objects["video.bin"].0,
            b"0123456789"
        );
    }

    #[tokio::test]
    async fn test_failed_part_aborts_upload() {
        let provider = MockProvider::new();
        let state = deployed(&provider, false);
        provider.world().failing_part = Some(2);
        let dir = tempdir().unwrap();
        let file = dir.path().join("video.bin");
        fs::write(&file, b"0123456789").unwrap();

        let options = UploadOptions {
            file: Some(file),
            ..UploadOptions::default()
        };
        let err = Reconciler::new(provider.factory())
            .with_multipart(small_parts())
            .upload(&options, &state)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("RequestTimeout"));
        assert_eq!(provider.count(|c| matches!(c, Call::AbortMultipart { .. })), 1);
        assert!(provider.bucket("site").unwrap().objects.is_empty());
    }

    #[tokio::test]
    async fn test_upload_without_bucket_is_noop() {
        let provider = MockProvider::new();
        let factory = provider.factory();
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, "a").unwrap();

        let options = UploadOptions {
            file: Some(file),
            ..UploadOptions::default()
        };
        Reconciler::new(factory.clone())
            .upload(&options, &BucketState::default())
            .await
            .unwrap();

        assert!(provider.calls().is_empty());
        assert!(factory.regions().is_empty());
    }

    #[tokio::test]
    async fn test_upload_missing_path_is_noop() {
        let provider = MockProvider::new();
        let state = deployed(&provider, true);

        let options = UploadOptions {
            dir: Some(PathBuf::from("/definitely/not/here")),
            file: Some(PathBuf::from("/definitely/not/here.txt")),
            ..UploadOptions::default()
        };
        Reconciler::new(provider.factory())
            .upload(&options, &state)
            .await
            .unwrap();

        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_upload_name_and_region_override_state() {
        let provider = MockProvider::new();
        provider.seed("other", "ap-southeast-2", &[]);
        let factory = provider.factory();
        let state = BucketState::deployed("site", "us-east-1", true);
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, "a").unwrap();

        let options = UploadOptions {
            file: Some(file),
            name: Some("other".to_string()),
            region: Some("ap-southeast-2".to_string()),
            ..UploadOptions::default()
        };
        Reconciler::new(factory.clone())
            .upload(&options, &state)
            .await
            .unwrap();

        assert!(provider.bucket("other").unwrap().objects.contains_key("a.txt"));
        assert_eq!(factory.regions(), vec!["ap-southeast-2"]);
        // Routing still follows the persisted acceleration mode
        assert_eq!(
            provider.handles_for(|c| matches!(c, Call::Put { .. })),
            vec!["accelerated"]
        );
    }
}
