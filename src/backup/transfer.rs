//! Upload of finished artifacts to remote object storage.

use async_trait::async_trait;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::{MultipartUpload, ObjectStore, PutPayload};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Artifacts at or above this size are streamed as multipart uploads.
pub const DEFAULT_MULTIPART_THRESHOLD: u64 = 64 * 1024 * 1024;
pub const DEFAULT_MULTIPART_CHUNK: usize = 8 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("artifact path has no file name: {0}")]
    InvalidKey(String),

    #[error("{key} is not a valid object key: {source}")]
    KeyRejected {
        key: String,
        #[source]
        source: object_store::path::Error,
    },

    #[error("failed to read artifact {path}: {source}")]
    ReadArtifact {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("storage backend for bucket {bucket} unavailable: {message}")]
    Backend { bucket: String, message: String },

    #[error("upload of {key} to bucket {bucket} failed: {source}")]
    Store {
        bucket: String,
        key: String,
        #[source]
        source: object_store::Error,
    },
}

/// Capability to store a local file under `key` in `bucket`.
#[async_trait]
pub trait ArtifactTransfer: Send + Sync {
    async fn upload(&self, bucket: &str, key: &str, local_path: &Path)
        -> Result<(), TransferError>;
}

/// Object key for an artifact: the final segment of its local path.
pub fn artifact_key(path: &str) -> Result<String, TransferError> {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| TransferError::InvalidKey(path.to_string()))
}

/// Where buckets live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageBackend {
    /// S3 or an S3-compatible service. Credentials come from the usual
    /// `AWS_*` environment variables.
    S3 {
        region: String,
        endpoint: Option<String>,
        allow_http: bool,
    },
    /// Each bucket is a directory below `root`.
    Local { root: PathBuf },
}

/// [`ArtifactTransfer`] backed by the `object_store` crate.
///
/// One store is built per bucket on first use and reused afterwards.
pub struct ObjectStoreTransfer {
    backend: StorageBackend,
    stores: Mutex<HashMap<String, Arc<dyn ObjectStore>>>,
    multipart_threshold: u64,
    multipart_chunk: usize,
}

impl ObjectStoreTransfer {
    pub fn new(backend: StorageBackend) -> Self {
        Self {
            backend,
            stores: Mutex::new(HashMap::new()),
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
            multipart_chunk: DEFAULT_MULTIPART_CHUNK,
        }
    }

    /// Stream artifacts of `threshold` bytes or more in parts of `chunk_size`.
    pub fn with_multipart(mut self, threshold: u64, chunk_size: usize) -> Self {
        self.multipart_threshold = threshold;
        self.multipart_chunk = chunk_size.max(1);
        self
    }

    async fn store_for(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>, TransferError> {
        let mut stores = self.stores.lock().await;
        if let Some(store) = stores.get(bucket) {
            return Ok(Arc::clone(store));
        }

        let store = self.build_store(bucket)?;
        debug!("Created object store for bucket {}", bucket);
        stores.insert(bucket.to_string(), Arc::clone(&store));
        Ok(store)
    }

    fn build_store(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>, TransferError> {
        let backend_error = |message: String| TransferError::Backend {
            bucket: bucket.to_string(),
            message,
        };

        match &self.backend {
            StorageBackend::S3 {
                region,
                endpoint,
                allow_http,
            } => {
                let mut builder = AmazonS3Builder::from_env()
                    .with_bucket_name(bucket)
                    .with_region(region);

                // Custom endpoints (MinIO and friends) want path-style requests
                if let Some(endpoint) = endpoint {
                    builder = builder
                        .with_endpoint(endpoint)
                        .with_virtual_hosted_style_request(false);
                }
                if *allow_http {
                    builder = builder.with_allow_http(true);
                }

                let store = builder
                    .build()
                    .map_err(|e| backend_error(format!("S3: {}", e)))?;
                Ok(Arc::new(store))
            }
            StorageBackend::Local { root } => {
                let dir = root.join(bucket);
                std::fs::create_dir_all(&dir)
                    .map_err(|e| backend_error(format!("create {:?}: {}", dir, e)))?;
                let store = LocalFileSystem::new_with_prefix(&dir)
                    .map_err(|e| backend_error(format!("LocalFileSystem: {}", e)))?;
                Ok(Arc::new(store))
            }
        }
    }
}

enum PartError {
    Read(std::io::Error),
    Store(object_store::Error),
}

impl ObjectStoreTransfer {
    /// Upload the file part by part, each `multipart_chunk` bytes except the last.
    async fn stream_parts(
        &self,
        file: &mut tokio::fs::File,
        upload: &mut dyn MultipartUpload,
    ) -> Result<(), PartError> {
        let mut buf = vec![0u8; self.multipart_chunk];
        loop {
            let mut filled = 0;
            while filled < buf.len() {
                let n = file.read(&mut buf[filled..]).await.map_err(PartError::Read)?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            if filled == 0 {
                return Ok(());
            }

            let part = PutPayload::from(buf[..filled].to_vec());
            upload.put_part(part).await.map_err(PartError::Store)?;

            if filled < buf.len() {
                return Ok(());
            }
        }
    }
}

#[async_trait]
impl ArtifactTransfer for ObjectStoreTransfer {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
    ) -> Result<(), TransferError> {
        let read_error = |source: std::io::Error| TransferError::ReadArtifact {
            path: local_path.display().to_string(),
            source,
        };
        let store_error = |source: object_store::Error| TransferError::Store {
            bucket: bucket.to_string(),
            key: key.to_string(),
            source,
        };

        // Open before touching the backend so a missing artifact fails fast.
        let mut file = tokio::fs::File::open(local_path).await.map_err(read_error)?;
        let size = file.metadata().await.map_err(read_error)?.len();

        // parse keeps the name as-is; From<&str> would percent-encode it
        let location = ObjectPath::parse(key).map_err(|source| TransferError::KeyRejected {
            key: key.to_string(),
            source,
        })?;
        let store = self.store_for(bucket).await?;

        if size < self.multipart_threshold {
            let mut data = Vec::with_capacity(size as usize);
            file.read_to_end(&mut data).await.map_err(read_error)?;
            store
                .put(&location, PutPayload::from(data))
                .await
                .map_err(store_error)?;
        } else {
            let mut upload = store.put_multipart(&location).await.map_err(store_error)?;

            let streamed = match self.stream_parts(&mut file, upload.as_mut()).await {
                Ok(()) => upload.complete().await.map(|_| ()).map_err(PartError::Store),
                Err(e) => Err(e),
            };
            if let Err(e) = streamed {
                if let Err(abort_error) = upload.abort().await {
                    warn!(bucket = %bucket, key = %key, "failed to abort multipart upload: {}", abort_error);
                }
                return Err(match e {
                    PartError::Read(source) => read_error(source),
                    PartError::Store(source) => store_error(source),
                });
            }
        }

        info!(bucket = %bucket, key = %key, bytes = size, "artifact uploaded");
        Ok(())
    }
}
