//! Local filesystem object store
//!
//! Emulates buckets as directories under a root so the mirroring code can be
//! exercised without a remote service. Writes go through a temp file under the
//! bucket's reserved `.inflight/` directory and a rename so a reader never
//! sees a partial object. Keys whose first segment is `.inflight` are rejected.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use harness_core::config::StorageBackend;
use harness_core::{Error, Result};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::backend::{ObjectStore, KEY_SEPARATOR};

/// Per-bucket directory holding writes that have not been renamed into place
const INFLIGHT_DIR: &str = ".inflight";

/// Local filesystem object store
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    /// Directory holding one subdirectory per bucket
    root: PathBuf,
}

impl LocalObjectStore {
    /// Create a new LocalObjectStore rooted at `root`
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Build from the harness storage settings
    pub fn from_backend(backend: &StorageBackend) -> Result<Self> {
        match backend {
            StorageBackend::Local { root } => Ok(Self::new(root)),
            _ => Err(Error::InvalidConfig {
                message: "storage backend is not local".to_string(),
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_path(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }

    /// Resolve a key to a path inside the bucket directory
    fn resolve_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        let mut path = self.bucket_path(bucket);
        for (index, segment) in key.split(KEY_SEPARATOR).enumerate() {
            let reserved = index == 0 && segment == INFLIGHT_DIR;
            if reserved || segment.is_empty() || segment == "." || segment == ".." {
                return Err(Error::Storage {
                    message: format!("key {key:?} cannot be stored as a local file"),
                });
            }
            path.push(segment);
        }
        Ok(path)
    }

    /// Generate a unique temporary file path in the bucket's in-flight directory
    fn temp_path(&self, bucket: &str) -> PathBuf {
        self.bucket_path(bucket)
            .join(INFLIGHT_DIR)
            .join(format!("{}.tmp", Uuid::new_v4()))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    #[instrument(skip(self), fields(backend = "local"))]
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes> {
        let full_path = self.resolve_path(bucket, key)?;
        debug!(?full_path, "Reading object");

        match fs::read(&full_path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::StoragePathNotFound {
                path: format!("{bucket}/{key}"),
            }),
            Err(e) => Err(Error::Storage {
                message: format!("Failed to read {bucket}/{key}: {e}"),
            }),
        }
    }

    #[instrument(skip(self, data), fields(backend = "local", size = data.len()))]
    async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<u64> {
        let full_path = self.resolve_path(bucket, key)?;
        let temp_path = self.temp_path(bucket);
        let size = data.len() as u64;

        for dir in [full_path.parent(), temp_path.parent()].into_iter().flatten() {
            fs::create_dir_all(dir).await.map_err(|e| Error::Storage {
                message: format!("Failed to create directory {dir:?}: {e}"),
            })?;
        }

        let mut file = fs::File::create(&temp_path).await.map_err(|e| Error::Storage {
            message: format!("Failed to create temp file {temp_path:?}: {e}"),
        })?;
        file.write_all(&data).await.map_err(|e| Error::Storage {
            message: format!("Failed to write data: {e}"),
        })?;
        file.sync_all().await.map_err(|e| Error::Storage {
            message: format!("Failed to sync file: {e}"),
        })?;

        if let Err(e) = fs::rename(&temp_path, &full_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(Error::Storage {
                message: format!("Failed to rename {temp_path:?} to {full_path:?}: {e}"),
            });
        }

        debug!(?full_path, size, "Object written");
        Ok(size)
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        let full_path = self.resolve_path(bucket, key)?;

        match fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::StoragePathNotFound {
                path: format!("{bucket}/{key}"),
            }),
            Err(e) => Err(Error::Storage {
                message: format!("Failed to delete {bucket}/{key}: {e}"),
            }),
        }
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        let full_path = self.resolve_path(bucket, key)?;
        Ok(fs::metadata(&full_path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false))
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let bucket_path = self.bucket_path(bucket);
        let mut results = Vec::new();

        let inflight_path = bucket_path.join(INFLIGHT_DIR);
        let mut stack = vec![bucket_path.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let entry_path = entry.path();
                let metadata = entry.metadata().await?;

                if metadata.is_dir() {
                    if entry_path != inflight_path {
                        stack.push(entry_path);
                    }
                } else if metadata.is_file() {
                    if let Ok(relative) = entry_path.strip_prefix(&bucket_path) {
                        let key = relative
                            .components()
                            .map(|c| c.as_os_str().to_string_lossy())
                            .collect::<Vec<_>>()
                            .join(&KEY_SEPARATOR.to_string());
                        if key.starts_with(prefix) {
                            results.push(key);
                        }
                    }
                }
            }
        }

        results.sort();
        debug!(count = results.len(), "Found objects");
        Ok(results)
    }
}
