//! Dataset fetchers
//!
//! Framework-agnostic access to the datums of one dataset snapshot split.

use async_trait::async_trait;
use bytes::Bytes;
use harness_core::{DatumMetadata, Error, Result, ScopedResource, Snapshot};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info};

const DATASETS_DIR: &str = "datasets";

/// Directory name used when no split is selected
const UNSPLIT_DIR: &str = "None";

/// Interface for fetching datums
#[async_trait]
pub trait DatasetFetcher: Send + Sync {
    /// Select the snapshot split later calls read from
    ///
    /// A no-op when the same pair is already prepared.
    async fn prepare_snapshot_split(&self, snapshot_id: &str, split: Option<&str>) -> Result<()>;

    /// Fetch the datum and its metadata at `index`
    ///
    /// # Errors
    /// Returns `IndexOutOfRange` if `index` is not below [`num_datums`](Self::num_datums)
    async fn get_datum_at_index(&self, index: usize) -> Result<(Bytes, DatumMetadata)>;

    /// The prepared snapshot split
    fn snapshot(&self) -> Snapshot;

    /// Sorted class labels of the prepared split
    fn class_labels(&self) -> Vec<String>;

    /// Number of datums in the prepared split
    fn num_datums(&self) -> usize;

    /// Task type of the prepared split
    fn task_type(&self) -> String;

    /// Scoped-resource capability query
    fn as_scoped(self: Arc<Self>) -> Option<Arc<dyn ScopedResource>> {
        None
    }
}

#[derive(Debug, Default)]
struct PreparedSplit {
    snapshot: Snapshot,
    root: PathBuf,
    datum_ids: Vec<String>,
}

/// Reads datums from `{base_dir}/datasets/{snapshot_id}/{split}/`
///
/// Each datum is a payload file `{datum_id}` next to its metadata
/// `{datum_id}.json`. Datums are indexed in file-name order.
#[derive(Debug)]
pub struct LocalFileDatasetFetcher {
    file_root: PathBuf,
    prepared: Mutex<Option<PreparedSplit>>,
}

impl LocalFileDatasetFetcher {
    /// Create a fetcher rooted at `{base_dir}/datasets`, creating it if needed
    pub async fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        let file_root = std::path::absolute(base_dir.as_ref().join(DATASETS_DIR))?;
        fs::create_dir_all(&file_root).await?;
        Ok(Self {
            file_root,
            prepared: Mutex::new(None),
        })
    }

    pub fn file_root(&self) -> &Path {
        &self.file_root
    }

    fn split_root(&self, snapshot_id: &str, split: Option<&str>) -> PathBuf {
        self.file_root
            .join(snapshot_id)
            .join(split.unwrap_or(UNSPLIT_DIR))
    }
}

#[async_trait]
impl DatasetFetcher for LocalFileDatasetFetcher {
    async fn prepare_snapshot_split(&self, snapshot_id: &str, split: Option<&str>) -> Result<()> {
        if let Some(prepared) = self.prepared.lock().as_ref() {
            if prepared.snapshot.snapshot_id == snapshot_id
                && prepared.snapshot.split.as_deref() == split
            {
                return Ok(());
            }
        }

        let root = self.split_root(snapshot_id, split);
        fs::create_dir_all(&root).await?;

        let mut datum_ids = Vec::new();
        let mut entries = fs::read_dir(&root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem() {
                    datum_ids.push(stem.to_string_lossy().into_owned());
                }
            }
        }
        datum_ids.sort();

        info!(
            snapshot_id,
            split = split.unwrap_or(UNSPLIT_DIR),
            num_datums = datum_ids.len(),
            "Prepared dataset snapshot split"
        );
        *self.prepared.lock() = Some(PreparedSplit {
            snapshot: Snapshot {
                snapshot_id: snapshot_id.to_string(),
                split: split.map(str::to_string),
            },
            root,
            datum_ids,
        });
        Ok(())
    }

    async fn get_datum_at_index(&self, index: usize) -> Result<(Bytes, DatumMetadata)> {
        let (root, datum_id) = {
            let prepared = self.prepared.lock();
            let prepared = prepared.as_ref().ok_or(Error::DatasetNotPrepared)?;
            let len = prepared.datum_ids.len();
            let datum_id = prepared
                .datum_ids
                .get(index)
                .cloned()
                .ok_or(Error::IndexOutOfRange { index, len })?;
            (prepared.root.clone(), datum_id)
        };

        let payload_path = root.join(&datum_id);
        let metadata_path = root.join(format!("{datum_id}.json"));
        debug!(index, datum_id = %datum_id, "Reading datum");

        let not_found = |what: &str, e: std::io::Error| -> Error {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::DatumNotFound {
                    index,
                    reason: Some(format!("{what} for datum {datum_id} is missing")),
                }
            } else {
                e.into()
            }
        };

        let payload = fs::read(&payload_path).await.map_err(|e| not_found("payload", e))?;
        let raw_metadata = fs::read_to_string(&metadata_path)
            .await
            .map_err(|e| not_found("metadata", e))?;
        let metadata: DatumMetadata = serde_json::from_str(&raw_metadata)?;

        Ok((Bytes::from(payload), metadata))
    }

    fn snapshot(&self) -> Snapshot {
        self.prepared
            .lock()
            .as_ref()
            .map(|p| p.snapshot.clone())
            .unwrap_or_default()
    }

    fn class_labels(&self) -> Vec<String> {
        Vec::new()
    }

    fn num_datums(&self) -> usize {
        self.prepared
            .lock()
            .as_ref()
            .map_or(0, |p| p.datum_ids.len())
    }

    fn task_type(&self) -> String {
        String::new()
    }
}
