//! Checkpoint manager interface and write/read scopes

use async_trait::async_trait;
use harness_core::{
    CheckpointId, Error, LoadCheckpointData, SaveCheckpointData, ScopedResource, Step,
};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::write::CheckpointWrite;

/// Interface for checkpoint managers
///
/// The primitives here are the two halves of a write scope plus resolution.
/// Callers normally go through [`save_checkpoint`] and [`load_checkpoint`],
/// which pair them up correctly.
#[async_trait]
pub trait CheckpointManager: Send + Sync {
    /// Allocate a new checkpoint id and create its directory
    async fn begin_save(&self, global_step: Step) -> harness_core::Result<CheckpointWrite>;

    /// Make a finished write visible to lookups
    async fn commit_save(&self, write: CheckpointWrite) -> harness_core::Result<CheckpointId> {
        Ok(write.commit())
    }

    /// Discard a write and everything written into it
    async fn abort_save(&self, write: CheckpointWrite) -> harness_core::Result<()> {
        write.abort().await
    }

    /// Resolve a checkpoint by id, or the most recent one of the current run
    async fn resolve(&self, id: Option<&str>) -> harness_core::Result<LoadCheckpointData>;

    /// Id of the last checkpoint this process started saving, if any
    fn most_recent_checkpoint_id(&self) -> Option<CheckpointId> {
        None
    }

    /// Scoped-resource capability query
    fn as_scoped(self: Arc<Self>) -> Option<Arc<dyn ScopedResource>> {
        None
    }
}

/// Save a checkpoint
///
/// `body` receives the directory to write into. If it returns `Ok` the
/// checkpoint is committed. If it returns `Err` the directory is deleted and
/// the body's error is returned unchanged.
///
/// ```no_run
/// # use checkpoint::{save_checkpoint, LocalFileCheckpointManager};
/// # async fn example(manager: &LocalFileCheckpointManager) -> harness_core::Result<()> {
/// save_checkpoint(manager, 1, |ckpt| async move {
///     tokio::fs::write(ckpt.dir.join("model.pth"), b"weights").await?;
///     Ok::<_, harness_core::Error>(())
/// })
/// .await
/// # }
/// ```
pub async fn save_checkpoint<M, F, Fut, T, E>(manager: &M, global_step: Step, body: F) -> Result<T, E>
where
    M: CheckpointManager + ?Sized,
    F: FnOnce(SaveCheckpointData) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<Error>,
{
    let write = manager.begin_save(global_step).await?;
    let checkpoint_id = write.id().to_string();

    match body(write.data()).await {
        Ok(value) => {
            manager.commit_save(write).await?;
            debug!(checkpoint_id = %checkpoint_id, global_step, "Checkpoint committed");
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = manager.abort_save(write).await {
                warn!(
                    checkpoint_id = %checkpoint_id,
                    error = %rollback,
                    "Failed to roll back checkpoint write"
                );
            } else {
                debug!(checkpoint_id = %checkpoint_id, "Checkpoint write rolled back");
            }
            Err(e)
        }
    }
}

/// Load a checkpoint
///
/// With `id = None` the most recent checkpoint of the current run is used.
/// `body` receives the resolved checkpoint; its directory must be treated as
/// read-only.
pub async fn load_checkpoint<M, F, Fut, T, E>(manager: &M, id: Option<&str>, body: F) -> Result<T, E>
where
    M: CheckpointManager + ?Sized,
    F: FnOnce(LoadCheckpointData) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<Error>,
{
    let checkpoint = manager.resolve(id).await?;
    body(checkpoint).await
}
