//! Checkpoint write handle
//!
//! A [`CheckpointWrite`] owns a freshly created checkpoint directory until it is
//! committed. Aborting it, or dropping it uncommitted, removes the directory and
//! everything under it.

use harness_core::{CheckpointId, Result, SaveCheckpointData, Step};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// An open checkpoint write
#[derive(Debug)]
pub struct CheckpointWrite {
    id: CheckpointId,
    global_step: Step,
    dir: PathBuf,
    armed: bool,
}

impl CheckpointWrite {
    /// Take ownership of an already created checkpoint directory
    pub fn new(id: CheckpointId, global_step: Step, dir: PathBuf) -> Self {
        Self {
            id,
            global_step,
            dir,
            armed: true,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn global_step(&self) -> Step {
        self.global_step
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The handle exposed to the body of a write scope
    pub fn data(&self) -> SaveCheckpointData {
        SaveCheckpointData {
            dir: self.dir.clone(),
        }
    }

    /// Leave the directory in place and hand back the id
    pub fn commit(mut self) -> CheckpointId {
        self.armed = false;
        std::mem::take(&mut self.id)
    }

    /// Delete the directory and everything under it
    pub async fn abort(mut self) -> Result<()> {
        self.armed = false;
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => {
                debug!(checkpoint_id = %self.id, "Rolled back checkpoint write");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for CheckpointWrite {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // Reached when the write scope was cancelled before it could finish
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => debug!(checkpoint_id = %self.id, "Rolled back abandoned checkpoint write"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                checkpoint_id = %self.id,
                path = %self.dir.display(),
                error = %e,
                "Failed to roll back abandoned checkpoint write"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> CheckpointWrite {
        let path = dir.path().join("1-run__tok");
        std::fs::create_dir_all(path.join("nested")).unwrap();
        std::fs::write(path.join("nested/weights.bin"), b"abc").unwrap();
        CheckpointWrite::new("1-run__tok".to_string(), 1, path)
    }

    #[test]
    fn test_commit_keeps_directory() {
        let dir = TempDir::new().unwrap();
        let write = open(&dir);
        let path = write.dir().to_path_buf();
        assert_eq!(write.commit(), "1-run__tok");
        assert!(path.join("nested/weights.bin").exists());
    }

    #[tokio::test]
    async fn test_abort_removes_directory() {
        let dir = TempDir::new().unwrap();
        let write = open(&dir);
        let path = write.dir().to_path_buf();
        write.abort().await.unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_uncommitted_removes_directory() {
        let dir = TempDir::new().unwrap();
        let write = open(&dir);
        let path = write.dir().to_path_buf();
        drop(write);
        assert!(!path.exists());
    }
}
