//! Local filesystem checkpoint manager
//!
//! Checkpoints live at `{base_dir}/runs/{run_id}/checkpoints/{checkpoint_id}/`.
//! A checkpoint directory only exists between `begin_save` and a rollback, or
//! after commit; there is no separate "in progress" marker.

use async_trait::async_trait;
use harness_core::{
    CheckpointId, Error, LoadCheckpointData, Result, RunId, SaveCheckpointData, Step,
};
use parking_lot::Mutex;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tracing::{debug, info, instrument};

use crate::id::{decode_checkpoint_id, generate_checkpoint_id, leading_step};
use crate::manager::{self, CheckpointManager};
use crate::write::CheckpointWrite;

const RUNS_DIR: &str = "runs";
const CHECKPOINTS_DIR: &str = "checkpoints";

/// Manages checkpoints in a local directory
#[derive(Debug)]
pub struct LocalFileCheckpointManager {
    /// Run that new checkpoints belong to
    run_id: RunId,

    /// Root of the local layout
    base_dir: PathBuf,

    /// Last id handed out by `begin_save` in this process
    most_recent: Mutex<Option<CheckpointId>>,
}

impl LocalFileCheckpointManager {
    /// Create a new checkpoint manager
    pub fn new(run_id: impl Into<RunId>, base_dir: impl AsRef<Path>) -> Self {
        Self {
            run_id: run_id.into(),
            base_dir: base_dir.as_ref().to_path_buf(),
            most_recent: Mutex::new(None),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Directory holding the checkpoints of the current run
    pub fn checkpoints_path(&self) -> PathBuf {
        self.checkpoints_path_for(&self.run_id)
    }

    fn runs_path(&self) -> PathBuf {
        self.base_dir.join(RUNS_DIR)
    }

    fn checkpoints_path_for(&self, run_id: &str) -> PathBuf {
        self.runs_path().join(run_id).join(CHECKPOINTS_DIR)
    }

    /// See [`manager::save_checkpoint`]
    pub async fn save_checkpoint<F, Fut, T, E>(&self, global_step: Step, body: F) -> std::result::Result<T, E>
    where
        F: FnOnce(SaveCheckpointData) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<Error>,
    {
        manager::save_checkpoint(self, global_step, body).await
    }

    /// See [`manager::load_checkpoint`]
    pub async fn load_checkpoint<F, Fut, T, E>(&self, id: Option<&str>, body: F) -> std::result::Result<T, E>
    where
        F: FnOnce(LoadCheckpointData) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<Error>,
    {
        manager::load_checkpoint(self, id, body).await
    }

    /// Every committed checkpoint of the current run, ordered by step then id
    pub async fn list_checkpoints(&self) -> Result<Vec<LoadCheckpointData>> {
        let mut checkpoints = Vec::new();
        for (dir, _) in checkpoint_dirs(&self.checkpoints_path()).await? {
            checkpoints.push(describe(dir)?);
        }
        checkpoints.sort_by(|a, b| a.global_step.cmp(&b.global_step).then_with(|| a.id.cmp(&b.id)));
        Ok(checkpoints)
    }

    /// Most recent checkpoint by (modification time, leading step)
    ///
    /// Modification times have filesystem granularity, so two checkpoints
    /// written in quick succession may compare equal and fall back to the step.
    async fn resolve_most_recent(&self) -> Result<PathBuf> {
        let candidates = checkpoint_dirs(&self.checkpoints_path()).await?;
        if candidates.is_empty() {
            return Err(Error::NoCheckpoints {
                run_id: self.run_id.clone(),
            });
        }

        let mut best: Option<((SystemTime, Step), PathBuf)> = None;
        for (dir, modified) in candidates {
            let key = (modified, leading_step(&file_name(&dir))?);
            if best.as_ref().map_or(true, |(best_key, _)| key > *best_key) {
                best = Some((key, dir));
            }
        }

        best.map(|(_, dir)| dir).ok_or_else(|| Error::NoCheckpoints {
            run_id: self.run_id.clone(),
        })
    }

    /// Search every run's checkpoint root for a directory named `id`
    async fn resolve_by_id(&self, id: &str) -> Result<PathBuf> {
        let not_found = || Error::CheckpointNotFound {
            checkpoint_id: id.to_string(),
        };
        if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\']) {
            return Err(not_found());
        }

        let mut matches = Vec::new();
        let mut runs = match fs::read_dir(self.runs_path()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(e.into()),
        };
        while let Some(run) = runs.next_entry().await? {
            let candidate = run.path().join(CHECKPOINTS_DIR).join(id);
            match fs::metadata(&candidate).await {
                Ok(meta) if meta.is_dir() => matches.push(candidate),
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        match matches.len() {
            0 => Err(not_found()),
            1 => Ok(matches.remove(0)),
            n => Err(Error::DuplicateCheckpoint {
                checkpoint_id: id.to_string(),
                matches: n,
            }),
        }
    }
}

#[async_trait]
impl CheckpointManager for LocalFileCheckpointManager {
    #[instrument(skip(self), fields(run_id = %self.run_id))]
    async fn begin_save(&self, global_step: Step) -> Result<CheckpointWrite> {
        let checkpoint_id = generate_checkpoint_id(global_step, &self.run_id);
        *self.most_recent.lock() = Some(checkpoint_id.clone());

        let dir = self.checkpoints_path().join(&checkpoint_id);
        fs::create_dir_all(&dir).await?;

        debug!(checkpoint_id = %checkpoint_id, path = %dir.display(), "Opened checkpoint write");
        Ok(CheckpointWrite::new(checkpoint_id, global_step, dir))
    }

    async fn commit_save(&self, write: CheckpointWrite) -> Result<CheckpointId> {
        let global_step = write.global_step();
        let checkpoint_id = write.commit();
        info!(
            checkpoint_id = %checkpoint_id,
            run_id = %self.run_id,
            global_step,
            "Checkpoint saved"
        );
        Ok(checkpoint_id)
    }

    #[instrument(skip(self), fields(run_id = %self.run_id))]
    async fn resolve(&self, id: Option<&str>) -> Result<LoadCheckpointData> {
        let dir = match id {
            Some(id) => self.resolve_by_id(id).await?,
            None => self.resolve_most_recent().await?,
        };
        let checkpoint = describe(dir)?;
        debug!(
            checkpoint_id = %checkpoint.id,
            global_step = checkpoint.global_step,
            "Resolved checkpoint"
        );
        Ok(checkpoint)
    }

    fn most_recent_checkpoint_id(&self) -> Option<CheckpointId> {
        self.most_recent.lock().clone()
    }
}

/// Directories directly under `root` with their modification times
async fn checkpoint_dirs(root: &Path) -> Result<Vec<(PathBuf, SystemTime)>> {
    let mut entries = match fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut dirs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if metadata.is_dir() {
            dirs.push((entry.path(), metadata.modified()?));
        }
    }
    Ok(dirs)
}

fn file_name(dir: &Path) -> String {
    dir.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn describe(dir: PathBuf) -> Result<LoadCheckpointData> {
    let id = file_name(&dir);
    let decoded = decode_checkpoint_id(&id)?;
    Ok(LoadCheckpointData {
        dir,
        id,
        global_step: decoded.global_step,
        run_id: decoded.run_id,
    })
}
