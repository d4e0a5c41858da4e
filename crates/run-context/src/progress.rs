//! Progress savers

use async_trait::async_trait;
use harness_core::{Result, SaveProgress, ScopedResource};
use parking_lot::Mutex;
use std::sync::Arc;

/// Interface for saving training run progress
#[async_trait]
pub trait ProgressSaver: Send + Sync {
    /// Save the current progress of every tracked operation
    async fn save_progress(&self, progress: Vec<SaveProgress>) -> Result<()>;

    /// Scoped-resource capability query
    fn as_scoped(self: Arc<Self>) -> Option<Arc<dyn ScopedResource>> {
        None
    }
}

/// Keeps the latest progress report in memory
#[derive(Debug, Default)]
pub struct MemoryProgressSaver {
    current_progress: Mutex<Vec<SaveProgress>>,
}

impl MemoryProgressSaver {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently saved progress report
    pub fn current_progress(&self) -> Vec<SaveProgress> {
        self.current_progress.lock().clone()
    }
}

#[async_trait]
impl ProgressSaver for MemoryProgressSaver {
    async fn save_progress(&self, progress: Vec<SaveProgress>) -> Result<()> {
        *self.current_progress.lock() = progress;
        Ok(())
    }
}
