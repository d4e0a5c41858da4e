//! Run configuration loaders

use async_trait::async_trait;
use harness_core::{Result, ScopedResource};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Interface for loading a run's configuration
#[async_trait]
pub trait ConfigLoader: Send + Sync {
    /// Load the run configuration
    async fn load_config(&self) -> Result<Value>;

    /// Scoped-resource capability query
    fn as_scoped(self: Arc<Self>) -> Option<Arc<dyn ScopedResource>> {
        None
    }
}

/// Returns a configuration held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigLoader {
    config: Value,
}

impl MemoryConfigLoader {
    pub fn new(config: Value) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ConfigLoader for MemoryConfigLoader {
    async fn load_config(&self) -> Result<Value> {
        Ok(self.config.clone())
    }
}

/// Loads the configuration from a JSON file on every call
#[derive(Debug, Clone)]
pub struct FileConfigLoader {
    config_path: PathBuf,
}

impl FileConfigLoader {
    pub fn new(config_path: impl AsRef<Path>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}

#[async_trait]
impl ConfigLoader for FileConfigLoader {
    async fn load_config(&self) -> Result<Value> {
        debug!(path = %self.config_path.display(), "Loading run config");
        let raw = tokio::fs::read_to_string(&self.config_path).await?;
        Ok(serde_json::from_str(&raw)?)
    }
}
