//! Model loaders

use async_trait::async_trait;
use harness_core::{Error, LoadModelData, Result, ScopedResource};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const MODELS_DIR: &str = "models";

/// Interface for model loaders
#[async_trait]
pub trait ModelLoader: Send + Sync {
    /// Resolve a model to the directory holding its files
    ///
    /// # Errors
    /// Returns `ModelNotFound` if no model with `id` exists
    async fn load_model(&self, id: &str) -> Result<LoadModelData>;

    /// Scoped-resource capability query
    fn as_scoped(self: Arc<Self>) -> Option<Arc<dyn ScopedResource>> {
        None
    }
}

/// Loads models from `{base_dir}/models/{model_id}/`
#[derive(Debug, Clone)]
pub struct LocalFileModelLoader {
    base_dir: PathBuf,
}

impl LocalFileModelLoader {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    fn model_path(&self, id: &str) -> PathBuf {
        self.base_dir.join(MODELS_DIR).join(id)
    }
}

#[async_trait]
impl ModelLoader for LocalFileModelLoader {
    async fn load_model(&self, id: &str) -> Result<LoadModelData> {
        let dir = self.model_path(id);
        if !tokio::fs::try_exists(&dir).await? {
            return Err(Error::ModelNotFound {
                model_id: id.to_string(),
            });
        }
        debug!(model_id = %id, path = %dir.display(), "Loaded model");
        Ok(LoadModelData {
            dir,
            id: id.to_string(),
        })
    }
}
