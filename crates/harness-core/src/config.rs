//! Harness configuration types

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Error, Result, RunId};

/// Main harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Identifier of the run being managed
    pub run_id: RunId,

    /// Root of the local directory layout (runs, models, datasets)
    pub base_dir: PathBuf,

    /// JSON file holding the run configuration; loaded from memory when unset
    pub run_config_path: Option<PathBuf>,

    /// Interruption handling settings
    pub interrupt: InterruptConfig,

    /// Logging settings
    pub logging: LoggingConfig,

    /// Object storage settings
    pub storage: StorageConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            base_dir: PathBuf::from("./blueprint"),
            run_config_path: None,
            interrupt: InterruptConfig::default(),
            logging: LoggingConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Create a configuration for a run rooted at `base_dir`
    pub fn new(run_id: impl Into<RunId>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_id: run_id.into(),
            base_dir: base_dir.into(),
            ..Default::default()
        }
    }

    /// Load and validate a configuration from a JSON file
    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await?;
        let config: HarnessConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Install the global tracing subscriber with this configuration's filter
    pub fn init_logging(&self) -> bool {
        crate::logging::init_tracing(&self.logging.filter)
    }

    /// Reject settings that would break the on-disk layout
    pub fn validate(&self) -> Result<()> {
        if self.run_id.is_empty() {
            return Err(Error::InvalidConfig {
                message: "run_id must not be empty".to_string(),
            });
        }
        if self.run_id.contains(['/', '\\']) || self.run_id == "." || self.run_id == ".." {
            return Err(Error::InvalidConfig {
                message: format!("run_id {:?} is not a valid directory name", self.run_id),
            });
        }
        Ok(())
    }
}

/// Interruption handling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterruptConfig {
    /// Convert SIGINT/SIGTERM into the interruption condition
    pub install_signal_handlers: bool,
}

impl Default for InterruptConfig {
    fn default() -> Self {
        Self {
            install_signal_handlers: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `tracing` filter directive, overridden by `RUST_LOG`
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage backend type
    pub backend: StorageBackend,

    /// Retry configuration
    pub retry: RetryConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local {
                root: PathBuf::from("./blueprint/buckets"),
            },
            retry: RetryConfig::default(),
        }
    }
}

/// Storage backend type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StorageBackend {
    /// Buckets emulated as directories under `root`
    Local { root: PathBuf },

    /// S3-compatible storage
    S3 {
        region: String,
        endpoint: Option<String>,
        force_path_style: bool,
    },
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts
    pub max_retries: u32,

    /// Initial delay before first retry
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    /// Exponential backoff delay for a zero-based attempt number
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Duration serialization helper for human-readable formats
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
