//! Run context for training runs
//!
//! Collaborator interfaces with local implementations, interruption handling,
//! and the [`RunContext`] that ties them into one scope.
//!
//! ```no_run
//! use run_context::{local_run_context, RunOutcome};
//! use serde_json::json;
//!
//! # async fn example() -> harness_core::Result<()> {
//! let ctx = local_run_context("run-1", json!({"epochs": 10}), "./blueprint", None)?;
//! let outcome = ctx
//!     .run(|ctx| async move {
//!         for step in 1..=10 {
//!             ctx.check_interrupted()?;
//!             ctx.save_checkpoint(step, |ckpt| async move {
//!                 tokio::fs::write(ckpt.dir.join("model.pth"), b"weights").await?;
//!                 Ok::<_, harness_core::Error>(())
//!             })
//!             .await?;
//!         }
//!         Ok(())
//!     })
//!     .await?;
//!
//! if let RunOutcome::Interrupted = outcome {
//!     println!("stopped early");
//! }
//! # Ok(())
//! # }
//! ```

pub mod config_loader;
pub mod context;
pub mod dataset;
pub mod interrupt;
pub mod metrics;
pub mod model_loader;
pub mod progress;

pub use config_loader::{ConfigLoader, FileConfigLoader, MemoryConfigLoader};
pub use context::{local_run_context, CollaboratorRole, RunContext, RunContextBuilder, RunOutcome};
pub use dataset::{DatasetFetcher, LocalFileDatasetFetcher};
pub use interrupt::{InterruptFlag, SignalListener};
pub use metrics::{encode_metrics, MemoryMetricSaver, MetricSaver};
pub use model_loader::{LocalFileModelLoader, ModelLoader};
pub use progress::{MemoryProgressSaver, ProgressSaver};
