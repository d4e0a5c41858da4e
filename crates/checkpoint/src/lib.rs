//! Checkpoint management for training runs
//!
//! Provides the checkpoint id scheme, crash-safe directory-backed checkpoint
//! writes, and most-recent / by-id resolution.

pub mod id;
pub mod local;
pub mod manager;
pub mod write;

pub use id::{decode_checkpoint_id, encode_checkpoint_id, generate_checkpoint_id, DecodedCheckpointId};
pub use local::LocalFileCheckpointManager;
pub use manager::{load_checkpoint, save_checkpoint, CheckpointManager};
pub use write::CheckpointWrite;
