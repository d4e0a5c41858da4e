//! Storage - Object storage clients and directory mirroring
//!
//! Provides async object storage with support for:
//! - Local filesystem buckets (default feature)
//! - Amazon S3 / S3-compatible storage (with `s3` feature)
//!
//! and mirroring of a local directory tree to and from a key prefix.
//!
//! # Example
//!
//! ```no_run
//! use storage::{download_directory, upload_directory, LocalObjectStore};
//!
//! # async fn example() -> harness_core::Result<()> {
//! let store = LocalObjectStore::new("/tmp/buckets");
//! upload_directory(&store, "/tmp/checkpoint", "training", "runs/r1/ckpt/").await?;
//! download_directory(&store, "training", "runs/r1/ckpt/", "/tmp/restore").await?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod local;
pub mod mirror;

#[cfg(feature = "s3")]
mod s3;

pub use backend::{ObjectStore, KEY_SEPARATOR};
pub use local::LocalObjectStore;
pub use mirror::{download_directory, upload_directory};

#[cfg(feature = "s3")]
pub use s3::{S3Config, S3ObjectStore};
