//! Harness Core - Foundation for the training-run harness
//!
//! Provides the error taxonomy, shared data types, configuration, logging
//! bootstrap and the scoped-resource capability used by every other crate.

pub mod config;
pub mod error;
pub mod logging;
pub mod scope;
pub mod types;

pub use config::HarnessConfig;
pub use error::{Error, Result};
pub use scope::{ExitCause, ScopedResource};
pub use types::*;
