//! Scoped-resource capability
//!
//! Collaborators that need paired setup/teardown implement [`ScopedResource`]
//! and advertise it through their role trait's `as_scoped` query. Collaborators
//! that don't are used as-is.

use async_trait::async_trait;
use std::fmt;

use crate::Result;

/// Why a scope is being exited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCause {
    /// The scope body finished without error
    Completed,

    /// The scope body returned an error
    Failed,

    /// The scope was stopped by the interruption condition
    Interrupted,
}

impl fmt::Display for ExitCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitCause::Completed => "completed",
            ExitCause::Failed => "failed",
            ExitCause::Interrupted => "interrupted",
        };
        f.write_str(s)
    }
}

/// An object whose `enter` and `exit` must be invoked as a matched pair
///
/// `exit` is called exactly once for every successful `enter`, whatever the
/// outcome of the work done in between.
#[async_trait]
pub trait ScopedResource: Send + Sync {
    /// Acquire whatever the resource needs for the duration of the scope
    async fn enter(&self) -> Result<()>;

    /// Release the resource
    async fn exit(&self, cause: ExitCause) -> Result<()>;
}
