//! Checkpoint identifier encoding
//!
//! An id has the shape `{global_step}-{run_id}__{token}`. The step is always the
//! first hyphen-delimited segment and the token is always the last
//! double-underscore segment, so run ids may themselves contain hyphens.

use harness_core::{CheckpointId, Error, Result, RunId, Step};
use uuid::Uuid;

/// Separator between the step and the run id
pub const STEP_SEPARATOR: char = '-';

/// Separator between the run id and the random token
pub const TOKEN_SEPARATOR: &str = "__";

/// Components recovered from a checkpoint id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedCheckpointId {
    pub global_step: Step,
    pub run_id: RunId,
    pub token: String,
}

/// Build a checkpoint id from its parts
pub fn encode_checkpoint_id(global_step: Step, run_id: &str, token: &str) -> CheckpointId {
    format!("{global_step}{STEP_SEPARATOR}{run_id}{TOKEN_SEPARATOR}{token}")
}

/// Build a fresh checkpoint id with a random token
pub fn generate_checkpoint_id(global_step: Step, run_id: &str) -> CheckpointId {
    encode_checkpoint_id(global_step, run_id, &Uuid::new_v4().to_string())
}

/// Recover the step, run id and token from a checkpoint id
pub fn decode_checkpoint_id(id: &str) -> Result<DecodedCheckpointId> {
    let (base, token) = id
        .rsplit_once(TOKEN_SEPARATOR)
        .ok_or_else(|| malformed(id, "missing token separator"))?;

    let mut parts = base.split(STEP_SEPARATOR);
    let step_segment = parts.next().unwrap_or_default();
    let global_step = step_segment.parse::<Step>().map_err(|e| {
        malformed(id, &format!("global step {step_segment:?} is not an integer: {e}"))
    })?;
    let run_id = parts.collect::<Vec<_>>().join(&STEP_SEPARATOR.to_string());

    Ok(DecodedCheckpointId {
        global_step,
        run_id,
        token: token.to_string(),
    })
}

/// Parse only the leading step segment, as used to tie-break most-recent lookups
pub fn leading_step(id: &str) -> Result<Step> {
    let segment = id.split(STEP_SEPARATOR).next().unwrap_or_default();
    segment
        .parse::<Step>()
        .map_err(|e| malformed(id, &format!("global step {segment:?} is not an integer: {e}")))
}

fn malformed(id: &str, reason: &str) -> Error {
    Error::MalformedCheckpointId {
        checkpoint_id: id.to_string(),
        reason: reason.to_string(),
    }
}
