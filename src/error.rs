//! Errors that end a match before, or right after, it is played.
//!
//! Faults of an agent during a turn are not errors: they are folded into a fallback
//! move and counted (see [`MoveResponse`](crate::agent::MoveResponse)).

use thiserror::Error;

/// Fatal judge errors.
///
/// Most APIs return `anyhow::Result`; the variant can be recovered with
/// `err.downcast_ref::<JudgeError>()` to tell configuration problems from a replay
/// that could not be written.
#[derive(Debug, Error)]
pub enum JudgeError {
    /// Missing or malformed bot config or map file.
    #[error("configuration error: {0}")]
    Config(String),
    /// The agent process could not be launched or its streams attached.
    #[error("could not start agent {slot}: {reason}")]
    Start { slot: u8, reason: String },
    /// An agent handle was used in the wrong lifecycle state.
    #[error("agent {slot}: {reason}")]
    State { slot: u8, reason: String },
    /// The match was played to the end but the replay could not be persisted.
    #[error("failed to save replay to {path}: {reason}")]
    Replay { path: String, reason: String },
}
