//! Typed error hierarchy for the pipeline engine.
//!
//! Three top-level enums cover the three subsystems:
//! - `ModelError` — phase/state validation failures, synchronous, never retried
//! - `CheckpointError` — checkpoint store I/O and required-field failures
//! - `InvokeError` — agent invocation failures (timeout, auth, subprocess)

use crate::phase::{PhaseStatus, PhaseType};
use std::path::PathBuf;
use thiserror::Error;

/// Errors from the phase/state model. All are validation failures detected
/// before any I/O happens.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Unknown phase: {0}")]
    UnknownPhase(String),

    #[error("Unknown autonomy mode: {0}")]
    UnknownMode(String),

    #[error("No phase after {0}")]
    NoNextPhase(PhaseType),

    #[error("No phase before {0}")]
    NoPreviousPhase(PhaseType),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: PhaseStatus, to: PhaseStatus },

    #[error("Project root must not be empty")]
    EmptyProjectRoot,

    #[error("Phase {0} is already complete and cannot change")]
    PhaseAlreadyComplete(PhaseType),

    #[error("Failed to serialize pipeline state: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Failed to deserialize pipeline state: {0}")]
    Deserialize(#[source] serde_json::Error),
}

/// Errors from the checkpoint store.
///
/// Fatal for single-file operations (`write_checkpoint`, `load_checkpoint`).
/// Bulk scans swallow and count these instead, so one bad file never aborts
/// a whole directory operation.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Failed to create checkpoints directory {path}: {source}")]
    CreateDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write checkpoint {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read checkpoint {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse checkpoint {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Checkpoint {path} is missing required field '{field}'")]
    MissingField { path: PathBuf, field: &'static str },
}

/// Errors from a single agent invocation.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("Failed to spawn agent process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("Agent invocation exceeded its deadline of {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Agent credentials expired and could not be recovered: {0}")]
    AuthExpired(String),

    #[error("Credential refresh rejected: HTTP {status}: {body}")]
    RefreshFailed { status: u16, body: String },

    #[error("Credential file has no refresh token")]
    MissingRefreshToken,

    #[error("Failed to read credential file {path}: {message}")]
    CredentialsUnreadable { path: PathBuf, message: String },

    #[error("Agent exited with code {exit_code}: {stderr}")]
    Subprocess { exit_code: i32, stderr: String },
}
