//! Error types for the reclaimd domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use crate::priority::{AccountId, Pid, Uid};
use thiserror::Error;

/// The top-level error type for all reclaimd operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Kernel collaborator errors ---
    #[error("Kernel error: {0}")]
    Kernel(#[from] KernelError),

    // --- Task queue errors ---
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Event and script input ---
    #[error("Malformed input at line {line}: {source}")]
    Input {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures of the procfs / cgroup collaborator.
#[derive(Debug, Clone, Error)]
pub enum KernelError {
    #[error("I/O failed on {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Unexpected contents in {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("No such process: {0}")]
    NoSuchProcess(Pid),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Failed to signal pid {pid}: {reason}")]
    Signal { pid: Pid, reason: String },
}

/// Reasons the priority engine rejected an event.
///
/// None of these are fatal: the hierarchy is left untouched and the caller
/// receives `false`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("Unknown process: pid {pid} under uid {uid}")]
    UnknownProcess { pid: Pid, uid: Uid },

    #[error("Unknown bundle: uid {0}")]
    UnknownBundle(Uid),

    #[error("Bundle {bundle_name} (uid {uid}) is pinned at system priority")]
    PinnedBundle { uid: Uid, bundle_name: String },

    #[error("Account {0} is already the foreground account")]
    AccountUnchanged(AccountId),

    #[error("Stale grace timer for pid {0}")]
    StaleGraceTimer(Pid),
}

/// Failures talking to a component's task queue.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("{0} queue is closed")]
    QueueClosed(&'static str),

    #[error("{0} task dropped the reply")]
    ReplyDropped(&'static str),
}
