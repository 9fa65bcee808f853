//! Error types for pools and runs
//!
//! Structural misuse (starting twice, unsupported items, unknown event names)
//! is reported as [`PoolError`] at the call site. Failures of the supervised
//! work itself are captured as [`RunFailure`] on the run and never abort
//! sibling runs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Errors returned by pool and run operations
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// A value outside the operation's contract
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A run or pool was started twice
    #[error("already started")]
    AlreadyStarted,

    /// A generator pool was asked to decorate a pool that already started
    #[error("unable to decorate a pool that has already started")]
    PoolAlreadyStarted,

    /// A lazy producer failed while being drained
    #[error("producer failed: {0}")]
    Producer(#[source] anyhow::Error),

    /// Invalid configuration
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
}

/// What made a run fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Process exited with a non-zero status or was killed by a signal
    Exit,
    /// Process could not be spawned
    Spawn,
    /// Run refused to start when its pool admitted it
    Start,
    /// Callback returned an error or reported failure
    Callback,
    /// Run was stopped before it completed
    Stopped,
    /// Checking the process status failed
    Io,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exit => write!(f, "exit"),
            Self::Spawn => write!(f, "spawn"),
            Self::Start => write!(f, "start"),
            Self::Callback => write!(f, "callback"),
            Self::Stopped => write!(f, "stopped"),
            Self::Io => write!(f, "io"),
        }
    }
}

/// Failure captured on a run when its work completes unsuccessfully
///
/// Recorded, never propagated: the owning pool keeps scheduling other runs
/// and exposes these through `failures()`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunFailure {
    /// Run that failed
    pub run_id: Uuid,

    /// Failure category
    pub kind: FailureKind,

    /// Human-readable message
    pub message: String,

    /// Process exit code, if the process exited normally
    pub exit_code: Option<i32>,
}

impl RunFailure {
    /// Create a new failure
    pub fn new(run_id: Uuid, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            run_id,
            kind,
            message: message.into(),
            exit_code: None,
        }
    }

    /// Attach a process exit code
    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }
}

impl std::fmt::Display for RunFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.exit_code {
            Some(code) => write!(f, "{} (exit code {})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for RunFailure {}
