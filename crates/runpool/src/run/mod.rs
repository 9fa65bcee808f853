//! Run abstractions
//!
//! A run is one schedulable unit of work with a start/poll lifecycle:
//!
//! ```text
//! ┌─────────┐  start()  ┌─────────┐  poll()  ┌───────────┐
//! │ Pending │ ────────► │ Running │ ───────► │ Succeeded │
//! └─────────┘           └─────────┘    │     └───────────┘
//!                                      │     ┌───────────┐
//!                                      └───► │  Failed   │
//!                                            └───────────┘
//! ```
//!
//! This module provides:
//! - [`Run`] - The capability set every schedulable unit implements
//! - [`RunCore`] - Shared lifecycle bookkeeping for run implementations
//! - [`ProcessRun`] - An OS subprocess
//! - [`CallbackRun`] - An in-process closure

mod callback;
mod process;
mod state;

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PoolError, RunFailure};
use crate::event::EventHandler;

pub use callback::CallbackRun;
pub use process::{CommandLine, ProcessDescriptor, ProcessRun};
pub use state::RunCore;

/// Priority given to runs that do not set one
pub const DEFAULT_PRIORITY: f64 = 1.0;

/// Arbitrary key/value metadata attached to runs and pools
pub type Tags = BTreeMap<String, serde_json::Value>;

/// Lifecycle state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Created, not started
    Pending,

    /// Started, work in progress
    Running,

    /// Work completed successfully
    Succeeded,

    /// Work completed unsuccessfully
    Failed,
}

impl RunState {
    /// Whether the state can no longer change
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Owned, point-in-time copy of a run's observable state
///
/// Pool getters return snapshots rather than live references so that status
/// can be read from another thread without racing the polling loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub id: Uuid,
    pub state: RunState,
    pub priority: f64,
    pub tags: Tags,
    pub progress: Option<f32>,
    pub duration_ms: Option<u64>,
    pub failures: Vec<RunFailure>,
}

impl RunSnapshot {
    /// Whether the run was still in progress when the snapshot was taken
    pub fn is_running(&self) -> bool {
        self.state == RunState::Running
    }
}

/// A schedulable unit of work
///
/// Transitions are driven by the owning pool: `start()` once, then `poll()`
/// until it returns `false`. Implementations must keep `poll()` cheap and
/// non-blocking, and must make it a no-op once the run is terminal.
///
/// # Example
///
/// ```ignore
/// use runpool::{CallbackRun, Run};
///
/// let mut run = CallbackRun::new(|| Ok(true));
/// run.start()?;
/// while run.poll() {}
/// assert!(run.is_successful());
/// ```
pub trait Run: Send {
    /// Stable identifier used in snapshots, events and logs
    fn id(&self) -> Uuid;

    /// Begin execution
    ///
    /// Fails with [`PoolError::AlreadyStarted`] when called a second time.
    fn start(&mut self) -> Result<(), PoolError>;

    /// Advance internal state; returns whether the run is still in progress
    fn poll(&mut self) -> bool;

    /// Current lifecycle state
    fn state(&self) -> RunState;

    /// Whether the run has started and not yet finished
    fn is_running(&self) -> bool {
        self.state() == RunState::Running
    }

    /// Whether `start()` has been called
    fn has_started(&self) -> bool {
        self.state() != RunState::Pending
    }

    /// Whether the run finished successfully
    fn is_successful(&self) -> bool {
        self.state() == RunState::Succeeded
    }

    /// Admission priority; higher starts first
    fn priority(&self) -> f64 {
        DEFAULT_PRIORITY
    }

    /// Fractional completion estimate, for observers only
    fn progress(&self) -> Option<f32> {
        None
    }

    /// Descriptive metadata
    fn tags(&self) -> &Tags;

    /// Time spent running so far, frozen once the run completes
    fn duration(&self) -> Option<Duration>;

    /// Failures captured while running
    fn failures(&self) -> Vec<RunFailure>;

    /// Terminate the underlying work, if it supports it
    fn stop(&mut self) {}

    /// Register a lifecycle listener
    fn add_listener(&mut self, name: &str, handler: EventHandler) -> Result<(), PoolError>;

    /// Owned copy of the observable state
    fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            id: self.id(),
            state: self.state(),
            priority: self.priority(),
            tags: self.tags().clone(),
            progress: self.progress(),
            duration_ms: self.duration().map(|d| d.as_millis() as u64),
            failures: self.failures(),
        }
    }
}

impl std::fmt::Debug for dyn Run {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Run")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("priority", &self.priority())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_state_display() {
        assert_eq!(RunState::Pending.to_string(), "pending");
        assert_eq!(RunState::Running.to_string(), "running");
        assert_eq!(RunState::Succeeded.to_string(), "succeeded");
        assert_eq!(RunState::Failed.to_string(), "failed");
    }

    #[test]
    fn test_terminal_states() {
        assert!(!RunState::Pending.is_terminal());
        assert!(!RunState::Running.is_terminal());
        assert!(RunState::Succeeded.is_terminal());
        assert!(RunState::Failed.is_terminal());
    }

    #[test]
    fn test_snapshot_serialization() {
        let mut tags = Tags::new();
        tags.insert("sleep".to_string(), serde_json::json!(3));

        let snapshot = RunSnapshot {
            id: Uuid::now_v7(),
            state: RunState::Succeeded,
            priority: 2.5,
            tags,
            progress: Some(1.0),
            duration_ms: Some(1200),
            failures: vec![],
        };

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["state"], "succeeded");
        assert_eq!(json["tags"]["sleep"], 3);

        let parsed: RunSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, snapshot);
    }
}
