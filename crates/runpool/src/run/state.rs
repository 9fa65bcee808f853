//! Shared lifecycle bookkeeping for run implementations

use std::time::{Duration, Instant};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{PoolError, RunFailure};
use crate::event::{event_names, EventDispatcher, EventHandler, RunEvent};

use super::{RunSnapshot, RunState, Tags, DEFAULT_PRIORITY};

/// Lifecycle state shared by run implementations
///
/// Owns the state machine, timing, tags, priority, captured failure and the
/// event dispatcher. Concrete runs embed one and forward the [`super::Run`]
/// queries to it; every transition goes through `begin`, `succeed` or `fail`
/// so listeners are notified right after the state changes.
#[derive(Debug)]
pub struct RunCore {
    id: Uuid,
    state: RunState,
    priority: f64,
    tags: Tags,
    progress: Option<f32>,
    started_at: Option<Instant>,
    elapsed: Option<Duration>,
    failure: Option<RunFailure>,
    events: EventDispatcher,
}

impl Default for RunCore {
    fn default() -> Self {
        Self::new()
    }
}

impl RunCore {
    /// Create a pending run core with default priority and no tags
    pub fn new() -> Self {
        Self {
            id: Uuid::now_v7(),
            state: RunState::Pending,
            priority: DEFAULT_PRIORITY,
            tags: Tags::new(),
            progress: None,
            started_at: None,
            elapsed: None,
            failure: None,
            events: EventDispatcher::for_run(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn priority(&self) -> f64 {
        self.priority
    }

    pub fn set_priority(&mut self, priority: f64) {
        self.priority = priority;
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    pub fn set_tags(&mut self, tags: Tags) {
        self.tags = tags;
    }

    pub fn progress(&self) -> Option<f32> {
        self.progress
    }

    pub fn failure(&self) -> Option<&RunFailure> {
        self.failure.as_ref()
    }

    /// Failures as a list, for [`super::Run::failures`]
    pub fn failures(&self) -> Vec<RunFailure> {
        self.failure.iter().cloned().collect()
    }

    /// Time spent running, frozen at completion
    pub fn duration(&self) -> Option<Duration> {
        self.elapsed
            .or_else(|| self.started_at.map(|started| started.elapsed()))
    }

    pub fn add_listener(&mut self, name: &str, handler: EventHandler) -> Result<(), PoolError> {
        self.events.add_listener(name, handler)
    }

    /// Move from pending to running
    pub fn begin(&mut self) -> Result<(), PoolError> {
        if self.state != RunState::Pending {
            return Err(PoolError::AlreadyStarted);
        }

        self.state = RunState::Running;
        self.started_at = Some(Instant::now());
        debug!(run_id = %self.id, "Run started");
        self.emit(event_names::STARTED);
        Ok(())
    }

    /// Record a successful completion; ignored once terminal
    pub fn succeed(&mut self) {
        if !self.settle(RunState::Succeeded) {
            return;
        }

        debug!(run_id = %self.id, duration_ms = self.duration_ms(), "Run succeeded");
        self.emit(event_names::SUCCESSFUL);
        self.emit(event_names::COMPLETED);
    }

    /// Record a failed completion; ignored once terminal
    pub fn fail(&mut self, failure: RunFailure) {
        if !self.settle(RunState::Failed) {
            return;
        }

        warn!(
            run_id = %self.id,
            kind = %failure.kind,
            duration_ms = self.duration_ms(),
            "Run failed: {}",
            failure
        );
        self.failure = Some(failure);
        self.emit(event_names::FAILED);
        self.emit(event_names::COMPLETED);
    }

    /// Report progress in `0.0..=1.0`
    pub fn set_progress(&mut self, progress: f32) {
        self.progress = Some(progress.clamp(0.0, 1.0));
        self.emit(event_names::UPDATED);
    }

    /// Snapshot of the core's state
    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            id: self.id,
            state: self.state,
            priority: self.priority,
            tags: self.tags.clone(),
            progress: self.progress,
            duration_ms: self.duration_ms(),
            failures: self.failures(),
        }
    }

    fn settle(&mut self, state: RunState) -> bool {
        if self.state.is_terminal() {
            return false;
        }

        self.elapsed = Some(self.duration().unwrap_or(Duration::ZERO));
        self.state = state;
        true
    }

    fn duration_ms(&self) -> Option<u64> {
        self.duration().map(|d| d.as_millis() as u64)
    }

    fn emit(&mut self, name: &'static str) {
        if !self.events.has_listeners(name) {
            return;
        }

        let event = RunEvent::new(name, self.snapshot());
        if let Err(e) = self.events.dispatch(name, &event) {
            warn!(run_id = %self.id, "Failed to dispatch {}: {}", name, e);
        }
    }
}
