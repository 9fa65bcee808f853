//! Lifecycle events for runs and pools
//!
//! Each component accepts listeners for a fixed allow-list of event names.
//! Registering or dispatching a name outside that list is a programming error
//! and fails with [`PoolError::InvalidArgument`].

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::PoolError;
use crate::run::RunSnapshot;

/// Event name constants
pub mod event_names {
    /// Run moved to running
    pub const STARTED: &str = "run.started";

    /// Run finished successfully
    pub const SUCCESSFUL: &str = "run.successful";

    /// Run finished with a failure
    pub const FAILED: &str = "run.failed";

    /// Run reached a terminal state (after successful/failed)
    pub const COMPLETED: &str = "run.completed";

    /// Run reported progress
    pub const UPDATED: &str = "run.updated";

    /// A run was added to a pool
    pub const RUN_ADDED: &str = "pool.run.added";
}

/// Events every run may dispatch
pub const RUN_EVENTS: &[&str] = &[
    event_names::STARTED,
    event_names::SUCCESSFUL,
    event_names::FAILED,
    event_names::COMPLETED,
    event_names::UPDATED,
];

/// Events a pool may dispatch (a pool is also a run)
pub const POOL_EVENTS: &[&str] = &[
    event_names::STARTED,
    event_names::SUCCESSFUL,
    event_names::FAILED,
    event_names::COMPLETED,
    event_names::UPDATED,
    event_names::RUN_ADDED,
];

/// Event delivered to listeners
#[derive(Debug, Clone, Serialize)]
pub struct RunEvent {
    /// Event name (one of [`event_names`])
    pub name: &'static str,

    /// State of the run the event is about, taken right after the transition
    pub run: RunSnapshot,

    /// When the event was dispatched
    pub timestamp: DateTime<Utc>,
}

impl RunEvent {
    /// Create a new event stamped with the current time
    pub fn new(name: &'static str, run: RunSnapshot) -> Self {
        Self {
            name,
            run,
            timestamp: Utc::now(),
        }
    }
}

/// Listener callback
pub type EventHandler = Box<dyn FnMut(&RunEvent) + Send>;

/// Publish/subscribe registry restricted to an allow-list of names
pub struct EventDispatcher {
    allowed: &'static [&'static str],
    listeners: HashMap<&'static str, Vec<EventHandler>>,
}

impl EventDispatcher {
    /// Create a dispatcher accepting only `allowed` names
    pub fn new(allowed: &'static [&'static str]) -> Self {
        Self {
            allowed,
            listeners: HashMap::new(),
        }
    }

    /// Dispatcher for run events
    pub fn for_run() -> Self {
        Self::new(RUN_EVENTS)
    }

    /// Dispatcher for pool events
    pub fn for_pool() -> Self {
        Self::new(POOL_EVENTS)
    }

    /// Names this dispatcher accepts
    pub fn event_names(&self) -> &'static [&'static str] {
        self.allowed
    }

    /// Register a listener for `name`
    pub fn add_listener(&mut self, name: &str, handler: EventHandler) -> Result<(), PoolError> {
        let name = self.assert_event_name(name)?;
        self.listeners.entry(name).or_default().push(handler);
        Ok(())
    }

    /// Deliver `event` to every listener registered under `name`
    pub fn dispatch(&mut self, name: &str, event: &RunEvent) -> Result<(), PoolError> {
        let name = self.assert_event_name(name)?;
        if let Some(handlers) = self.listeners.get_mut(name) {
            for handler in handlers.iter_mut() {
                handler(event);
            }
        }
        Ok(())
    }

    /// Whether anyone listens for `name` (lets callers skip building snapshots)
    pub fn has_listeners(&self, name: &str) -> bool {
        self.listeners.get(name).is_some_and(|h| !h.is_empty())
    }

    fn assert_event_name(&self, name: &str) -> Result<&'static str, PoolError> {
        self.allowed
            .iter()
            .copied()
            .find(|allowed| *allowed == name)
            .ok_or_else(|| {
                PoolError::InvalidArgument(format!(
                    "the supplied event name: {} is not one of the expected: {}",
                    name,
                    self.allowed.join(", ")
                ))
            })
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("allowed", &self.allowed)
            .field(
                "listeners",
                &self
                    .listeners
                    .iter()
                    .map(|(name, handlers)| (*name, handlers.len()))
                    .collect::<HashMap<_, _>>(),
            )
            .finish()
    }
}
