//! Runs backed by in-process closures

use std::fmt;
use std::time::Duration;

use uuid::Uuid;

use crate::error::{FailureKind, PoolError, RunFailure};
use crate::event::EventHandler;

use super::{Run, RunCore, RunSnapshot, RunState, Tags};

type Callback = Box<dyn FnOnce() -> anyhow::Result<bool> + Send>;

/// A run that invokes a closure
///
/// The closure runs on the first `poll()` after `start()`. `Ok(true)` marks
/// the run successful; `Ok(false)` or an error is captured as a failure.
///
/// # Example
///
/// ```
/// use runpool::{CallbackRun, Run};
///
/// let mut run = CallbackRun::new(|| Ok(true));
/// run.start().unwrap();
/// while run.poll() {}
/// assert!(run.is_successful());
/// ```
pub struct CallbackRun {
    core: RunCore,
    callback: Option<Callback>,
}

impl CallbackRun {
    /// Wrap a fallible closure
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<bool> + Send + 'static,
    {
        Self {
            core: RunCore::new(),
            callback: Some(Box::new(callback)),
        }
    }

    /// Set the admission priority
    pub fn with_priority(mut self, priority: f64) -> Self {
        self.core.set_priority(priority);
        self
    }

    /// Set descriptive tags
    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.core.set_tags(tags);
        self
    }

    /// Change the admission priority (honored while the run is waiting)
    pub fn set_priority(&mut self, priority: f64) {
        self.core.set_priority(priority);
    }
}

impl fmt::Debug for CallbackRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRun")
            .field("core", &self.core)
            .field("invoked", &self.callback.is_none())
            .finish()
    }
}

impl Run for CallbackRun {
    fn id(&self) -> Uuid {
        self.core.id()
    }

    fn start(&mut self) -> Result<(), PoolError> {
        self.core.begin()
    }

    fn poll(&mut self) -> bool {
        if self.core.state() != RunState::Running {
            return false;
        }

        let Some(callback) = self.callback.take() else {
            return false;
        };

        match callback() {
            Ok(true) => self.core.succeed(),
            Ok(false) => {
                let failure = RunFailure::new(
                    self.core.id(),
                    FailureKind::Callback,
                    "callback reported failure",
                );
                self.core.fail(failure);
            }
            Err(e) => {
                let failure =
                    RunFailure::new(self.core.id(), FailureKind::Callback, format!("{:#}", e));
                self.core.fail(failure);
            }
        }
        false
    }

    fn state(&self) -> RunState {
        self.core.state()
    }

    fn priority(&self) -> f64 {
        self.core.priority()
    }

    fn progress(&self) -> Option<f32> {
        self.core.progress()
    }

    fn tags(&self) -> &Tags {
        self.core.tags()
    }

    fn duration(&self) -> Option<Duration> {
        self.core.duration()
    }

    fn failures(&self) -> Vec<RunFailure> {
        self.core.failures()
    }

    fn stop(&mut self) {
        if self.core.state() != RunState::Running {
            return;
        }

        self.callback = None;
        let failure = RunFailure::new(self.core.id(), FailureKind::Stopped, "callback was stopped");
        self.core.fail(failure);
    }

    fn add_listener(&mut self, name: &str, handler: EventHandler) -> Result<(), PoolError> {
        self.core.add_listener(name, handler)
    }

    fn snapshot(&self) -> RunSnapshot {
        self.core.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_callback_runs_once_on_poll() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut run = CallbackRun::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        });

        run.start().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(run.is_running());

        assert!(!run.poll());
        assert!(!run.poll());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(run.is_successful());
    }

    #[test]
    fn test_poll_before_start_does_nothing() {
        let mut run = CallbackRun::new(|| Ok(true));
        assert!(!run.poll());
        assert_eq!(run.state(), RunState::Pending);
        assert!(!run.is_successful());
    }

    #[test]
    fn test_false_result_is_failure() {
        let mut run = CallbackRun::new(|| Ok(false));
        run.start().unwrap();
        run.poll();

        assert_eq!(run.state(), RunState::Failed);
        assert_eq!(run.failures()[0].message, "callback reported failure");
    }

    #[test]
    fn test_error_is_captured_not_propagated() {
        let mut run = CallbackRun::new(|| Err(anyhow::anyhow!("no route to host")));
        run.start().unwrap();
        run.poll();

        assert!(!run.is_successful());
        let failures = run.failures();
        assert_eq!(failures[0].kind, FailureKind::Callback);
        assert_eq!(failures[0].message, "no route to host");
    }

    #[test]
    fn test_stop_before_poll() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut run = CallbackRun::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        });

        run.start().unwrap();
        run.stop();
        run.poll();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(run.failures()[0].kind, FailureKind::Stopped);
    }

    #[test]
    fn test_priority_and_tags() {
        let mut tags = Tags::new();
        tags.insert("name".into(), serde_json::json!("cb"));

        let run = CallbackRun::new(|| Ok(true))
            .with_priority(3.0)
            .with_tags(tags);

        assert_eq!(run.priority(), 3.0);
        assert_eq!(run.tags()["name"], "cb");
        assert_eq!(run.snapshot().priority, 3.0);
    }
}
