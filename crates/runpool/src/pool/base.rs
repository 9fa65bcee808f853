//! Pool that starts every run at once

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::item::PoolItem;
use super::RunPool;
use crate::error::{FailureKind, PoolError, RunFailure};
use crate::event::{event_names, EventDispatcher, EventHandler, RunEvent};
use crate::run::{Run, RunSnapshot, RunState, Tags, DEFAULT_PRIORITY};

/// A pool that starts all of its runs together
///
/// The pool is itself a [`Run`]: it is pending until started, running while
/// any run is waiting or running, and succeeds once every run succeeded.
/// Runs added after the pool started are started right away. A run whose
/// `start()` fails while it is still pending counts as finished and failed.
///
/// # Example
///
/// ```
/// use runpool::{CallbackRun, Pool, Run, RunPool};
///
/// let mut pool = Pool::new();
/// pool.add(CallbackRun::new(|| Ok(true)))?
///     .add(CallbackRun::new(|| Ok(true)))?;
///
/// pool.start()?;
/// while pool.poll() {}
///
/// assert!(pool.is_successful());
/// assert_eq!(pool.finished().len(), 2);
/// # Ok::<(), runpool::PoolError>(())
/// ```
pub struct Pool {
    id: Uuid,
    runs: Vec<Box<dyn Run>>,
    tags: Tags,
    priority: f64,
    started: bool,
    started_at: Option<Instant>,
    elapsed: Option<Duration>,
    completed: bool,
    finished_seen: usize,
    // Runs that refused to start, by run id
    rejected: HashMap<Uuid, RunFailure>,
    events: EventDispatcher,
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

impl Pool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self {
            id: Uuid::now_v7(),
            runs: Vec::new(),
            tags: Tags::new(),
            priority: DEFAULT_PRIORITY,
            started: false,
            started_at: None,
            elapsed: None,
            completed: false,
            finished_seen: 0,
            rejected: HashMap::new(),
            events: EventDispatcher::for_pool(),
        }
    }

    /// Set the pool's own tags
    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    /// Set the pool's own priority (used when nested in another pool)
    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = priority;
        self
    }

    pub fn set_priority(&mut self, priority: f64) {
        self.priority = priority;
    }

    /// Add an item; chainable
    pub fn add(&mut self, item: impl Into<PoolItem>) -> Result<&mut Self, PoolError> {
        self.add_item(item.into(), Tags::new())?;
        Ok(self)
    }

    /// Add an item, tagging it if it has to be converted to a run; chainable
    pub fn add_tagged(
        &mut self,
        item: impl Into<PoolItem>,
        tags: Tags,
    ) -> Result<&mut Self, PoolError> {
        self.add_item(item.into(), tags)?;
        Ok(self)
    }

    /// Start (if needed) and poll until nothing is running
    ///
    /// Returns whether every run succeeded.
    #[instrument(skip(self), fields(pool_id = %self.id, runs = self.runs.len()))]
    pub async fn run(&mut self, interval: Duration) -> bool {
        if !self.started {
            // Start errors are recorded as run failures
            let _ = self.launch();
        }

        while self.poll() {
            tokio::time::sleep(interval).await;
        }
        self.is_successful()
    }

    /// Blocking variant of [`Pool::run`] for callers without a runtime
    pub fn run_blocking(&mut self, interval: Duration) -> bool {
        if !self.started {
            // Start errors are recorded as run failures
            let _ = self.launch();
        }

        while self.poll() {
            std::thread::sleep(interval);
        }
        self.is_successful()
    }

    // Shared with `PriorityPool`, which drives admission itself

    pub(crate) fn runs(&self) -> &[Box<dyn Run>] {
        &self.runs
    }

    /// Mark the pool started without starting any run
    pub(crate) fn begin(&mut self) {
        self.started = true;
        self.started_at = Some(Instant::now());
        info!(pool_id = %self.id, runs = self.runs.len(), "Pool started");
        self.emit(event_names::STARTED);
    }

    pub(crate) fn push_run(&mut self, run: Box<dyn Run>) {
        debug!(
            pool_id = %self.id,
            run_id = %run.id(),
            priority = run.priority(),
            "Run added"
        );

        if self.events.has_listeners(event_names::RUN_ADDED) {
            let event = RunEvent::new(event_names::RUN_ADDED, run.snapshot());
            if let Err(e) = self.events.dispatch(event_names::RUN_ADDED, &event) {
                warn!(pool_id = %self.id, "Failed to dispatch {}: {}", event_names::RUN_ADDED, e);
            }
        }

        self.runs.push(run);
        self.refresh();
    }

    /// Start the run at `index`
    ///
    /// A run still pending afterwards is recorded as failed, so it never
    /// shows up as waiting again.
    pub(crate) fn start_run(&mut self, index: usize) -> Result<(), PoolError> {
        let Some(run) = self.runs.get_mut(index) else {
            return Ok(());
        };
        let run_id = run.id();
        let result = run.start();
        if let Err(e) = &result {
            warn!(pool_id = %self.id, run_id = %run_id, "Failed to start run: {}", e);
        }
        if !run.has_started() {
            let message = match &result {
                Err(e) => e.to_string(),
                Ok(()) => "run stayed pending after start".to_string(),
            };
            self.rejected
                .insert(run_id, RunFailure::new(run_id, FailureKind::Start, message));
        }
        result
    }

    /// Whether the run is waiting to be started
    pub(crate) fn is_waiting(&self, run: &dyn Run) -> bool {
        !run.has_started() && !self.rejected.contains_key(&run.id())
    }

    fn is_finished(&self, run: &dyn Run) -> bool {
        (run.has_started() && !run.is_running()) || self.rejected.contains_key(&run.id())
    }

    fn finished_count(&self) -> usize {
        self.runs.iter().filter(|run| self.is_finished(run.as_ref())).count()
    }

    /// Poll every running run once
    pub(crate) fn poll_running(&mut self) {
        for run in self.runs.iter_mut().filter(|run| run.is_running()) {
            run.poll();
        }
    }

    /// Emit progress and completion events for state reached since the last call
    pub(crate) fn refresh(&mut self) {
        if !self.started {
            return;
        }

        let finished = self.finished_count();
        if finished != self.finished_seen {
            self.finished_seen = finished;
            self.emit(event_names::UPDATED);
        }

        match self.state() {
            RunState::Succeeded | RunState::Failed if !self.completed => {
                self.completed = true;
                self.elapsed = self.started_at.map(|started| started.elapsed());
                self.complete();
            }
            RunState::Running if self.completed => {
                // Runs were added after completion
                self.completed = false;
                self.elapsed = None;
            }
            _ => {}
        }
    }

    /// Begin and start every waiting run, returning the first start error
    fn launch(&mut self) -> Result<(), PoolError> {
        self.begin();
        let mut first_error = None;
        for index in 0..self.runs.len() {
            if self.is_waiting(self.runs[index].as_ref()) {
                if let Err(e) = self.start_run(index) {
                    first_error.get_or_insert(e);
                }
            }
        }
        self.refresh();
        first_error.map_or(Ok(()), Err)
    }

    fn complete(&mut self) {
        let successful = self.is_successful();
        info!(
            pool_id = %self.id,
            runs = self.runs.len(),
            successful,
            duration_ms = self.elapsed.map(|d| d.as_millis() as u64),
            "Pool completed"
        );

        if successful {
            self.emit(event_names::SUCCESSFUL);
        } else {
            self.emit(event_names::FAILED);
        }
        self.emit(event_names::COMPLETED);
    }

    fn emit(&mut self, name: &'static str) {
        if !self.events.has_listeners(name) {
            return;
        }

        let event = RunEvent::new(name, self.snapshot());
        if let Err(e) = self.events.dispatch(name, &event) {
            warn!(pool_id = %self.id, "Failed to dispatch {}: {}", name, e);
        }
    }

    fn snapshots(&self, filter: impl Fn(&&Box<dyn Run>) -> bool) -> Vec<RunSnapshot> {
        self.runs
            .iter()
            .filter(filter)
            .map(|run| run.snapshot())
            .collect()
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("runs", &self.runs)
            .finish()
    }
}

impl Run for Pool {
    fn id(&self) -> Uuid {
        self.id
    }

    fn start(&mut self) -> Result<(), PoolError> {
        if self.started {
            return Err(PoolError::AlreadyStarted);
        }

        self.launch()
    }

    fn poll(&mut self) -> bool {
        self.poll_running();
        self.refresh();
        self.running_count() > 0
    }

    fn state(&self) -> RunState {
        if !self.started {
            return RunState::Pending;
        }
        let settled = self
            .runs
            .iter()
            .all(|run| run.state().is_terminal() || self.rejected.contains_key(&run.id()));
        if !settled {
            return RunState::Running;
        }
        if self.rejected.is_empty() && self.runs.iter().all(|run| run.is_successful()) {
            RunState::Succeeded
        } else {
            RunState::Failed
        }
    }

    fn priority(&self) -> f64 {
        self.priority
    }

    /// Fraction of runs finished
    fn progress(&self) -> Option<f32> {
        if self.runs.is_empty() {
            return None;
        }
        let finished = self.finished_count();
        Some(finished as f32 / self.runs.len() as f32)
    }

    fn tags(&self) -> &Tags {
        &self.tags
    }

    fn duration(&self) -> Option<Duration> {
        self.elapsed
            .or_else(|| self.started_at.map(|started| started.elapsed()))
    }

    /// Failures of every run, in insertion order
    fn failures(&self) -> Vec<RunFailure> {
        self.runs
            .iter()
            .flat_map(|run| match self.rejected.get(&run.id()) {
                Some(failure) => vec![failure.clone()],
                None => run.failures(),
            })
            .collect()
    }

    fn stop(&mut self) {
        for run in self.runs.iter_mut().filter(|run| run.is_running()) {
            run.stop();
        }
        self.refresh();
    }

    fn add_listener(&mut self, name: &str, handler: EventHandler) -> Result<(), PoolError> {
        self.events.add_listener(name, handler)
    }
}

impl RunPool for Pool {
    fn add_item(&mut self, item: PoolItem, tags: Tags) -> Result<(), PoolError> {
        let mut run = item.into_run(tags)?;
        if self.started && !run.has_started() {
            if let Err(e) = run.start() {
                warn!(pool_id = %self.id, run_id = %run.id(), "Failed to start run: {}", e);
                // A run that never started is not admitted
                if !run.has_started() {
                    return Err(e);
                }
            }
        }
        self.push_run(run);
        Ok(())
    }

    fn all(&self) -> Vec<RunSnapshot> {
        self.snapshots(|_| true)
    }

    fn waiting(&self) -> Vec<RunSnapshot> {
        self.snapshots(|run| self.is_waiting(run.as_ref()))
    }

    fn running(&self) -> Vec<RunSnapshot> {
        self.snapshots(|run| run.is_running())
    }

    fn finished(&self) -> Vec<RunSnapshot> {
        self.snapshots(|run| self.is_finished(run.as_ref()))
    }

    fn count(&self) -> usize {
        self.runs.len()
    }

    fn waiting_count(&self) -> usize {
        self.runs.iter().filter(|run| self.is_waiting(run.as_ref())).count()
    }

    fn running_count(&self) -> usize {
        self.runs.iter().filter(|run| run.is_running()).count()
    }
}

#[cfg(test)]
mod tests {
    use std::process::Command;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::pool::testing::{ScriptedRun, StartLog};
    use crate::pool::Producer;
    use crate::run::CallbackRun;

    #[test]
    fn test_start_starts_every_waiting_run() {
        let mut pool = Pool::new();
        pool.add(ScriptedRun::new("a", 1))
            .unwrap()
            .add(ScriptedRun::new("b", 2))
            .unwrap();

        assert_eq!(pool.waiting().len(), 2);
        assert_eq!(pool.state(), RunState::Pending);

        pool.start().unwrap();
        assert_eq!(pool.running().len(), 2);
        assert!(pool.waiting().is_empty());

        assert!(pool.poll());
        assert_eq!(pool.finished().len(), 1);
        assert!(!pool.poll());
        assert!(pool.is_successful());
    }

    #[test]
    fn test_start_twice_fails() {
        let mut pool = Pool::new();
        pool.start().unwrap();
        assert!(matches!(pool.start(), Err(PoolError::AlreadyStarted)));
    }

    #[test]
    fn test_unstarted_pool_is_not_successful() {
        let pool = Pool::new();
        assert!(!pool.is_successful());
        assert!(!pool.has_started());
    }

    #[test]
    fn test_empty_started_pool_is_successful() {
        let mut pool = Pool::new();
        pool.start().unwrap();
        assert!(pool.is_successful());
        assert_eq!(pool.progress(), None);
    }

    #[test]
    fn test_poll_without_running_runs_is_idempotent() {
        let mut pool = Pool::new();
        pool.add(ScriptedRun::new("a", 1)).unwrap();

        assert!(!pool.poll());
        assert!(!pool.poll());
        assert_eq!(pool.waiting().len(), 1);
        assert_eq!(pool.state(), RunState::Pending);
    }

    #[test]
    fn test_run_added_after_start_is_started() {
        let mut pool = Pool::new();
        pool.start().unwrap();
        pool.add(ScriptedRun::new("late", 1)).unwrap();

        assert_eq!(pool.running().len(), 1);
        assert_eq!(pool.state(), RunState::Running);
        assert!(!pool.poll());
        assert!(pool.is_successful());
    }

    #[test]
    fn test_failures_are_aggregated_in_insertion_order() {
        let mut pool = Pool::new();
        pool.add(ScriptedRun::new("first", 2).failing())
            .unwrap()
            .add(ScriptedRun::new("ok", 1))
            .unwrap()
            .add(ScriptedRun::new("second", 1).failing())
            .unwrap();

        pool.start().unwrap();
        while pool.poll() {}

        assert_eq!(pool.state(), RunState::Failed);
        assert!(!pool.is_successful());
        let messages: Vec<_> = pool.failures().into_iter().map(|f| f.message).collect();
        assert_eq!(messages, vec!["first", "second"]);
    }

    #[test]
    fn test_run_that_refuses_to_start_is_failed() {
        let mut pool = Pool::new();
        pool.add(ScriptedRun::new("stuck", 1).refusing())
            .unwrap()
            .add(ScriptedRun::new("ok", 1))
            .unwrap();

        assert!(matches!(pool.start(), Err(PoolError::InvalidArgument(_))));
        assert!(pool.has_started());
        assert_eq!(pool.running().len(), 1);
        assert!(pool.waiting().is_empty());

        while pool.poll() {}

        assert_eq!(pool.finished().len(), 2);
        assert_eq!(pool.progress(), Some(1.0));
        assert_eq!(pool.state(), RunState::Failed);
        let failures = pool.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind, FailureKind::Start);
        assert_eq!(failures[0].message, "invalid argument: stuck refused");
    }

    #[test]
    fn test_refused_run_added_after_start_is_not_admitted() {
        let mut pool = Pool::new();
        pool.start().unwrap();

        let result = pool.add(ScriptedRun::new("stuck", 1).refusing());
        assert!(matches!(result, Err(PoolError::InvalidArgument(_))));
        assert_eq!(pool.count(), 0);
        assert!(pool.is_successful());
    }

    #[test]
    fn test_progress_counts_finished_runs() {
        let mut pool = Pool::new();
        pool.add(ScriptedRun::new("fast", 1))
            .unwrap()
            .add(ScriptedRun::new("slow", 3))
            .unwrap();

        pool.start().unwrap();
        assert_eq!(pool.progress(), Some(0.0));
        pool.poll();
        assert_eq!(pool.progress(), Some(0.5));
    }

    #[test]
    fn test_command_and_callback_items_get_tags() {
        let mut tags = Tags::new();
        tags.insert("type".into(), serde_json::json!("batch"));

        let mut pool = Pool::new();
        pool.add_tagged(Command::new("true"), tags.clone())
            .unwrap()
            .add_tagged(PoolItem::callback(|| Ok(true)), tags)
            .unwrap();

        for snapshot in pool.all() {
            assert_eq!(snapshot.tags["type"], "batch");
        }
    }

    #[test]
    fn test_producer_is_rejected() {
        let mut pool = Pool::new();
        let err = pool
            .add(Producer::from_items(Vec::<PoolItem>::new()))
            .unwrap_err();
        assert!(matches!(err, PoolError::InvalidArgument(_)));
        assert_eq!(pool.count(), 0);
    }

    #[test]
    fn test_events_are_dispatched() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut pool = Pool::new();

        for name in [
            event_names::RUN_ADDED,
            event_names::STARTED,
            event_names::SUCCESSFUL,
            event_names::COMPLETED,
        ] {
            let sink = Arc::clone(&seen);
            pool.add_listener(name, Box::new(move |event| sink.lock().unwrap().push(event.name)))
                .unwrap();
        }

        pool.add(CallbackRun::new(|| Ok(true))).unwrap();
        pool.start().unwrap();
        while pool.poll() {}

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                "pool.run.added",
                "run.started",
                "run.successful",
                "run.completed"
            ]
        );
    }

    #[test]
    fn test_unknown_event_name_is_rejected() {
        let mut pool = Pool::new();
        let err = pool
            .add_listener("pool.exploded", Box::new(|_| {}))
            .unwrap_err();
        assert!(matches!(err, PoolError::InvalidArgument(_)));
    }

    #[test]
    fn test_nested_pool_runs_as_a_run() {
        let log = StartLog::default();
        let mut inner = Pool::new();
        inner
            .add(ScriptedRun::new("inner", 2).logged(&log))
            .unwrap();

        let mut outer = Pool::new();
        outer
            .add(PoolItem::run(inner))
            .unwrap()
            .add(ScriptedRun::new("outer", 1).logged(&log))
            .unwrap();

        outer.start().unwrap();
        while outer.poll() {}

        assert!(outer.is_successful());
        assert_eq!(*log.lock().unwrap(), vec!["inner", "outer"]);
    }

    #[test]
    fn test_stop_fails_running_runs() {
        let mut pool = Pool::new();
        pool.add(CallbackRun::new(|| Ok(true))).unwrap();
        pool.start().unwrap();
        pool.stop();

        assert_eq!(pool.state(), RunState::Failed);
        assert_eq!(pool.failures().len(), 1);
    }

    #[test]
    fn test_run_blocking() {
        let mut pool = Pool::new();
        pool.add(ScriptedRun::new("a", 2)).unwrap();
        assert!(pool.run_blocking(Duration::from_millis(1)));
    }

    #[tokio::test]
    async fn test_run_async() {
        let mut pool = Pool::new();
        pool.add(ScriptedRun::new("a", 1))
            .unwrap()
            .add(ScriptedRun::new("b", 2))
            .unwrap()
            .add(ScriptedRun::new("c", 3))
            .unwrap();

        assert!(pool.run(Duration::from_millis(1)).await);
        assert_eq!(pool.finished().len(), 3);
        assert!(pool.duration().is_some());
    }
}
