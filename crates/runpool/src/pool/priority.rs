//! Pool with priority-ordered admission under a simultaneous-run cap

use std::time::Duration;

use tracing::{debug, instrument};
use uuid::Uuid;

use super::base::Pool;
use super::item::PoolItem;
use super::RunPool;
use crate::config::PoolConfig;
use crate::error::{PoolError, RunFailure};
use crate::event::EventHandler;
use crate::run::{Run, RunSnapshot, RunState, Tags};

/// A pool that admits waiting runs one at a time, highest priority first
///
/// Every `poll()` first polls the running runs, then starts the
/// highest-priority waiting run (earliest added among equals) until
/// `max_simultaneous` runs are running. Priorities are read at admission
/// time, so changing a waiting run's priority is honored on the next poll.
///
/// A steady stream of higher-priority additions can delay a low-priority run
/// indefinitely; it still starts once its competitors are exhausted.
///
/// `poll()` admits runs even before `start()` and marks the pool started when
/// it does.
///
/// A run that fails to start is recorded as a [`FailureKind::Start`] failure
/// and admission moves on to the next waiting run.
///
/// [`FailureKind::Start`]: crate::error::FailureKind::Start
///
/// # Example
///
/// ```
/// use runpool::{CallbackRun, PriorityPool, Run, RunPool};
///
/// let mut pool = PriorityPool::new().with_max_simultaneous(1)?;
/// pool.add(CallbackRun::new(|| Ok(true)).with_priority(1.0))?
///     .add(CallbackRun::new(|| Ok(true)).with_priority(5.0))?;
///
/// pool.poll();
/// assert_eq!(pool.running()[0].priority, 5.0);
/// # Ok::<(), runpool::PoolError>(())
/// ```
#[derive(Debug, Default)]
pub struct PriorityPool {
    inner: Pool,
    max_simultaneous: Option<usize>,
}

impl PriorityPool {
    /// Create an unbounded priority pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pool with the configured admission limit
    pub fn from_config(config: &PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        Ok(Self {
            inner: Pool::new(),
            max_simultaneous: config.max_simultaneous,
        })
    }

    /// Set the admission limit (must be at least 1)
    pub fn with_max_simultaneous(mut self, max: usize) -> Result<Self, PoolError> {
        self.set_max_simultaneous(Some(max))?;
        Ok(self)
    }

    /// Set the pool's own tags
    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.inner = self.inner.with_tags(tags);
        self
    }

    /// Set the pool's own priority (used when nested in another pool)
    pub fn with_priority(mut self, priority: f64) -> Self {
        self.inner.set_priority(priority);
        self
    }

    pub fn set_priority(&mut self, priority: f64) {
        self.inner.set_priority(priority);
    }

    /// Change the admission limit; `None` removes it
    ///
    /// Takes effect on the next `poll()`. Lowering the limit never stops runs
    /// that are already running.
    pub fn set_max_simultaneous(&mut self, max: Option<usize>) -> Result<(), PoolError> {
        if max == Some(0) {
            return Err(PoolError::InvalidArgument(
                "max_simultaneous must be at least 1".into(),
            ));
        }
        self.max_simultaneous = max;
        Ok(())
    }

    pub fn max_simultaneous(&self) -> Option<usize> {
        self.max_simultaneous
    }

    /// Add an item without starting it; chainable
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

    /// Poll until nothing is waiting or running
    ///
    /// Returns whether every run succeeded.
    #[instrument(skip(self), fields(pool_id = %self.inner.id(), max = ?self.max_simultaneous))]
    pub async fn run(&mut self, interval: Duration) -> bool {
        while self.poll() {
            tokio::time::sleep(interval).await;
        }
        self.ensure_started();
        self.is_successful()
    }

    /// Blocking variant of [`PriorityPool::run`] for callers without a runtime
    pub fn run_blocking(&mut self, interval: Duration) -> bool {
        while self.poll() {
            std::thread::sleep(interval);
        }
        self.ensure_started();
        self.is_successful()
    }

    fn ensure_started(&mut self) {
        if !self.inner.has_started() {
            self.inner.begin();
            self.inner.refresh();
        }
    }

    /// Start waiting runs while below the limit, returning the first start error
    fn admit(&mut self) -> Result<(), PoolError> {
        let mut first_error = None;
        while self.has_capacity() {
            let Some(index) = self.next_waiting() else {
                break;
            };

            if !self.inner.has_started() {
                self.inner.begin();
            }

            debug!(
                pool_id = %self.inner.id(),
                run_id = %self.inner.runs()[index].id(),
                priority = self.inner.runs()[index].priority(),
                "Admitting run"
            );
            if let Err(e) = self.inner.start_run(index) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn has_capacity(&self) -> bool {
        self.max_simultaneous
            .map_or(true, |max| self.inner.running_count() < max)
    }

    /// Index of the highest-priority waiting run, earliest first among equals
    fn next_waiting(&self) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (index, run) in self.inner.runs().iter().enumerate() {
            if !self.inner.is_waiting(run.as_ref()) {
                continue;
            }
            let priority = run.priority();
            if best.map_or(true, |(_, top)| priority.total_cmp(&top).is_gt()) {
                best = Some((index, priority));
            }
        }
        best.map(|(index, _)| index)
    }
}

impl Run for PriorityPool {
    fn id(&self) -> Uuid {
        self.inner.id()
    }

    fn start(&mut self) -> Result<(), PoolError> {
        if self.inner.has_started() {
            return Err(PoolError::AlreadyStarted);
        }

        self.inner.begin();
        let admitted = self.admit();
        self.inner.refresh();
        admitted
    }

    fn poll(&mut self) -> bool {
        self.inner.poll_running();
        // Start errors are recorded as run failures
        let _ = self.admit();
        self.inner.refresh();
        self.inner.running_count() > 0 || self.inner.waiting_count() > 0
    }

    fn state(&self) -> RunState {
        self.inner.state()
    }

    fn priority(&self) -> f64 {
        self.inner.priority()
    }

    fn progress(&self) -> Option<f32> {
        self.inner.progress()
    }

    fn tags(&self) -> &Tags {
        self.inner.tags()
    }

    fn duration(&self) -> Option<Duration> {
        self.inner.duration()
    }

    fn failures(&self) -> Vec<RunFailure> {
        self.inner.failures()
    }

    /// Stops running runs; waiting runs stay waiting
    fn stop(&mut self) {
        self.inner.stop();
    }

    fn add_listener(&mut self, name: &str, handler: EventHandler) -> Result<(), PoolError> {
        self.inner.add_listener(name, handler)
    }
}

impl RunPool for PriorityPool {
    fn add_item(&mut self, item: PoolItem, tags: Tags) -> Result<(), PoolError> {
        let run = item.into_run(tags)?;
        self.inner.push_run(run);
        Ok(())
    }

    fn all(&self) -> Vec<RunSnapshot> {
        self.inner.all()
    }

    fn waiting(&self) -> Vec<RunSnapshot> {
        self.inner.waiting()
    }

    fn running(&self) -> Vec<RunSnapshot> {
        self.inner.running()
    }

    fn finished(&self) -> Vec<RunSnapshot> {
        self.inner.finished()
    }

    fn count(&self) -> usize {
        self.inner.count()
    }

    fn waiting_count(&self) -> usize {
        self.inner.waiting_count()
    }

    fn running_count(&self) -> usize {
        self.inner.running_count()
    }

    fn admission_limit(&self) -> Option<usize> {
        self.max_simultaneous
    }

    fn self_starting(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::error::FailureKind;
    use crate::pool::testing::{ScriptedRun, StartLog};

    fn started(log: &StartLog) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    #[test]
    fn test_zero_limit_is_rejected() {
        let mut pool = PriorityPool::new();
        assert!(matches!(
            pool.set_max_simultaneous(Some(0)),
            Err(PoolError::InvalidArgument(_))
        ));
        assert!(PriorityPool::new().with_max_simultaneous(0).is_err());
        assert_eq!(pool.max_simultaneous(), None);
    }

    #[test]
    fn test_equal_priorities_start_in_insertion_order() {
        let log = StartLog::default();
        let mut pool = PriorityPool::new().with_max_simultaneous(1).unwrap();
        for label in ["r1", "r2", "r3"] {
            pool.add(ScriptedRun::new(label, 1).logged(&log)).unwrap();
        }

        while pool.poll() {}

        assert_eq!(started(&log), vec!["r1", "r2", "r3"]);
        assert!(pool.is_successful());
    }

    #[test]
    fn test_highest_priority_is_admitted_first() {
        let log = StartLog::default();
        let mut pool = PriorityPool::new().with_max_simultaneous(1).unwrap();
        pool.add(ScriptedRun::new("low", 1).with_priority(0.5).logged(&log))
            .unwrap()
            .add(ScriptedRun::new("high", 1).with_priority(10.0).logged(&log))
            .unwrap()
            .add(ScriptedRun::new("mid", 1).with_priority(2.0).logged(&log))
            .unwrap()
            .add(ScriptedRun::new("mid-later", 1).with_priority(2.0).logged(&log))
            .unwrap();

        while pool.poll() {}

        assert_eq!(started(&log), vec!["high", "mid", "mid-later", "low"]);
    }

    #[test]
    fn test_running_never_exceeds_limit() {
        let mut pool = PriorityPool::new().with_max_simultaneous(2).unwrap();
        for i in 0..5 {
            pool.add(ScriptedRun::new(&format!("r{i}"), 2)).unwrap();
        }

        while pool.poll() {
            assert!(pool.running().len() <= 2);
        }
        assert_eq!(pool.finished().len(), 5);
    }

    #[test]
    fn test_poll_self_starts_the_pool() {
        let mut pool = PriorityPool::new();
        pool.add(ScriptedRun::new("a", 2)).unwrap();
        assert!(!pool.has_started());

        assert!(pool.poll());
        assert!(pool.has_started());
        assert!(matches!(pool.start(), Err(PoolError::AlreadyStarted)));
    }

    #[test]
    fn test_poll_on_empty_pool_does_not_start_it() {
        let mut pool = PriorityPool::new();
        assert!(!pool.poll());
        assert!(!pool.has_started());
        assert!(!pool.is_successful());
    }

    #[test]
    fn test_start_admits_up_to_the_limit() {
        let mut pool = PriorityPool::new().with_max_simultaneous(2).unwrap();
        for i in 0..3 {
            pool.add(ScriptedRun::new(&format!("r{i}"), 1)).unwrap();
        }

        pool.start().unwrap();
        assert_eq!(pool.running_count(), 2);
        assert_eq!(pool.waiting_count(), 1);
        assert!(pool.is_saturated());
    }

    #[test]
    fn test_limit_change_applies_on_next_poll() {
        let mut pool = PriorityPool::new().with_max_simultaneous(1).unwrap();
        for i in 0..4 {
            pool.add(ScriptedRun::new(&format!("r{i}"), 5)).unwrap();
        }

        pool.poll();
        assert_eq!(pool.running_count(), 1);

        pool.set_max_simultaneous(Some(3)).unwrap();
        assert_eq!(pool.running_count(), 1);
        pool.poll();
        assert_eq!(pool.running_count(), 3);

        pool.set_max_simultaneous(None).unwrap();
        pool.poll();
        assert_eq!(pool.running_count(), 4);
    }

    #[test]
    fn test_from_config() {
        let config = PoolConfig::new().with_max_simultaneous(3);
        let pool = PriorityPool::from_config(&config).unwrap();
        assert_eq!(pool.admission_limit(), Some(3));

        let invalid = PoolConfig::new().with_max_simultaneous(0);
        assert!(PriorityPool::from_config(&invalid).is_err());
    }

    #[test]
    fn test_failed_run_does_not_block_others() {
        let mut pool = PriorityPool::new().with_max_simultaneous(1).unwrap();
        pool.add(ScriptedRun::new("bad", 1).failing())
            .unwrap()
            .add(ScriptedRun::new("good", 1))
            .unwrap();

        while pool.poll() {}

        assert_eq!(pool.finished().len(), 2);
        assert_eq!(pool.failures().len(), 1);
        assert_eq!(pool.state(), RunState::Failed);
    }

    #[test]
    fn test_run_that_refuses_to_start_does_not_stall_admission() {
        let log = StartLog::default();
        let mut pool = PriorityPool::new().with_max_simultaneous(2).unwrap();
        pool.add(ScriptedRun::new("stuck", 1).with_priority(9.0).refusing())
            .unwrap()
            .add(ScriptedRun::new("a", 2).logged(&log))
            .unwrap()
            .add(ScriptedRun::new("b", 1).logged(&log))
            .unwrap();

        let mut cycles = 0;
        while pool.poll() {
            cycles += 1;
            assert!(cycles < 100);
        }

        assert_eq!(started(&log), vec!["a", "b"]);
        assert_eq!(pool.finished().len(), 3);
        assert_eq!(pool.waiting_count(), 0);
        assert_eq!(pool.state(), RunState::Failed);
        let failures = pool.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind, FailureKind::Start);
    }

    #[test]
    fn test_start_returns_the_first_start_error() {
        let mut pool = PriorityPool::new().with_max_simultaneous(1).unwrap();
        pool.add(ScriptedRun::new("stuck", 1).refusing())
            .unwrap()
            .add(ScriptedRun::new("ok", 1))
            .unwrap();

        assert!(matches!(pool.start(), Err(PoolError::InvalidArgument(_))));
        assert_eq!(pool.running_count(), 1);
        assert!(!pool.run_blocking(Duration::from_millis(1)));
    }

    #[tokio::test]
    async fn test_run_empty_pool_succeeds() {
        let mut pool = PriorityPool::new().with_max_simultaneous(2).unwrap();
        assert!(pool.run(Duration::from_millis(1)).await);
        assert!(pool.has_started());
    }

    proptest! {
        #[test]
        fn prop_running_bounded_and_all_admitted(
            limit in 1usize..5,
            runs in prop::collection::vec((0u8..4, 1usize..4), 0..12),
        ) {
            let mut pool = PriorityPool::new().with_max_simultaneous(limit).unwrap();
            for (i, (priority, polls)) in runs.iter().enumerate() {
                let run = ScriptedRun::new(&format!("r{i}"), *polls).with_priority(f64::from(*priority));
                pool.add(run).unwrap();
            }

            let mut cycles = 0;
            while pool.poll() {
                prop_assert!(pool.running_count() <= limit);
                cycles += 1;
                prop_assert!(cycles < 1000);
            }

            prop_assert_eq!(pool.finished().len(), runs.len());
            prop_assert_eq!(pool.waiting_count(), 0);
        }
    }
}
