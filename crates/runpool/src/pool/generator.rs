//! Pool decorator fed by lazy producers

use std::collections::VecDeque;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::item::PoolItem;
use super::priority::PriorityPool;
use super::producer::Producer;
use super::RunPool;
use crate::error::{PoolError, RunFailure};
use crate::event::EventHandler;
use crate::run::{Run, RunSnapshot, RunState, Tags};

/// Result of one non-blocking [`GeneratorPool::step`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Work remains; call `step()` again after a pause
    Pending,
    /// Producers are drained and nothing is running
    Done,
}

/// Feeds a pool from lazy producers without outrunning its capacity
///
/// Producers are drained front to back, one item at a time. While the
/// decorated pool is saturated (it has an admission limit and
/// `waiting + running >= limit`) no further item is pulled; the pool is
/// polled instead until capacity frees up. Once every producer is drained
/// the decorated pool is started if needed and polled until it finishes.
///
/// Queries other than [`GeneratorPool::count`] are answered by the
/// decorated pool.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use runpool::{CallbackRun, GeneratorPool, PriorityPool, Producer};
///
/// # tokio_test::block_on(async {
/// let pool = PriorityPool::new().with_max_simultaneous(2)?;
/// let mut generator = GeneratorPool::new(pool)?;
/// generator.add(Producer::from_items((0..5).map(|_| CallbackRun::new(|| Ok(true)))))?;
///
/// assert!(generator.run(Duration::from_millis(1)).await?);
/// # Ok::<(), runpool::PoolError>(())
/// # }).unwrap();
/// ```
#[derive(Debug)]
pub struct GeneratorPool<P: RunPool = PriorityPool> {
    pool: P,
    producers: VecDeque<(Producer, Tags)>,
    current: Option<(Producer, Tags)>,
    started: bool,
    aborted: bool,
    producer_error: Option<PoolError>,
}

impl<P: RunPool> GeneratorPool<P> {
    /// Decorate a pool that has not started
    ///
    /// Fails with [`PoolError::PoolAlreadyStarted`] otherwise.
    pub fn new(pool: P) -> Result<Self, PoolError> {
        if pool.has_started() {
            return Err(PoolError::PoolAlreadyStarted);
        }

        Ok(Self {
            pool,
            producers: VecDeque::new(),
            current: None,
            started: false,
            aborted: false,
            producer_error: None,
        })
    }

    /// Queue a producer, or forward any other item to the decorated pool
    pub fn add(&mut self, item: impl Into<PoolItem>) -> Result<&mut Self, PoolError> {
        self.add_tagged(item, Tags::new())
    }

    /// Like [`GeneratorPool::add`]; tags apply to every raw item a producer yields
    pub fn add_tagged(
        &mut self,
        item: impl Into<PoolItem>,
        tags: Tags,
    ) -> Result<&mut Self, PoolError> {
        match item.into() {
            PoolItem::Producer(producer) => {
                self.producers.push_back((producer, tags));
                debug!(
                    pool_id = %self.pool.id(),
                    producers = self.count(),
                    "Producer queued"
                );
            }
            item => self.pool.add_item(item, tags)?,
        }
        Ok(self)
    }

    /// Producers not yet fully drained, including the one being drained
    pub fn count(&self) -> usize {
        self.producers.len() + usize::from(self.current.is_some())
    }

    /// The decorated pool
    pub fn pool(&self) -> &P {
        &self.pool
    }

    /// Unwrap the decorated pool
    pub fn into_inner(self) -> P {
        self.pool
    }

    pub fn all(&self) -> Vec<RunSnapshot> {
        self.pool.all()
    }

    pub fn waiting(&self) -> Vec<RunSnapshot> {
        self.pool.waiting()
    }

    pub fn running(&self) -> Vec<RunSnapshot> {
        self.pool.running()
    }

    pub fn finished(&self) -> Vec<RunSnapshot> {
        self.pool.finished()
    }

    /// Error from a producer that failed while this pool was polled as a run
    ///
    /// The pool stays failed after the error is taken.
    pub fn take_producer_error(&mut self) -> Option<PoolError> {
        self.producer_error.take()
    }

    /// Drain producers and poll the decorated pool until it finishes
    ///
    /// Returns whether every run succeeded. A failing producer aborts the
    /// loop with [`PoolError::Producer`]; runs already admitted are left as
    /// they are.
    #[instrument(skip(self), fields(pool_id = %self.pool.id(), producers = self.count()))]
    pub async fn run(&mut self, interval: Duration) -> Result<bool, PoolError> {
        self.started = true;
        while self.step()? == StepOutcome::Pending {
            tokio::time::sleep(interval).await;
        }
        Ok(self.finish())
    }

    /// Blocking variant of [`GeneratorPool::run`] for callers without a runtime
    pub fn run_blocking(&mut self, interval: Duration) -> Result<bool, PoolError> {
        self.started = true;
        while self.step()? == StepOutcome::Pending {
            std::thread::sleep(interval);
        }
        Ok(self.finish())
    }

    /// Advance without blocking: feed items while there is capacity, then poll
    pub fn step(&mut self) -> Result<StepOutcome, PoolError> {
        loop {
            if self.pool.is_saturated() {
                if !self.pool.has_started() && !self.pool.self_starting() {
                    self.start_pool();
                }
                self.pool.poll();
                if self.pool.is_saturated() {
                    return Ok(StepOutcome::Pending);
                }
            }

            match self.next_item() {
                Some(Ok((item, tags))) => self.pool.add_item(item, tags)?,
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }

        if !self.pool.has_started() {
            self.start_pool();
        }

        if self.pool.poll() {
            Ok(StepOutcome::Pending)
        } else {
            Ok(StepOutcome::Done)
        }
    }

    fn next_item(&mut self) -> Option<Result<(PoolItem, Tags), PoolError>> {
        loop {
            if self.current.is_none() {
                let next = self.producers.pop_front()?;
                debug!(
                    pool_id = %self.pool.id(),
                    remaining = self.producers.len(),
                    "Draining producer"
                );
                self.current = Some(next);
            }

            let (producer, tags) = self.current.as_mut()?;
            match producer.next_item() {
                Some(Ok(item)) => return Some(Ok((item, tags.clone()))),
                Some(Err(e)) => {
                    warn!(
                        pool_id = %self.pool.id(),
                        pulled = producer.pulled(),
                        "Producer failed: {}",
                        e
                    );
                    self.current = None;
                    return Some(Err(e));
                }
                None => {
                    debug!(
                        pool_id = %self.pool.id(),
                        pulled = producer.pulled(),
                        "Producer drained"
                    );
                    self.current = None;
                }
            }
        }
    }

    fn start_pool(&mut self) {
        // Runs that refuse to start are recorded as failures by the pool
        if let Err(e) = self.pool.start() {
            warn!(pool_id = %self.pool.id(), "Decorated pool started with errors: {}", e);
        }
    }

    fn finish(&self) -> bool {
        let successful = self.pool.is_successful();
        info!(
            pool_id = %self.pool.id(),
            runs = self.pool.count(),
            successful,
            "Generator pool finished"
        );
        successful
    }
}

impl<P: RunPool> Run for GeneratorPool<P> {
    fn id(&self) -> Uuid {
        self.pool.id()
    }

    fn start(&mut self) -> Result<(), PoolError> {
        if self.has_started() {
            return Err(PoolError::AlreadyStarted);
        }

        self.started = true;
        self.poll();
        Ok(())
    }

    /// One [`GeneratorPool::step`]; an error fails this pool for good
    fn poll(&mut self) -> bool {
        if !self.started || self.aborted {
            return false;
        }

        match self.step() {
            Ok(outcome) => outcome == StepOutcome::Pending,
            Err(e) => {
                warn!(pool_id = %self.pool.id(), "Generator pool aborted: {}", e);
                self.aborted = true;
                self.producer_error = Some(e);
                false
            }
        }
    }

    fn state(&self) -> RunState {
        if self.aborted {
            return RunState::Failed;
        }

        // Still feeding: undrained producers keep this pool running
        let state = self.pool.state();
        let feeding = state == RunState::Pending || (state.is_terminal() && self.count() > 0);
        if self.started && feeding {
            RunState::Running
        } else {
            state
        }
    }

    fn priority(&self) -> f64 {
        self.pool.priority()
    }

    fn progress(&self) -> Option<f32> {
        self.pool.progress()
    }

    fn tags(&self) -> &Tags {
        self.pool.tags()
    }

    fn duration(&self) -> Option<Duration> {
        self.pool.duration()
    }

    fn failures(&self) -> Vec<RunFailure> {
        self.pool.failures()
    }

    fn stop(&mut self) {
        self.pool.stop();
    }

    fn add_listener(&mut self, name: &str, handler: EventHandler) -> Result<(), PoolError> {
        self.pool.add_listener(name, handler)
    }
}
