//! Pools of runs
//!
//! This module provides:
//! - [`RunPool`] - The contract shared by every pool (a pool is itself a run)
//! - [`Pool`] - Starts everything at once, then polls until done
//! - [`PriorityPool`] - Admits waiting runs by priority under a simultaneous-run cap
//! - [`GeneratorPool`] - Feeds a pool from lazy producers as capacity frees up
//! - [`Producer`] / [`PoolItem`] - What can be handed to a pool
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      GeneratorPool                           │
//! │  [Producer 1] [Producer 2] ...   (pulled one item at a time) │
//! └──────────────────────────┬──────────────────────────────────┘
//!                            │ add_item() while not saturated
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      PriorityPool                            │
//! │  waiting ──(highest priority first, ≤ max_simultaneous)──►   │
//! │  running ──(poll)──► finished                                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The waiting/running/finished partitions are never stored; they are derived
//! from each run's state whenever they are asked for.

mod base;
mod generator;
mod item;
mod priority;
mod producer;

use crate::error::PoolError;
use crate::run::{Run, RunSnapshot, Tags};

pub use base::Pool;
pub use generator::{GeneratorPool, StepOutcome};
pub use item::PoolItem;
pub use priority::PriorityPool;
pub use producer::{ItemStream, Producer};

/// A collection of runs driven through the [`Run`] lifecycle
///
/// `start()` and `poll()` come from [`Run`]: a pool's `poll()` advances every
/// run it owns and returns whether any work remains.
pub trait RunPool: Run {
    /// Admit an item, converting raw items to runs carrying `tags`
    ///
    /// Fails with [`PoolError::InvalidArgument`] for items the pool cannot
    /// turn into a run.
    fn add_item(&mut self, item: PoolItem, tags: Tags) -> Result<(), PoolError>;

    /// Every run, in insertion order
    fn all(&self) -> Vec<RunSnapshot>;

    /// Runs admitted but not started
    fn waiting(&self) -> Vec<RunSnapshot>;

    /// Runs started and not finished
    fn running(&self) -> Vec<RunSnapshot>;

    /// Runs in a terminal state
    fn finished(&self) -> Vec<RunSnapshot>;

    /// Number of runs owned by the pool
    fn count(&self) -> usize;

    /// Number of runs admitted but not started
    fn waiting_count(&self) -> usize {
        self.waiting().len()
    }

    /// Number of runs started and not finished
    fn running_count(&self) -> usize {
        self.running().len()
    }

    /// Maximum number of simultaneously running runs, if the pool has one
    fn admission_limit(&self) -> Option<usize> {
        None
    }

    /// Whether `poll()` starts the pool on its own when it admits a run
    fn self_starting(&self) -> bool {
        false
    }

    /// Whether admitting another item would only make it wait
    fn is_saturated(&self) -> bool {
        self.admission_limit()
            .is_some_and(|limit| self.waiting_count() + self.running_count() >= limit)
    }
}
