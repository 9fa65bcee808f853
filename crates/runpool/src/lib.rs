//! # Run Pool
//!
//! A cooperative scheduler that supervises many independent runs (OS
//! subprocesses or in-process callbacks) under a concurrency cap.
//!
//! ## Features
//!
//! - **Derived partitions**: waiting/running/finished are computed from each run's state
//! - **Priority admission**: highest priority first, insertion order among equals
//! - **Lazy feeding**: generator pools pull work from producers only as capacity frees up
//! - **Lifecycle events**: allow-listed listeners on runs and pools
//! - **Nesting**: every pool is itself a run
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      GeneratorPool                           │
//! │  (drains producers one item at a time, honors saturation)   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   PriorityPool / Pool                        │
//! │  (admission policy, poll cycle, aggregate status)           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ProcessRun / CallbackRun                     │
//! │  (start, non-blocking completion check, captured failure)   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The scheduler never spawns threads. Concurrency comes from the supervised
//! processes; the control loop polls them and sleeps between cycles.
//!
//! ## Example
//!
//! ```ignore
//! use runpool::prelude::*;
//!
//! let config = PoolConfig::from_env()?;
//! let mut pool = GeneratorPool::new(PriorityPool::from_config(&config)?)?;
//!
//! pool.add(Producer::new(|| {
//!     files.into_iter().map(|path| {
//!         let mut command = Command::new("gzip");
//!         command.arg(path);
//!         Ok(PoolItem::from(command))
//!     })
//! }))?;
//!
//! let successful = pool.run(config.poll_interval).await?;
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod pool;
pub mod run;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{PoolConfig, CHECK_INTERVAL};
    pub use crate::error::{FailureKind, PoolError, RunFailure};
    pub use crate::event::{event_names, EventHandler, RunEvent};
    pub use crate::pool::{
        GeneratorPool, Pool, PoolItem, PriorityPool, Producer, RunPool, StepOutcome,
    };
    pub use crate::run::{CallbackRun, ProcessRun, Run, RunSnapshot, RunState, Tags};
}

// Re-export key types at crate root
pub use config::{PoolConfig, CHECK_INTERVAL};
pub use error::{FailureKind, PoolError, RunFailure};
pub use event::{event_names, EventDispatcher, EventHandler, RunEvent};
pub use pool::{
    GeneratorPool, ItemStream, Pool, PoolItem, PriorityPool, Producer, RunPool, StepOutcome,
};
pub use run::{
    CallbackRun, CommandLine, ProcessDescriptor, ProcessRun, Run, RunCore, RunSnapshot, RunState,
    Tags, DEFAULT_PRIORITY,
};
