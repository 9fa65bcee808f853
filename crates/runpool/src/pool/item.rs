//! Items accepted by pools

use std::fmt;
use std::process::Command;

use crate::error::PoolError;
use crate::run::{CallbackRun, ProcessRun, Run, Tags};

use super::producer::Producer;

/// Something that can be added to a pool
///
/// Runs are admitted as-is. Raw items (commands, callbacks, JSON work
/// descriptors) are converted into runs carrying the tags passed to
/// `add_tagged`. Producers are only accepted by a generator pool.
pub enum PoolItem {
    /// A ready-made run (including nested pools)
    Run(Box<dyn Run>),

    /// A subprocess, wrapped in a [`ProcessRun`]
    Process(Command),

    /// A closure, wrapped in a [`CallbackRun`]
    Callback(Box<dyn FnOnce() -> anyhow::Result<bool> + Send>),

    /// A JSON work descriptor, see [`crate::ProcessDescriptor`]
    Descriptor(serde_json::Value),

    /// A lazy source of further items
    Producer(Producer),
}

impl PoolItem {
    /// Wrap any run
    pub fn run<R: Run + 'static>(run: R) -> Self {
        Self::Run(Box::new(run))
    }

    /// Wrap a closure
    pub fn callback<F>(callback: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<bool> + Send + 'static,
    {
        Self::Callback(Box::new(callback))
    }

    /// Short name of the variant, for logs and errors
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Run(_) => "run",
            Self::Process(_) => "process",
            Self::Callback(_) => "callback",
            Self::Descriptor(_) => "descriptor",
            Self::Producer(_) => "producer",
        }
    }

    /// Convert into a run, applying `tags` to converted raw items
    ///
    /// Fails with [`PoolError::InvalidArgument`] for producers and malformed
    /// descriptors.
    pub fn into_run(self, tags: Tags) -> Result<Box<dyn Run>, PoolError> {
        match self {
            Self::Run(run) => Ok(run),
            Self::Process(command) => Ok(Box::new(ProcessRun::new(command).with_tags(tags))),
            Self::Callback(callback) => Ok(Box::new(CallbackRun::new(callback).with_tags(tags))),
            Self::Descriptor(value) => {
                let mut run = ProcessRun::from_descriptor(value)?;
                if !tags.is_empty() {
                    let mut merged = run.tags().clone();
                    merged.extend(tags);
                    run = run.with_tags(merged);
                }
                Ok(Box::new(run))
            }
            Self::Producer(_) => Err(PoolError::InvalidArgument(
                "producers can only be added to a generator pool".into(),
            )),
        }
    }
}

impl fmt::Debug for PoolItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run(run) => f.debug_tuple("Run").field(run).finish(),
            Self::Process(command) => f.debug_tuple("Process").field(command).finish(),
            Self::Callback(_) => f.write_str("Callback(..)"),
            Self::Descriptor(value) => f.debug_tuple("Descriptor").field(value).finish(),
            Self::Producer(producer) => f.debug_tuple("Producer").field(producer).finish(),
        }
    }
}

impl From<Box<dyn Run>> for PoolItem {
    fn from(run: Box<dyn Run>) -> Self {
        Self::Run(run)
    }
}

impl From<ProcessRun> for PoolItem {
    fn from(run: ProcessRun) -> Self {
        Self::run(run)
    }
}

impl From<CallbackRun> for PoolItem {
    fn from(run: CallbackRun) -> Self {
        Self::run(run)
    }
}

impl From<Command> for PoolItem {
    fn from(command: Command) -> Self {
        Self::Process(command)
    }
}

impl From<serde_json::Value> for PoolItem {
    fn from(value: serde_json::Value) -> Self {
        Self::Descriptor(value)
    }
}

impl From<Producer> for PoolItem {
    fn from(producer: Producer) -> Self {
        Self::Producer(producer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::RunState;

    #[test]
    fn test_callback_conversion_applies_tags() {
        let mut tags = Tags::new();
        tags.insert("batch".into(), serde_json::json!(7));

        let run = PoolItem::callback(|| Ok(true)).into_run(tags).unwrap();
        assert_eq!(run.tags()["batch"], 7);
        assert_eq!(run.state(), RunState::Pending);
    }

    #[test]
    fn test_descriptor_tags_are_merged() {
        let mut tags = Tags::new();
        tags.insert("batch".into(), serde_json::json!(1));

        let item = PoolItem::from(serde_json::json!({
            "command": "true",
            "tags": {"name": "noop"}
        }));
        let run = item.into_run(tags).unwrap();
        assert_eq!(run.tags()["name"], "noop");
        assert_eq!(run.tags()["batch"], 1);
    }

    #[test]
    fn test_producer_is_not_a_run() {
        let item = PoolItem::from(Producer::from_items(Vec::<PoolItem>::new()));
        assert_eq!(item.kind(), "producer");
        let err = item.into_run(Tags::new()).unwrap_err();
        assert!(matches!(err, PoolError::InvalidArgument(_)));
    }

    #[test]
    fn test_malformed_descriptor_is_rejected() {
        let err = PoolItem::from(serde_json::json!("ls -la"))
            .into_run(Tags::new())
            .unwrap_err();
        assert!(matches!(err, PoolError::InvalidArgument(_)));
    }
}
