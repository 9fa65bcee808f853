//! Runs backed by OS subprocesses

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{FailureKind, PoolError, RunFailure};
use crate::event::EventHandler;

use super::{Run, RunCore, RunState, Tags};

/// Command line of a process descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandLine {
    /// Executed through `sh -c`
    Shell(String),
    /// Program followed by its arguments
    Argv(Vec<String>),
}

/// Raw work descriptor convertible into a [`ProcessRun`]
///
/// # Example
///
/// ```
/// use runpool::ProcessDescriptor;
///
/// let descriptor: ProcessDescriptor = serde_json::from_value(serde_json::json!({
///     "command": ["sleep", "1"],
///     "priority": 2.0,
///     "tags": {"sleep": 1}
/// }))
/// .unwrap();
/// assert_eq!(descriptor.priority, Some(2.0));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessDescriptor {
    pub command: CommandLine,

    #[serde(default)]
    pub priority: Option<f64>,

    #[serde(default)]
    pub tags: Tags,

    /// Extra environment variables
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Working directory
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

impl ProcessDescriptor {
    /// Parse a JSON descriptor
    pub fn from_value(value: serde_json::Value) -> Result<Self, PoolError> {
        serde_json::from_value(value)
            .map_err(|e| PoolError::InvalidArgument(format!("unsupported work descriptor: {}", e)))
    }

    /// Build the command this descriptor describes
    pub fn to_command(&self) -> Result<Command, PoolError> {
        let mut command = match &self.command {
            CommandLine::Shell(line) => {
                let mut command = Command::new("sh");
                command.arg("-c").arg(line);
                command
            }
            CommandLine::Argv(argv) => {
                let (program, args) = argv.split_first().ok_or_else(|| {
                    PoolError::InvalidArgument("work descriptor has an empty command".into())
                })?;
                let mut command = Command::new(program);
                command.args(args);
                command
            }
        };

        command.envs(&self.env);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        Ok(command)
    }
}

/// A run that supervises one OS subprocess
///
/// `start()` spawns the command; `poll()` checks it with `try_wait` and never
/// blocks. A non-zero exit status or a spawn error is captured as a
/// [`RunFailure`]. Dropping a run whose process is still alive kills it.
///
/// # Example
///
/// ```ignore
/// use std::process::Command;
/// use runpool::ProcessRun;
///
/// let mut command = Command::new("sleep");
/// command.arg("1");
///
/// let run = ProcessRun::new(command)
///     .with_priority(2.0)
///     .with_tags([("sleep".to_string(), serde_json::json!(1))].into());
/// ```
#[derive(Debug)]
pub struct ProcessRun {
    core: RunCore,
    command: Command,
    command_line: String,
    child: Option<Child>,
    spawn_failure: Option<RunFailure>,
}

impl ProcessRun {
    /// Wrap a command; nothing is spawned until `start()`
    pub fn new(command: Command) -> Self {
        let command_line = describe(&command);
        Self {
            core: RunCore::new(),
            command,
            command_line,
            child: None,
            spawn_failure: None,
        }
    }

    /// Build a run from a JSON work descriptor
    ///
    /// Fails with [`PoolError::InvalidArgument`] if the value is not a
    /// well-formed [`ProcessDescriptor`].
    pub fn from_descriptor(value: serde_json::Value) -> Result<Self, PoolError> {
        let descriptor = ProcessDescriptor::from_value(value)?;
        let mut run = Self::new(descriptor.to_command()?).with_tags(descriptor.tags);
        if let Some(priority) = descriptor.priority {
            run.set_priority(priority);
        }
        Ok(run)
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

    /// Human-readable command line
    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// OS process id while the process is alive
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    fn failure(&self, kind: FailureKind, message: String) -> RunFailure {
        RunFailure::new(self.core.id(), kind, message)
    }
}

impl Run for ProcessRun {
    fn id(&self) -> Uuid {
        self.core.id()
    }

    fn start(&mut self) -> Result<(), PoolError> {
        self.core.begin()?;

        match self.command.spawn() {
            Ok(child) => {
                debug!(
                    run_id = %self.core.id(),
                    pid = child.id(),
                    command = %self.command_line,
                    "Process spawned"
                );
                self.child = Some(child);
            }
            Err(e) => {
                // Settled on the next poll so poll() stays the only way out of Running
                self.spawn_failure = Some(self.failure(
                    FailureKind::Spawn,
                    format!("failed to spawn `{}`: {}", self.command_line, e),
                ));
            }
        }
        Ok(())
    }

    fn poll(&mut self) -> bool {
        if self.core.state() != RunState::Running {
            return false;
        }

        if let Some(failure) = self.spawn_failure.take() {
            self.core.fail(failure);
            return false;
        }

        let Some(child) = self.child.as_mut() else {
            return false;
        };

        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                self.child = None;
                if status.success() {
                    self.core.succeed();
                } else {
                    let failure = self
                        .failure(
                            FailureKind::Exit,
                            format!("`{}` exited with {}", self.command_line, status),
                        )
                        .with_exit_code(status.code());
                    self.core.fail(failure);
                }
                false
            }
            Err(e) => {
                let failure = self.failure(
                    FailureKind::Io,
                    format!("failed to check `{}`: {}", self.command_line, e),
                );
                self.stop_child();
                self.core.fail(failure);
                false
            }
        }
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

        self.stop_child();
        let failure = self.failure(
            FailureKind::Stopped,
            format!("`{}` was stopped", self.command_line),
        );
        self.core.fail(failure);
    }

    fn add_listener(&mut self, name: &str, handler: EventHandler) -> Result<(), PoolError> {
        self.core.add_listener(name, handler)
    }

    fn snapshot(&self) -> super::RunSnapshot {
        self.core.snapshot()
    }
}

impl ProcessRun {
    fn stop_child(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                debug!(run_id = %self.core.id(), "Kill failed (process likely exited): {}", e);
            }
            if let Err(e) = child.wait() {
                warn!(run_id = %self.core.id(), "Failed to reap process: {}", e);
            }
        }
    }
}

impl Drop for ProcessRun {
    fn drop(&mut self) {
        self.stop_child();
    }
}

fn describe(command: &Command) -> String {
    std::iter::once(command.get_program())
        .chain(command.get_args())
        .map(|part| part.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}
