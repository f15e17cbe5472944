use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// One configured backup. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupJob {
    /// Unique job id, also the remote bucket name.
    pub name: String,
    /// Time between the starts of two ticks.
    #[serde(serialize_with = "serialize_duration")]
    pub interval: Duration,
    /// Artifact path template (`{dt}`, `{name}`).
    pub path_template: String,
    /// Shell command templates (`{path}`), run in order.
    pub commands: Vec<String>,
}

impl BackupJob {
    pub fn new(
        name: impl Into<String>,
        interval: Duration,
        path_template: impl Into<String>,
        commands: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            interval,
            path_template: path_template.into(),
            commands,
        }
    }
}

/// What happens to the local artifact once the transfer step is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupPolicy {
    /// Delete whether or not the upload succeeded.
    #[default]
    Always,
    /// Leave the artifact on disk when the upload failed.
    KeepOnTransferFailure,
}

impl fmt::Display for CleanupPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanupPolicy::Always => write!(f, "always"),
            CleanupPolicy::KeepOnTransferFailure => write!(f, "keep_on_transfer_failure"),
        }
    }
}

/// Lifecycle of a runner between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    /// Waiting for the next tick or for the serialization lock.
    Idle,
    /// Holding the lock: executing, transferring, cleaning up.
    Running,
    /// The runner task has exited after shutdown.
    Stopped,
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerState::Idle => write!(f, "idle"),
            RunnerState::Running => write!(f, "running"),
            RunnerState::Stopped => write!(f, "stopped"),
        }
    }
}

pub(crate) fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.collect_str(&humantime::format_duration(*duration))
}
