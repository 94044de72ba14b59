use std::fmt;
use std::process::ExitStatus;

use serde::Serialize;

/// Lifecycle of a worker process.
///
/// `Spawned` moves to `Running` when the worker completes the bootstrap
/// handshake. Every other state is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "detail")]
pub enum WorkerState {
    Spawned,
    Running,
    /// Exited with a non-zero code.
    Exited(i32),
    /// The host lost the worker's output stream.
    Failed(String),
    /// Exited with code 0.
    Finished,
    /// Terminated by a signal.
    Killed(i32),
    /// Terminated at the host's request through [`Worker::delete`](crate::Worker::delete).
    Deleted,
}

impl WorkerState {
    pub fn label(&self) -> &'static str {
        match self {
            WorkerState::Spawned => "spawned",
            WorkerState::Running => "running",
            WorkerState::Exited(_) => "exited",
            WorkerState::Failed(_) => "failed",
            WorkerState::Finished => "finished",
            WorkerState::Killed(_) => "killed",
            WorkerState::Deleted => "deleted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkerState::Spawned | WorkerState::Running)
    }

    /// Map a reaped exit status to a terminal state.
    pub(crate) fn from_exit(status: ExitStatus, delete_requested: bool) -> Self {
        if let Some(code) = status.code() {
            return if code == 0 {
                WorkerState::Finished
            } else {
                WorkerState::Exited(code)
            };
        }
        if delete_requested {
            return WorkerState::Deleted;
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return WorkerState::Killed(signal);
            }
        }
        WorkerState::Failed(format!("unrecognised exit status: {status}"))
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerState::Exited(code) => write!(f, "exited (code {code})"),
            WorkerState::Failed(reason) => write!(f, "failed: {reason}"),
            WorkerState::Killed(signal) => write!(f, "killed (signal {signal})"),
            other => f.write_str(other.label()),
        }
    }
}

/// One state change, as reported to the sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: WorkerState,
    pub to: WorkerState,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}
