use std::fmt;
use std::io;

use workerwire_frame::{FrameError, ProtocolError};
use workerwire_worker::{WorkerError, WorkerState};

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
/// The worker's output stream broke.
pub const TRANSPORT_ERROR: i32 = 3;
/// The worker was killed or deleted.
pub const WORKER_KILLED: i32 = 4;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound => USAGE,
        io::ErrorKind::BrokenPipe => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::Encode(_) | FrameError::Decode(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::ConnectionClosed => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
    }
}

pub fn protocol_error(context: &str, err: &ProtocolError) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {err}"))
}

pub fn worker_error(context: &str, err: WorkerError) -> CliError {
    match err {
        WorkerError::Frame(err) => frame_error(context, err),
        WorkerError::Spawn(source) | WorkerError::Io(source) => io_error(context, source),
        WorkerError::InvalidEntryPoint { .. } | WorkerError::UnknownEntryPoint(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        WorkerError::Encode(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        WorkerError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        WorkerError::NotRunning { .. } | WorkerError::InputClosed => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}

/// Exit code for a worker's final state.
pub fn state_code(state: &WorkerState) -> i32 {
    match state {
        WorkerState::Finished => SUCCESS,
        WorkerState::Exited(_) => FAILURE,
        WorkerState::Failed(_) => TRANSPORT_ERROR,
        WorkerState::Killed(_) | WorkerState::Deleted => WORKER_KILLED,
        WorkerState::Spawned | WorkerState::Running => INTERNAL,
    }
}
