use std::time::Duration;

use workerwire_frame::{EncodeError, FrameError};

use crate::state::WorkerState;

/// Errors that can occur in worker operations.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The operation needs a running worker.
    #[error("worker {id} is not running (state: {state})")]
    NotRunning { id: u64, state: WorkerState },

    /// Entry points take zero arguments or a single transport.
    #[error("invalid entry point {name:?}: arity {arity} (expected 0 or 1)")]
    InvalidEntryPoint { name: String, arity: usize },

    /// No entry point with this name is registered in the worker.
    #[error("unknown entry point {0:?}")]
    UnknownEntryPoint(String),

    /// The worker's input was closed by the host.
    #[error("worker input is closed")]
    InputClosed,

    /// The worker process could not be started.
    #[error("failed to spawn worker: {0}")]
    Spawn(#[source] std::io::Error),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// A value could not be encoded.
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// The bootstrap exchange did not follow the protocol.
    #[error("bootstrap failed: {0}")]
    Bootstrap(String),

    /// The entry point returned an error.
    #[error("entry point {name:?} failed: {source:#}")]
    Entry {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// A wait helper gave up.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Signal delivery or process control failed.
    #[error("process control error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
