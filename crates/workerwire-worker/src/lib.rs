//! Worker processes that talk framed values over their standard streams.
//!
//! The host side spawns a worker through a [`Supervisor`], registers a
//! filter for the values it emits and a sentinel for its state changes, and
//! sends values with [`Worker::send`]. The worker side runs [`serve`], which
//! answers the bootstrap handshake and runs a registered entry point.

pub mod dispatch;
pub mod entry;
pub mod error;
pub mod handlers;
pub mod runtime;
pub mod state;
pub mod supervisor;

pub use dispatch::{dispatch, error_payload, ERROR_TAG};
pub use entry::{
    EntryFn, EntryPoint, EntryRegistry, NullTransport, Transport, TransportFactory,
    TransportGuard, READY_TAG, START_TAG,
};
pub use error::{Result, WorkerError};
pub use handlers::{Filter, ProtocolErrorHook, Sentinel, WorkerHandlers};
pub use runtime::{serve, serve_with, WorkerContext};
pub use state::{Transition, WorkerState};
pub use supervisor::{
    CommandSpawner, Supervisor, SupervisorConfig, Worker, WorkerInfo, WorkerSpawner,
};
