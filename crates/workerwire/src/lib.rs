//! Structured messaging between a host process and worker processes.
//!
//! Values travel over the worker's stdin and stdout as quote-delimited base64
//! records, one per line. The host reassembles them from arbitrary output
//! chunks, dispatches them to per-worker callbacks, and tracks the worker's
//! lifecycle.
//!
//! # Crate Structure
//!
//! - [`sexp`] : Value model, printer, and reader
//! - [`frame`] : Value codec, frame writer, and incremental stream parser
//! - [`worker`] : Supervisor, dispatch, and worker-side runtime (behind `worker` feature)

/// Re-export value types.
pub mod sexp {
    pub use workerwire_sexp::*;
}

/// Re-export frame types.
pub mod frame {
    pub use workerwire_frame::*;
}

/// Re-export worker types (requires `worker` feature).
#[cfg(feature = "worker")]
pub mod worker {
    pub use workerwire_worker::*;
}
