use std::fmt;
use std::sync::Arc;

use workerwire_frame::{ProtocolError, Value};

use crate::state::Transition;
use crate::supervisor::Worker;

/// Receives every non-error value a worker emits, in arrival order.
pub type Filter = Arc<dyn Fn(&Worker, Value) + Send + Sync>;

/// Receives every state transition of a worker, in order.
pub type Sentinel = Arc<dyn Fn(&Worker, &Transition) + Send + Sync>;

/// Receives malformed output, overflow, and error events from a worker.
pub type ProtocolErrorHook = Arc<dyn Fn(&Worker, &ProtocolError) + Send + Sync>;

/// Callbacks attached to one worker.
///
/// All callbacks for a worker run on that worker's monitor thread, one at a
/// time. They may call back into the [`Worker`] handle.
#[derive(Clone, Default)]
pub struct WorkerHandlers {
    filter: Option<Filter>,
    sentinel: Option<Sentinel>,
    on_protocol_error: Option<ProtocolErrorHook>,
}

impl WorkerHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Worker, Value) + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn with_sentinel<F>(mut self, sentinel: F) -> Self
    where
        F: Fn(&Worker, &Transition) + Send + Sync + 'static,
    {
        self.sentinel = Some(Arc::new(sentinel));
        self
    }

    pub fn with_protocol_error_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Worker, &ProtocolError) + Send + Sync + 'static,
    {
        self.on_protocol_error = Some(Arc::new(hook));
        self
    }

    pub fn filter(&self) -> Option<Filter> {
        self.filter.clone()
    }

    pub fn sentinel(&self) -> Option<Sentinel> {
        self.sentinel.clone()
    }

    pub fn protocol_error_hook(&self) -> Option<ProtocolErrorHook> {
        self.on_protocol_error.clone()
    }

    pub(crate) fn set_filter(&mut self, filter: Option<Filter>) {
        self.filter = filter;
    }

    pub(crate) fn set_sentinel(&mut self, sentinel: Option<Sentinel>) {
        self.sentinel = sentinel;
    }
}

impl fmt::Debug for WorkerHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandlers")
            .field("filter", &self.filter.is_some())
            .field("sentinel", &self.sentinel.is_some())
            .field("on_protocol_error", &self.on_protocol_error.is_some())
            .finish()
    }
}
