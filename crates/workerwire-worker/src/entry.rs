use std::collections::BTreeMap;
use std::fmt;

use workerwire_frame::Value;

use crate::error::{Result, WorkerError};
use crate::runtime::WorkerContext;

/// Head symbol of the host's first frame.
pub const START_TAG: &str = "start";

/// Head symbol of the worker's first frame.
pub const READY_TAG: &str = "ready";

/// The function a worker runs, named by the host.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryPoint {
    pub name: String,
    /// 0 for a plain entry, 1 for an entry that receives a transport.
    pub arity: usize,
    /// Extra values available to the entry through [`WorkerContext::args`].
    pub args: Vec<Value>,
}

impl EntryPoint {
    pub fn new(name: impl Into<String>, arity: usize) -> Self {
        Self {
            name: name.into(),
            arity,
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.arity > 1 {
            return Err(WorkerError::InvalidEntryPoint {
                name: self.name.clone(),
                arity: self.arity,
            });
        }
        Ok(())
    }

    /// `(start NAME ARITY (ARGS...))`
    pub fn to_start_message(&self) -> Value {
        Value::list([
            Value::symbol(START_TAG),
            Value::string(self.name.clone()),
            Value::Int(self.arity as i64),
            Value::List(self.args.clone()),
        ])
    }

    pub fn from_start_message(value: &Value) -> Result<Self> {
        let malformed = || WorkerError::Bootstrap(format!("malformed start message: {value}"));
        let fields = value.tagged(START_TAG).ok_or_else(malformed)?;
        match fields {
            [Value::Str(name), Value::Int(arity), Value::List(args)] => {
                let arity = usize::try_from(*arity).map_err(|_| malformed())?;
                Ok(Self {
                    name: name.clone(),
                    arity,
                    args: args.clone(),
                })
            }
            _ => Err(malformed()),
        }
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.arity)
    }
}

/// Messaging transport handed to one-argument entry points.
pub trait Transport: Send {
    /// Short name of the transport, for logs.
    fn kind(&self) -> &str;

    /// Release the transport. Called once when the entry point returns.
    fn close(&mut self) -> anyhow::Result<()>;
}

/// A transport that carries nothing. The default for registries without a factory.
#[derive(Debug, Default)]
pub struct NullTransport {
    closed: bool,
}

impl NullTransport {
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Transport for NullTransport {
    fn kind(&self) -> &str {
        "null"
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Closes its transport when dropped, unless [`close`](Self::close) already did.
///
/// Dropping covers entry points that fail or panic; close errors on that
/// path are logged.
pub struct TransportGuard {
    transport: Box<dyn Transport>,
    closed: bool,
}

impl TransportGuard {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            closed: false,
        }
    }

    pub fn transport(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }

    /// Close now and report the result.
    pub fn close(mut self) -> anyhow::Result<()> {
        self.closed = true;
        self.transport.close()
    }
}

impl Drop for TransportGuard {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(err) = self.transport.close() {
            tracing::warn!(kind = self.transport.kind(), error = %err, "transport close failed");
        }
    }
}

type PlainFn = dyn Fn(&mut WorkerContext) -> anyhow::Result<()> + Send + Sync;
type TransportFn = dyn Fn(&mut WorkerContext, &mut dyn Transport) -> anyhow::Result<()> + Send + Sync;

/// Creates the transport for each one-argument entry point run.
pub type TransportFactory = Box<dyn Fn() -> anyhow::Result<Box<dyn Transport>> + Send + Sync>;

/// A registered entry point body.
pub enum EntryFn {
    Plain(Box<PlainFn>),
    WithTransport(Box<TransportFn>),
}

impl EntryFn {
    pub fn arity(&self) -> usize {
        match self {
            EntryFn::Plain(_) => 0,
            EntryFn::WithTransport(_) => 1,
        }
    }
}

/// Entry points a worker binary can run, by name.
pub struct EntryRegistry {
    entries: BTreeMap<String, EntryFn>,
    transport_factory: TransportFactory,
}

impl Default for EntryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EntryRegistry {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            transport_factory: Box::new(|| Ok(Box::new(NullTransport::default()))),
        }
    }

    pub fn with_transport_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> anyhow::Result<Box<dyn Transport>> + Send + Sync + 'static,
    {
        self.transport_factory = Box::new(factory);
        self
    }

    pub fn register<F>(mut self, name: impl Into<String>, entry: F) -> Self
    where
        F: Fn(&mut WorkerContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.entries.insert(name.into(), EntryFn::Plain(Box::new(entry)));
        self
    }

    pub fn register_with_transport<F>(mut self, name: impl Into<String>, entry: F) -> Self
    where
        F: Fn(&mut WorkerContext, &mut dyn Transport) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.entries
            .insert(name.into(), EntryFn::WithTransport(Box::new(entry)));
        self
    }

    pub fn get(&self, name: &str) -> Option<&EntryFn> {
        self.entries.get(name)
    }

    /// Registered names with their arity, in name order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, usize)> {
        self.entries
            .iter()
            .map(|(name, entry)| (name.as_str(), entry.arity()))
    }

    pub(crate) fn open_transport(&self) -> anyhow::Result<Box<dyn Transport>> {
        (self.transport_factory)()
    }
}
