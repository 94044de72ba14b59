use std::fmt::Display;
use std::io::{BufRead, BufReader, Write};

use serde::Serialize;
use workerwire_frame::{read_value, FrameError, FrameWriter, Value};

use crate::dispatch::ERROR_TAG;
use crate::entry::{EntryFn, EntryPoint, EntryRegistry, TransportGuard, READY_TAG};
use crate::error::{Result, WorkerError};

/// The worker end of the connection, handed to a running entry point.
pub struct WorkerContext {
    entry: EntryPoint,
    reader: Box<dyn BufRead + Send>,
    writer: FrameWriter<Box<dyn Write + Send>>,
}

impl WorkerContext {
    fn new(
        entry: EntryPoint,
        reader: Box<dyn BufRead + Send>,
        writer: FrameWriter<Box<dyn Write + Send>>,
    ) -> Self {
        Self {
            entry,
            reader,
            writer,
        }
    }

    pub fn entry(&self) -> &EntryPoint {
        &self.entry
    }

    /// Values the host passed in the start message.
    pub fn args(&self) -> &[Value] {
        &self.entry.args
    }

    /// Block until the host sends the next value.
    ///
    /// Returns [`FrameError::ConnectionClosed`] once the host closes input.
    pub fn recv(&mut self) -> workerwire_frame::Result<Value> {
        read_value(&mut self.reader)
    }

    /// Like [`recv`](Self::recv), but end of input is `Ok(None)`.
    pub fn try_recv(&mut self) -> workerwire_frame::Result<Option<Value>> {
        match self.recv() {
            Ok(value) => Ok(Some(value)),
            Err(FrameError::ConnectionClosed) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn send(&mut self, value: &Value) -> workerwire_frame::Result<()> {
        self.writer.send(value)
    }

    pub fn send_serializable<T: Serialize + ?Sized>(
        &mut self,
        value: &T,
    ) -> workerwire_frame::Result<()> {
        self.writer.send_serializable(value)
    }

    /// Send `(error MESSAGE)`.
    pub fn send_error(&mut self, message: impl Display) -> workerwire_frame::Result<()> {
        let event = Value::list([Value::symbol(ERROR_TAG), Value::string(message.to_string())]);
        self.writer.send(&event)
    }
}

/// Run the worker side on this process's stdin and stdout.
///
/// Nothing else may write to stdout while this runs.
pub fn serve(registry: &EntryRegistry) -> Result<()> {
    serve_with(
        registry,
        Box::new(BufReader::new(std::io::stdin())),
        Box::new(std::io::stdout()),
    )
}

/// Run the worker side on the given streams.
///
/// Reads the start message, answers `(ready PID)`, and runs the named entry
/// point. Bootstrap problems and entry failures are also sent to the host
/// as an error event before being returned.
pub fn serve_with(
    registry: &EntryRegistry,
    mut reader: Box<dyn BufRead + Send>,
    writer: Box<dyn Write + Send>,
) -> Result<()> {
    let mut writer = FrameWriter::new(writer);

    let start = match read_value(&mut reader) {
        Ok(start) => start,
        Err(FrameError::ConnectionClosed) => {
            return Err(WorkerError::Bootstrap(
                "input closed before start message".to_string(),
            ))
        }
        Err(err) => return Err(err.into()),
    };

    let entry = match bootstrap(registry, &start) {
        Ok(entry) => entry,
        Err(err) => {
            report(&mut writer, &err);
            return Err(err);
        }
    };

    tracing::debug!(entry = %entry, "worker starting entry point");
    writer.send(&Value::list([
        Value::symbol(READY_TAG),
        Value::from(std::process::id()),
    ]))?;

    let name = entry.name.clone();
    let mut ctx = WorkerContext::new(entry, reader, writer);
    let outcome = match registry.get(&name) {
        Some(EntryFn::Plain(run)) => run(&mut ctx),
        Some(EntryFn::WithTransport(run)) => run_with_transport(registry, &mut ctx, run.as_ref()),
        None => Err(anyhow::anyhow!("entry point vanished from registry")),
    };

    match outcome {
        Ok(()) => {
            tracing::debug!(entry = %name, "entry point finished");
            Ok(())
        }
        Err(source) => {
            let err = WorkerError::Entry { name, source };
            report(&mut ctx.writer, &err);
            Err(err)
        }
    }
}

fn bootstrap(registry: &EntryRegistry, start: &Value) -> Result<EntryPoint> {
    let entry = EntryPoint::from_start_message(start)?;
    entry.validate()?;
    let registered = registry
        .get(&entry.name)
        .ok_or_else(|| WorkerError::UnknownEntryPoint(entry.name.clone()))?;
    if registered.arity() != entry.arity {
        return Err(WorkerError::Bootstrap(format!(
            "entry point {:?} takes {} argument(s), host requested {}",
            entry.name,
            registered.arity(),
            entry.arity
        )));
    }
    Ok(entry)
}

type TransportEntry =
    dyn Fn(&mut WorkerContext, &mut dyn crate::entry::Transport) -> anyhow::Result<()> + Send + Sync;

fn run_with_transport(
    registry: &EntryRegistry,
    ctx: &mut WorkerContext,
    run: &TransportEntry,
) -> anyhow::Result<()> {
    let mut guard = TransportGuard::new(registry.open_transport()?);
    tracing::debug!(kind = guard.transport().kind(), "transport opened");
    run(ctx, guard.transport())?;
    guard.close()
}

fn report<W: Write>(writer: &mut FrameWriter<W>, err: &WorkerError) {
    let event = Value::list([Value::symbol(ERROR_TAG), Value::string(err.to_string())]);
    if let Err(send_err) = writer.send(&event) {
        tracing::warn!(error = %send_err, "could not report failure to host");
    }
}
