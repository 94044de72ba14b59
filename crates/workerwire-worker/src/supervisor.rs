use std::ffi::OsString;
use std::fmt;
use std::io::{ErrorKind, Read};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use workerwire_frame::{
    EncodeError, FrameConfig, FrameWriter, ProtocolError, ReceiveBuffer, SharedBuffer, Value,
};

use crate::dispatch::dispatch;
use crate::entry::{EntryPoint, READY_TAG};
use crate::error::{Result, WorkerError};
use crate::handlers::WorkerHandlers;
use crate::state::{Transition, WorkerState};

const DEFAULT_READ_CHUNK_SIZE: usize = 64 * 1024;
const REAP_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// How long output already in flight is still parsed after the process exited.
const EXIT_DRAIN_GRACE: Duration = Duration::from_millis(200);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Starts worker processes with piped stdin and stdout.
pub trait WorkerSpawner: Send + Sync {
    fn spawn(&self, entry: &EntryPoint) -> std::io::Result<Child>;
}

/// Spawns a fixed command for every worker. Stderr is inherited.
#[derive(Debug, Clone)]
pub struct CommandSpawner {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
}

impl CommandSpawner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

impl WorkerSpawner for CommandSpawner {
    fn spawn(&self, entry: &EntryPoint) -> std::io::Result<Child> {
        tracing::debug!(program = %self.program.display(), entry = %entry, "spawning worker");
        Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
    }
}

/// Supervisor configuration.
#[derive(Clone)]
pub struct SupervisorConfig {
    pub spawner: Arc<dyn WorkerSpawner>,
    /// Bytes requested per read from a worker's stdout.
    pub read_chunk_size: usize,
    /// Limits for buffers the supervisor creates itself.
    pub frame: FrameConfig,
}

impl SupervisorConfig {
    pub fn new(spawner: impl WorkerSpawner + 'static) -> Self {
        Self {
            spawner: Arc::new(spawner),
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            frame: FrameConfig::default(),
        }
    }

    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size.max(1);
        self
    }

    pub fn with_frame_config(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }
}

impl fmt::Debug for SupervisorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupervisorConfig")
            .field("read_chunk_size", &self.read_chunk_size)
            .field("frame", &self.frame)
            .finish_non_exhaustive()
    }
}

/// Spawns workers and runs one monitor thread per worker.
#[derive(Debug)]
pub struct Supervisor {
    config: SupervisorConfig,
    next_id: AtomicU64,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Start a worker running `entry`.
    ///
    /// With `buffer: None` the worker gets a private receive buffer that is
    /// released when it reaches a terminal state. A caller-supplied buffer
    /// stays with the caller and is never released.
    pub fn spawn(
        &self,
        entry: EntryPoint,
        handlers: WorkerHandlers,
        buffer: Option<SharedBuffer>,
    ) -> Result<Worker> {
        entry.validate()?;

        let mut child = self.config.spawner.spawn(&entry).map_err(WorkerError::Spawn)?;
        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                reap_quietly(&mut child);
                return Err(WorkerError::Spawn(std::io::Error::other(
                    "worker stdin/stdout not piped",
                )));
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let pid = child.id();
        let slot = match buffer {
            Some(shared) => BufferSlot::Borrowed(shared),
            None => BufferSlot::Owned(Some(SharedBuffer::new(ReceiveBuffer::with_config(
                self.config.frame.clone(),
            )))),
        };

        let worker = Worker {
            inner: Arc::new(WorkerInner {
                id,
                pid,
                entry,
                status: Mutex::new(Status {
                    state: WorkerState::Spawned,
                    settled: false,
                }),
                status_changed: Condvar::new(),
                writer: Mutex::new(Some(FrameWriter::new(stdin))),
                child: Mutex::new(child),
                handlers: Mutex::new(handlers),
                buffer: Mutex::new(slot),
                delete_requested: AtomicBool::new(false),
            }),
        };
        tracing::debug!(worker = id, pid, entry = %worker.inner.entry, "worker spawned");

        if let Err(err) = worker.write(&worker.inner.entry.to_start_message()) {
            // The monitor reports the exit.
            tracing::warn!(worker = id, error = %err, "could not send start message");
        }

        let (tx, rx) = mpsc::channel();
        let chunk_size = self.config.read_chunk_size;
        let reader = thread::Builder::new()
            .name(format!("workerwire-reader-{id}"))
            .spawn(move || read_output(id, stdout, chunk_size, tx));
        if let Err(err) = reader {
            reap_quietly(&mut lock(&worker.inner.child));
            return Err(WorkerError::Spawn(err));
        }

        let monitored = worker.clone();
        let monitor = thread::Builder::new()
            .name(format!("workerwire-monitor-{id}"))
            .spawn(move || monitored.monitor(rx));
        if let Err(err) = monitor {
            reap_quietly(&mut lock(&worker.inner.child));
            return Err(WorkerError::Spawn(err));
        }

        Ok(worker)
    }
}

/// What the reader thread saw on a worker's stdout.
enum Output {
    Chunk(Vec<u8>),
    Closed,
    Failed(std::io::Error),
}

/// Pump stdout into the monitor. Outlives the worker process while a
/// grandchild still holds the pipe open.
fn read_output(id: u64, mut stdout: ChildStdout, chunk_size: usize, tx: Sender<Output>) {
    let mut chunk = vec![0u8; chunk_size];
    loop {
        let event = match stdout.read(&mut chunk) {
            Ok(0) => Output::Closed,
            Ok(n) => {
                tracing::trace!(worker = id, bytes = n, "worker output");
                Output::Chunk(chunk[..n].to_vec())
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => Output::Failed(err),
        };
        let last = !matches!(event, Output::Chunk(_));
        if tx.send(event).is_err() || last {
            break;
        }
    }
}

fn reap_quietly(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[derive(Debug)]
enum BufferSlot {
    /// Released (set to `None`) at the terminal transition.
    Owned(Option<SharedBuffer>),
    Borrowed(SharedBuffer),
}

impl BufferSlot {
    fn current(&self) -> Option<SharedBuffer> {
        match self {
            BufferSlot::Owned(buffer) => buffer.clone(),
            BufferSlot::Borrowed(buffer) => Some(buffer.clone()),
        }
    }
}

struct Status {
    state: WorkerState,
    /// Set once the terminal transition has run its sentinel and cleanup.
    settled: bool,
}

struct WorkerInner {
    id: u64,
    pid: u32,
    entry: EntryPoint,
    status: Mutex<Status>,
    status_changed: Condvar,
    writer: Mutex<Option<FrameWriter<ChildStdin>>>,
    child: Mutex<Child>,
    handlers: Mutex<WorkerHandlers>,
    buffer: Mutex<BufferSlot>,
    delete_requested: AtomicBool,
}

/// Handle to a spawned worker. Clones refer to the same worker.
#[derive(Clone)]
pub struct Worker {
    inner: Arc<WorkerInner>,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.inner.id)
            .field("pid", &self.inner.pid)
            .field("entry", &self.inner.entry)
            .field("state", &self.state())
            .finish()
    }
}

/// Summary of a worker, for display.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerInfo {
    pub id: u64,
    pub pid: u32,
    pub entry: String,
    pub state: WorkerState,
    pub owns_buffer: bool,
}

impl Worker {
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn pid(&self) -> u32 {
        self.inner.pid
    }

    pub fn entry(&self) -> &EntryPoint {
        &self.inner.entry
    }

    pub fn state(&self) -> WorkerState {
        lock(&self.inner.status).state.clone()
    }

    pub fn info(&self) -> WorkerInfo {
        WorkerInfo {
            id: self.id(),
            pid: self.pid(),
            entry: self.inner.entry.to_string(),
            state: self.state(),
            owns_buffer: self.owns_buffer(),
        }
    }

    /// Send one value to the worker's stdin. Only legal while running.
    ///
    /// Concurrent senders are serialized, so records never interleave.
    pub fn send(&self, value: &Value) -> Result<()> {
        let state = self.state();
        if state != WorkerState::Running {
            return Err(WorkerError::NotRunning {
                id: self.inner.id,
                state,
            });
        }
        self.write(value)
    }

    pub fn send_serializable<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let value = workerwire_sexp::to_value(value).map_err(EncodeError::from)?;
        self.send(&value)
    }

    fn write(&self, value: &Value) -> Result<()> {
        let mut writer = lock(&self.inner.writer);
        let writer = writer.as_mut().ok_or(WorkerError::InputClosed)?;
        writer.send(value)?;
        Ok(())
    }

    /// Close the worker's stdin. The worker sees end of input.
    pub fn close_input(&self) {
        if lock(&self.inner.writer).take().is_some() {
            tracing::debug!(worker = self.inner.id, "worker input closed");
        }
    }

    /// Kill the worker process (SIGKILL on unix).
    pub fn kill(&self) -> Result<()> {
        if self.state().is_terminal() {
            return Ok(());
        }
        lock(&self.inner.child).kill()?;
        Ok(())
    }

    /// Ask the worker to exit (SIGTERM on unix, the same as [`kill`](Self::kill) elsewhere).
    pub fn terminate(&self) -> Result<()> {
        #[cfg(unix)]
        {
            let mut child = lock(&self.inner.child);
            if self.state().is_terminal() || child.try_wait()?.is_some() {
                return Ok(());
            }
            let pid = libc::pid_t::try_from(child.id())
                .map_err(|_| std::io::Error::other("pid out of range"))?;
            // SAFETY: the child lock is held and try_wait just saw the process
            // unreaped, so the pid still names our child.
            let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
            if rc != 0 {
                return Err(std::io::Error::last_os_error().into());
            }
            Ok(())
        }
        #[cfg(not(unix))]
        {
            self.kill()
        }
    }

    /// Kill the worker and report it as `deleted` rather than `killed`.
    pub fn delete(&self) -> Result<()> {
        self.inner.delete_requested.store(true, Ordering::SeqCst);
        self.close_input();
        self.kill()
    }

    pub fn set_filter<F>(&self, filter: F)
    where
        F: Fn(&Worker, Value) + Send + Sync + 'static,
    {
        lock(&self.inner.handlers).set_filter(Some(Arc::new(filter)));
    }

    pub fn clear_filter(&self) {
        lock(&self.inner.handlers).set_filter(None);
    }

    pub fn set_sentinel<F>(&self, sentinel: F)
    where
        F: Fn(&Worker, &Transition) + Send + Sync + 'static,
    {
        lock(&self.inner.handlers).set_sentinel(Some(Arc::new(sentinel)));
    }

    pub fn clear_sentinel(&self) {
        lock(&self.inner.handlers).set_sentinel(None);
    }

    /// The worker's receive buffer; `None` once an owned buffer is released.
    pub fn buffer(&self) -> Option<SharedBuffer> {
        lock(&self.inner.buffer).current()
    }

    pub fn owns_buffer(&self) -> bool {
        matches!(*lock(&self.inner.buffer), BufferSlot::Owned(_))
    }

    /// Block until the worker leaves `spawned`. Returns the state it reached.
    pub fn wait_until_running(&self, timeout: Duration) -> Result<WorkerState> {
        let status = lock(&self.inner.status);
        let (status, result) = self
            .inner
            .status_changed
            .wait_timeout_while(status, timeout, |status| {
                status.state == WorkerState::Spawned
            })
            .unwrap_or_else(PoisonError::into_inner);
        if result.timed_out() && status.state == WorkerState::Spawned {
            return Err(WorkerError::Timeout(timeout));
        }
        Ok(status.state.clone())
    }

    /// Block until the worker reached a terminal state and its cleanup ran.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<WorkerState> {
        let status = lock(&self.inner.status);
        match timeout {
            Some(timeout) => {
                let (status, result) = self
                    .inner
                    .status_changed
                    .wait_timeout_while(status, timeout, |status| !status.settled)
                    .unwrap_or_else(PoisonError::into_inner);
                if result.timed_out() && !status.settled {
                    return Err(WorkerError::Timeout(timeout));
                }
                Ok(status.state.clone())
            }
            None => {
                let status = self
                    .inner
                    .status_changed
                    .wait_while(status, |status| !status.settled)
                    .unwrap_or_else(PoisonError::into_inner);
                Ok(status.state.clone())
            }
        }
    }

    fn monitor(self, output: Receiver<Output>) {
        let id = self.inner.id;
        tracing::debug!(worker = id, "monitor started");
        let mut open = true;
        let terminal = loop {
            let event = if open {
                output.recv_timeout(REAP_POLL_INTERVAL)
            } else {
                thread::sleep(REAP_POLL_INTERVAL);
                Err(RecvTimeoutError::Timeout)
            };
            match event {
                Ok(Output::Chunk(bytes)) => self.on_output(&bytes),
                Ok(Output::Closed) | Err(RecvTimeoutError::Disconnected) => open = false,
                Ok(Output::Failed(err)) => {
                    tracing::error!(worker = id, error = %err, "lost worker output");
                    reap_quietly(&mut lock(&self.inner.child));
                    break WorkerState::Failed(err.to_string());
                }
                Err(RecvTimeoutError::Timeout) => {}
            }

            match self.poll_exit() {
                Ok(Some(state)) => {
                    if open {
                        self.drain_after_exit(&output);
                    }
                    break state;
                }
                Ok(None) => {}
                Err(err) => break WorkerState::Failed(format!("could not reap worker: {err}")),
            }
        };
        self.transition(terminal);
        tracing::debug!(worker = id, "monitor finished");
    }

    fn poll_exit(&self) -> std::io::Result<Option<WorkerState>> {
        let polled = lock(&self.inner.child).try_wait()?;
        Ok(polled.map(|status| {
            let deleted = self.inner.delete_requested.load(Ordering::SeqCst);
            WorkerState::from_exit(status, deleted)
        }))
    }

    /// Parse output written before the exit. Stops at end of output or once
    /// the grace period is over, whichever comes first.
    fn drain_after_exit(&self, output: &Receiver<Output>) {
        let deadline = Instant::now() + EXIT_DRAIN_GRACE;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match output.recv_timeout(remaining) {
                Ok(Output::Chunk(bytes)) => self.on_output(&bytes),
                Ok(Output::Closed | Output::Failed(_)) | Err(RecvTimeoutError::Disconnected) => {
                    return
                }
                Err(RecvTimeoutError::Timeout) => {
                    tracing::debug!(
                        worker = self.inner.id,
                        "worker exited with its output still open"
                    );
                    return;
                }
            }
        }
    }

    fn on_output(&self, chunk: &[u8]) {
        let mut input = chunk;
        loop {
            let Some(buffer) = self.buffer() else {
                return;
            };
            let result = buffer.feed(input);
            input = &[];
            match result {
                Ok(values) if values.is_empty() => return,
                Ok(values) => {
                    if let Err(err) = dispatch(values, |value| self.deliver(value)) {
                        self.report_protocol_error(err);
                    }
                }
                Err(err) => self.report_protocol_error(err),
            }
        }
    }

    fn deliver(&self, value: Value) {
        if self.state() == WorkerState::Spawned {
            if let Some(fields) = value.tagged(READY_TAG) {
                tracing::debug!(
                    worker = self.inner.id,
                    reported_pid = ?fields.first().and_then(|pid| pid.as_int()),
                    "worker ready"
                );
                self.transition(WorkerState::Running);
                return;
            }
        }

        let filter = lock(&self.inner.handlers).filter();
        if let Some(filter) = filter {
            self.guarded("filter", || filter(self, value));
        }
    }

    fn report_protocol_error(&self, err: ProtocolError) {
        tracing::error!(worker = self.inner.id, error = %err, "protocol error from worker");
        let hook = lock(&self.inner.handlers).protocol_error_hook();
        if let Some(hook) = hook {
            self.guarded("protocol error hook", || hook(self, &err));
        }
    }

    /// Apply a state change. Terminal states are final, so the first terminal
    /// transition is the only one.
    fn transition(&self, to: WorkerState) {
        let from = {
            let mut status = lock(&self.inner.status);
            if status.state.is_terminal() {
                return;
            }
            std::mem::replace(&mut status.state, to.clone())
        };
        tracing::debug!(worker = self.inner.id, from = %from, to = %to, "worker state changed");

        let transition = Transition {
            from,
            to: to.clone(),
        };
        let sentinel = lock(&self.inner.handlers).sentinel();
        if let Some(sentinel) = sentinel {
            self.guarded("sentinel", || sentinel(self, &transition));
        }

        if to.is_terminal() {
            if let BufferSlot::Owned(buffer) = &mut *lock(&self.inner.buffer) {
                if buffer.take().is_some() {
                    tracing::debug!(worker = self.inner.id, "released worker buffer");
                }
            }
            self.close_input();
            lock(&self.inner.status).settled = true;
        }
        self.inner.status_changed.notify_all();
    }

    /// Run a callback, keeping the monitor alive if it panics.
    fn guarded(&self, what: &str, callback: impl FnOnce()) {
        if catch_unwind(AssertUnwindSafe(callback)).is_err() {
            tracing::error!(worker = self.inner.id, callback = what, "worker callback panicked");
        }
    }
}
