use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use workerwire_worker::{
    CommandSpawner, EntryPoint, Supervisor, SupervisorConfig, Worker, WorkerError,
    WorkerHandlers, WorkerState,
};

use crate::cmd::{parse_duration, parse_json, parse_value, RunArgs};
use crate::exit::{
    io_error, state_code, worker_error, CliError, CliResult, DATA_INVALID, INTERNAL, SUCCESS,
    TIMEOUT,
};
use crate::output::{print_event, Event, OutputFormat};

const WAIT_SLICE: Duration = Duration::from_millis(100);

pub fn run(args: RunArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let entry_args = args
        .args
        .iter()
        .map(|arg| parse_value(arg))
        .collect::<CliResult<Vec<_>>>()?;
    let mut outgoing = args
        .send
        .iter()
        .map(|value| parse_value(value))
        .collect::<CliResult<Vec<_>>>()?;
    for json in &args.json {
        outgoing.push(parse_json(json)?);
    }

    let spawner = match &args.program {
        Some(program) => CommandSpawner::new(program).args(&args.program_args),
        None => {
            let exe = std::env::current_exe()
                .map_err(|err| io_error("cannot locate own executable", err))?;
            CommandSpawner::new(exe).arg("worker")
        }
    };

    let protocol_errors = Arc::new(AtomicUsize::new(0));
    let errors = Arc::clone(&protocol_errors);
    let handlers = WorkerHandlers::new()
        .with_filter(move |worker, value| {
            print_event(&Event::value(Some(worker.id()), &value), format);
        })
        .with_sentinel(move |worker, transition| {
            print_event(
                &Event::Transition {
                    worker: worker.id(),
                    from: &transition.from,
                    to: &transition.to,
                },
                format,
            );
        })
        .with_protocol_error_hook(move |worker, err| {
            errors.fetch_add(1, Ordering::SeqCst);
            print_event(
                &Event::ProtocolError {
                    worker: Some(worker.id()),
                    error: err.to_string(),
                },
                format,
            );
        });

    let supervisor = Supervisor::new(SupervisorConfig::new(spawner));
    let entry = EntryPoint::new(args.entry, args.arity).with_args(entry_args);
    let worker = supervisor
        .spawn(entry, handlers, None)
        .map_err(|err| worker_error("spawn failed", err))?;

    let interrupted = Arc::new(AtomicBool::new(false));
    install_ctrlc_handler(Arc::clone(&interrupted))?;
    let deadline = Instant::now() + timeout;

    match worker.wait_until_running(timeout) {
        Ok(WorkerState::Running) => {
            for value in &outgoing {
                if let Err(err) = worker.send(value) {
                    tracing::warn!(worker = worker.id(), error = %err, "stopped sending");
                    break;
                }
            }
        }
        Ok(state) => tracing::debug!(worker = worker.id(), state = %state, "worker ended before running"),
        Err(err) => {
            abandon(&worker);
            return Err(worker_error("worker did not start", err));
        }
    }
    if !args.keep_input {
        worker.close_input();
    }

    let state = wait_for_exit(&worker, deadline, &interrupted)?;
    let code = state_code(&state);
    if code == SUCCESS && protocol_errors.load(Ordering::SeqCst) > 0 {
        return Ok(DATA_INVALID);
    }
    Ok(code)
}

fn wait_for_exit(worker: &Worker, deadline: Instant, interrupted: &AtomicBool) -> CliResult<WorkerState> {
    loop {
        if interrupted.load(Ordering::SeqCst) {
            tracing::info!(worker = worker.id(), "interrupted, deleting worker");
            abandon(worker);
            return worker
                .wait(Some(WAIT_SLICE * 50))
                .map_err(|err| worker_error("worker did not stop", err));
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            abandon(worker);
            let _ = worker.wait(Some(WAIT_SLICE * 50));
            return Err(CliError::new(TIMEOUT, "worker did not finish in time"));
        }

        match worker.wait(Some(remaining.min(WAIT_SLICE))) {
            Ok(state) => return Ok(state),
            Err(WorkerError::Timeout(_)) => continue,
            Err(err) => return Err(worker_error("wait failed", err)),
        }
    }
}

fn abandon(worker: &Worker) {
    if let Err(err) = worker.delete() {
        tracing::warn!(worker = worker.id(), error = %err, "could not delete worker");
    }
}

fn install_ctrlc_handler(interrupted: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        interrupted.store(true, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
