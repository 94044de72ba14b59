use workerwire_worker::serve;

use crate::cmd::WorkerArgs;
use crate::entries;
use crate::exit::{worker_error, CliResult, SUCCESS};

pub fn run(_args: WorkerArgs) -> CliResult<i32> {
    let registry = entries::registry();
    tracing::debug!(pid = std::process::id(), "worker mode");
    serve(&registry).map_err(|err| worker_error("worker failed", err))?;
    Ok(SUCCESS)
}
