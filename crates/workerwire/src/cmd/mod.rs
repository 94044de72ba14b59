use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use workerwire_frame::Value;
use workerwire_sexp::{from_json, read_str};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod decode;
pub mod encode;
pub mod run;
pub mod version;
pub mod worker;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Spawn a worker, send it values, and print everything it emits.
    Run(RunArgs),
    /// Serve the worker side of the protocol on stdin/stdout.
    #[command(hide = true)]
    Worker(WorkerArgs),
    /// Print the frame record for a value.
    Encode(EncodeArgs),
    /// Read frame records from stdin and print the values.
    Decode(DecodeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Run(args) => run::run(args, format),
        Command::Worker(args) => worker::run(args),
        Command::Encode(args) => encode::run(args, format),
        Command::Decode(args) => decode::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Entry point to run in the worker.
    pub entry: String,
    /// Entry point arity: 0, or 1 to hand the entry a transport.
    #[arg(long, default_value_t = 0)]
    pub arity: usize,
    /// Argument for the entry point, in value syntax. Repeatable.
    #[arg(long = "arg", value_name = "VALUE", allow_hyphen_values = true)]
    pub args: Vec<String>,
    /// Value to send once the worker is running, in value syntax. Repeatable.
    #[arg(long, value_name = "VALUE", allow_hyphen_values = true)]
    pub send: Vec<String>,
    /// JSON document to send after the --send values. Repeatable.
    #[arg(long, value_name = "JSON")]
    pub json: Vec<String>,
    /// Give up and delete the worker after this long (e.g. 10s, 500ms).
    #[arg(long, default_value = "10s")]
    pub timeout: String,
    /// Worker program. Default: this binary in worker mode.
    #[arg(long, value_name = "PATH")]
    pub program: Option<PathBuf>,
    /// Argument for --program. Repeatable.
    #[arg(
        long = "program-arg",
        value_name = "ARG",
        requires = "program",
        allow_hyphen_values = true
    )]
    pub program_args: Vec<String>,
    /// Leave the worker's input open after sending.
    #[arg(long)]
    pub keep_input: bool,
}

#[derive(Args, Debug, Default)]
pub struct WorkerArgs {}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// Value in printed syntax.
    #[arg(required_unless_present = "json", conflicts_with = "json")]
    pub value: Option<String>,
    /// Encode a JSON document instead.
    #[arg(long, value_name = "JSON")]
    pub json: Option<String>,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Discard buffered input that grows past this many bytes without completing.
    #[arg(long, value_name = "BYTES")]
    pub max_pending: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn parse_value(input: &str) -> CliResult<Value> {
    read_str(input).map_err(|err| CliError::new(USAGE, format!("invalid value {input:?}: {err}")))
}

pub(crate) fn parse_json(input: &str) -> CliResult<Value> {
    serde_json::from_str::<serde_json::Value>(input)
        .map(from_json)
        .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
