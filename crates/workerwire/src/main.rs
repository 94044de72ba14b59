mod cmd;
mod entries;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(
    name = "workerwire",
    version,
    about = "Run and talk to worker processes over framed stdio"
)]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        default_value = "info",
        env = "WORKERWIRE_LOG_LEVEL",
        global = true
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_subcommand() {
        let cli = Cli::try_parse_from([
            "workerwire",
            "run",
            "echo",
            "--send",
            "(1 2 3)",
            "--send",
            "\"two\"",
            "--timeout",
            "3s",
        ])
        .expect("run args should parse");

        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.entry, "echo");
                assert_eq!(args.send, vec!["(1 2 3)", "\"two\""]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn rejects_conflicting_encode_inputs() {
        let err = Cli::try_parse_from(["workerwire", "encode", "(a b)", "--json", "[1]"])
            .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn worker_subcommand_is_hidden_but_parses() {
        let cli = Cli::try_parse_from(["workerwire", "worker"]).expect("worker should parse");
        assert!(matches!(cli.command, Command::Worker(_)));
    }

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "workerwire",
            "decode",
            "--format",
            "raw",
            "--log-level",
            "debug",
        ])
        .expect("decode args should parse");
        assert!(matches!(cli.format, Some(OutputFormat::Raw)));
        assert!(matches!(cli.log_level, LogLevel::Debug));
    }
}
