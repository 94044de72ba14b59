use std::io::{ErrorKind, Read};

use workerwire_frame::{FrameConfig, ProtocolError, ReceiveBuffer};

use crate::cmd::DecodeArgs;
use crate::exit::{io_error, protocol_error, CliResult, SUCCESS};
use crate::output::{print_event, Event, OutputFormat};

const CHUNK_SIZE: usize = 8 * 1024;

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let mut config = FrameConfig::default();
    if let Some(max_pending) = args.max_pending {
        config.max_pending = max_pending;
    }
    let mut buffer = ReceiveBuffer::with_config(config);
    let mut first_error: Option<ProtocolError> = None;
    let mut error_count = 0usize;

    let mut stdin = std::io::stdin().lock();
    let mut chunk = vec![0u8; CHUNK_SIZE];
    loop {
        let n = match stdin.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(io_error("failed reading stdin", err)),
        };

        let mut input = &chunk[..n];
        loop {
            match buffer.feed(input) {
                Ok(values) if values.is_empty() => break,
                Ok(values) => {
                    for value in &values {
                        print_event(&Event::value(None, value), format);
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, "skipping malformed input");
                    print_event(
                        &Event::ProtocolError {
                            worker: None,
                            error: err.to_string(),
                        },
                        format,
                    );
                    error_count += 1;
                    first_error.get_or_insert(err);
                }
            }
            input = &[];
        }
    }

    if !buffer.is_empty() && buffer.pending().iter().any(|b| !b.is_ascii_whitespace()) {
        tracing::warn!(bytes = buffer.len(), "input ended inside an incomplete record");
    }

    match first_error {
        Some(err) => {
            let context = format!("{error_count} malformed token(s) skipped, first");
            Err(protocol_error(&context, &err))
        }
        None => Ok(SUCCESS),
    }
}
