use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use workerwire_frame::Value;
use workerwire_worker::WorkerState;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// Something observed on a worker's output or lifecycle.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event<'a> {
    Value {
        #[serde(skip_serializing_if = "Option::is_none")]
        worker: Option<u64>,
        printed: String,
        value: serde_json::Value,
    },
    Transition {
        worker: u64,
        from: &'a WorkerState,
        to: &'a WorkerState,
    },
    ProtocolError {
        #[serde(skip_serializing_if = "Option::is_none")]
        worker: Option<u64>,
        error: String,
    },
}

impl Event<'_> {
    pub fn value(worker: Option<u64>, value: &Value) -> Self {
        Event::Value {
            worker,
            printed: value.to_string(),
            value: value.to_json(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Event::Value { .. } => "value",
            Event::Transition { .. } => "transition",
            Event::ProtocolError { .. } => "protocol_error",
        }
    }

    fn worker(&self) -> String {
        let id = match self {
            Event::Value { worker, .. } | Event::ProtocolError { worker, .. } => *worker,
            Event::Transition { worker, .. } => Some(*worker),
        };
        id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string())
    }

    fn detail(&self) -> String {
        match self {
            Event::Value { printed, .. } => printed.clone(),
            Event::Transition { from, to, .. } => format!("{from} -> {to}"),
            Event::ProtocolError { error, .. } => error.clone(),
        }
    }
}

#[derive(Serialize)]
struct TimedEvent<'a> {
    #[serde(flatten)]
    event: &'a Event<'a>,
    timestamp: String,
}

pub fn print_event(event: &Event<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = TimedEvent {
                event,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["EVENT", "WORKER", "DETAIL"])
                .add_row(vec![event.kind().to_string(), event.worker(), event.detail()]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{} worker={} {}",
                event.kind(),
                event.worker(),
                event.detail()
            );
        }
        OutputFormat::Raw => {
            // Raw output carries values only; the rest is in the logs.
            if let Event::Value { printed, .. } = event {
                print_raw(format!("{printed}\n").as_bytes());
            }
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
