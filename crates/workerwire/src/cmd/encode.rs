use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use workerwire_frame::{encode_value, FRAME_DELIMITER, RECORD_TERMINATOR};

use crate::cmd::{parse_json, parse_value, EncodeArgs};
use crate::exit::{CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_raw, OutputFormat};

#[derive(Serialize)]
struct EncodeOutput<'a> {
    printed: &'a str,
    block: &'a str,
    frame: &'a str,
}

pub fn run(args: EncodeArgs, format: OutputFormat) -> CliResult<i32> {
    let value = match (&args.value, &args.json) {
        (_, Some(json)) => parse_json(json)?,
        (Some(text), None) => parse_value(text)?,
        (None, None) => return Err(CliError::new(USAGE, "nothing to encode")),
    };

    let printed = value.to_string();
    let block = encode_value(&value);
    let delimiter = char::from(FRAME_DELIMITER);
    let frame = format!("{delimiter}{block}{delimiter}");

    match format {
        OutputFormat::Json => {
            let out = EncodeOutput {
                printed: &printed,
                block: &block,
                frame: &frame,
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
                .set_header(vec!["VALUE", "FRAME"])
                .add_row(vec![printed, frame]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("{printed} => {frame}"),
        OutputFormat::Raw => {
            let mut record = frame.into_bytes();
            record.push(RECORD_TERMINATOR);
            print_raw(&record);
        }
    }

    Ok(SUCCESS)
}
