#![cfg(feature = "cli")]

use std::io::Write;
use std::process::{Command, Output, Stdio};

use workerwire::frame::{encode_value, Value};

fn workerwire() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_workerwire"));
    cmd.arg("--log-level").arg("error");
    cmd
}

fn decode(input: &[u8]) -> Output {
    let mut child = workerwire()
        .arg("--format")
        .arg("raw")
        .arg("decode")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("decode should start");
    child
        .stdin
        .take()
        .expect("stdin should be piped")
        .write_all(input)
        .expect("stdin should accept input");
    child.wait_with_output().expect("decode should finish")
}

#[test]
fn encode_prints_frame_record() {
    let output = workerwire()
        .arg("--format")
        .arg("raw")
        .arg("encode")
        .arg("(1 2 3)")
        .output()
        .expect("encode should run");

    assert!(output.status.success());
    assert_eq!(output.stdout, b"\"KDEgMiAzKQ==\"\n");
}

#[test]
fn encode_json_reports_all_forms() {
    let output = workerwire()
        .arg("--format")
        .arg("json")
        .arg("encode")
        .arg("--json")
        .arg(r#"{"ok": true}"#)
        .output()
        .expect("encode should run");

    assert!(output.status.success());
    let payload: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("encode should emit json");
    assert_eq!(payload["printed"], "((\"ok\" t))");
    let block = payload["block"].as_str().expect("block should be a string");
    assert_eq!(payload["frame"], format!("\"{block}\""));
}

#[test]
fn encode_rejects_unreadable_value() {
    let output = workerwire()
        .arg("encode")
        .arg("(1 2")
        .output()
        .expect("encode should run");

    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn decode_prints_values_in_order() {
    let mut input = Vec::new();
    for value in [
        Value::list([1.into(), 2.into(), 3.into()]),
        Value::from("two"),
        Value::from(3),
    ] {
        input.extend(format!("\"{}\"\n", encode_value(&value)).into_bytes());
    }

    let output = decode(&input);
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "(1 2 3)\n\"two\"\n3\n"
    );
}

#[test]
fn decode_skips_malformed_token_and_continues() {
    let mut input = b"\"not base64!\"\n".to_vec();
    input.extend(format!("\"{}\"\n", encode_value(&Value::from(42))).into_bytes());

    let output = decode(&input);
    assert_eq!(output.status.code(), Some(60));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "42\n");
    assert!(String::from_utf8_lossy(&output.stderr).contains("1 malformed token(s) skipped"));
}

#[test]
fn version_reports_crate_version() {
    let output = workerwire()
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        format!("workerwire {}", env!("CARGO_PKG_VERSION"))
    );
}
