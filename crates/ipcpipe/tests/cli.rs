#![cfg(all(unix, feature = "cli"))]

use std::io::Write;
use std::process::{Command, Output, Stdio};

fn ipcpipe() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_ipcpipe"));
    cmd.env_remove("IPCPIPE_TRANSFER_STRATEGY")
        .env("IPCPIPE_LOG_LEVEL", "warn");
    cmd
}

fn run_with_input(mut cmd: Command, input: &[u8]) -> Output {
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("ipcpipe should start");
    child
        .stdin
        .take()
        .expect("stdin should be piped")
        .write_all(input)
        .expect("input should be written");
    child.wait_with_output().expect("ipcpipe should finish")
}

fn json_lines(output: &Output) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("each line should be JSON"))
        .collect()
}

#[test]
fn send_output_feeds_listen() {
    let sent = ipcpipe()
        .args(["send", "--data", "hello", "--repeat", "3"])
        .output()
        .expect("send should run");
    assert!(sent.status.success(), "send failed: {sent:?}");
    assert_eq!(sent.stdout.len(), 3 * (4 + 5));
    assert_eq!(&sent.stdout[..4], &5u32.to_be_bytes());

    let mut listen = ipcpipe();
    listen.args(["listen", "--format", "json"]);
    let heard = run_with_input(listen, &sent.stdout);
    assert!(heard.status.success(), "listen failed: {heard:?}");

    let messages = json_lines(&heard);
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[2]["index"], 3);
    assert_eq!(messages[0]["payload"], "hello");
    assert_eq!(messages[0]["payload_size"], 5);
}

#[test]
fn listen_stops_after_count() {
    let mut input = Vec::new();
    for word in ["one", "two", "three"] {
        input.extend_from_slice(&(word.len() as u32).to_be_bytes());
        input.extend_from_slice(word.as_bytes());
    }
    let mut listen = ipcpipe();
    listen.args(["listen", "--count", "2", "--format", "json"]);
    let heard = run_with_input(listen, &input);

    assert!(heard.status.success());
    assert_eq!(json_lines(&heard).len(), 2);
}

#[test]
fn listen_reports_truncated_input_as_invalid_data() {
    let mut input = 10u32.to_be_bytes().to_vec();
    input.extend_from_slice(b"short");
    let mut listen = ipcpipe();
    listen.args(["listen", "--format", "json"]);
    let heard = run_with_input(listen, &input);

    assert_eq!(heard.status.code(), Some(60));
    assert!(String::from_utf8_lossy(&heard.stderr).contains("truncated"));
}

#[test]
fn send_rejects_invalid_json() {
    let out = ipcpipe()
        .args(["send", "--json", "{oops"])
        .output()
        .expect("send should run");
    assert_eq!(out.status.code(), Some(64));
}

#[test]
fn echo_round_trips_through_child() {
    for strategy in ["direct", "duplicate"] {
        let out = ipcpipe()
            .args([
                "echo", "--count", "4", "--size", "512", "--strategy", strategy, "--format",
                "json",
            ])
            .output()
            .expect("echo should run");
        assert!(out.status.success(), "echo failed: {out:?}");

        let report = &json_lines(&out)[0];
        assert_eq!(report["messages"], 4);
        assert_eq!(report["payload_size"], 512);
        assert_eq!(report["strategy"], strategy);
        assert_eq!(report["child_exit_code"], 0);
    }
}

#[test]
fn doctor_passes_locally() {
    let out = ipcpipe()
        .args(["doctor", "--format", "json"])
        .output()
        .expect("doctor should run");
    assert!(out.status.success(), "doctor failed: {out:?}");

    let report = &json_lines(&out)[0];
    assert_eq!(report["overall"], "pass");
    let names: Vec<_> = report["checks"]
        .as_array()
        .expect("checks should be an array")
        .iter()
        .map(|c| c["name"].as_str().unwrap_or_default().to_string())
        .collect();
    assert!(names.contains(&"fork_handoff".to_string()));
}

#[test]
fn version_names_the_tool() {
    let out = ipcpipe().arg("version").output().expect("version should run");
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).starts_with("ipcpipe "));
}

#[test]
fn envinfo_reports_strategy_variable() {
    let out = ipcpipe()
        .args(["envinfo", "--format", "json"])
        .env("IPCPIPE_TRANSFER_STRATEGY", "duplicate")
        .output()
        .expect("envinfo should run");
    assert!(out.status.success());

    let info = &json_lines(&out)[0];
    assert_eq!(info["effective_strategy"], "duplicate");
    assert_eq!(info["environment"]["IPCPIPE_TRANSFER_STRATEGY"], "duplicate");
}
