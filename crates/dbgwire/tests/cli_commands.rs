#![cfg(all(unix, feature = "cli"))]

use std::io::{BufRead, BufReader};
use std::net::TcpListener;
use std::process::{Child, Command, Output, Stdio};

const NODE: &str = "7";

/// An `emulate` child process, killed on drop.
struct Emulator {
    child: Child,
    addr: String,
}

impl Emulator {
    fn start() -> Self {
        let mut child = Command::new(env!("CARGO_BIN_EXE_dbgwire"))
            .args(["--log-level", "error", "emulate", "127.0.0.1:0"])
            .args(["--node", NODE, "--name", "bench", "--serial", "SN42"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("emulate should start");

        let stdout = child.stdout.take().expect("stdout should be piped");
        let mut line = String::new();
        BufReader::new(stdout)
            .read_line(&mut line)
            .expect("emulate should print its address");
        let listening: serde_json::Value =
            serde_json::from_str(&line).expect("address line should be json");
        let addr = listening["addr"]
            .as_str()
            .expect("addr should be a string")
            .to_string();

        Self { child, addr }
    }

    fn run(&self, command: &str, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_dbgwire"))
            .args(["--log-level", "error", "--format", "json", command, &self.addr])
            .args(args)
            .output()
            .expect("command should run")
    }
}

impl Drop for Emulator {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn json_lines(output: &Output) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("stdout line should be json"))
        .collect()
}

#[test]
fn scan_lists_emulated_node() {
    let emulator = Emulator::start();

    let output = emulator.run("scan", &[]);
    assert!(output.status.success(), "scan failed: {output:?}");

    let nodes = json_lines(&output);
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0]["node"], 7);
    assert_eq!(nodes[0]["name"], "bench");
    assert_eq!(nodes[0]["serial"], "SN42");
    assert_eq!(nodes[0]["protocol_version"], "0.5.0.0");
}

#[test]
fn query_reads_setpoint() {
    let emulator = Emulator::start();

    let output = emulator.run("query", &["--node", NODE, "--offset", "0x08"]);
    assert!(output.status.success(), "query failed: {output:?}");

    let records = json_lines(&output);
    assert_eq!(records[0]["value"], "64000000");
    assert_eq!(records[0]["value_le"], 100);
}

#[test]
fn query_follows_nested_pointers() {
    let emulator = Emulator::start();

    let output = emulator.run(
        "query",
        &["--node", NODE, "--offset", "0x0C", "--depth", "2"],
    );
    assert!(output.status.success(), "query failed: {output:?}");

    let records = json_lines(&output);
    assert_eq!(records[0]["value_le"], 0xC0FFEE);
}

#[test]
fn write_then_query_round_trips() {
    let emulator = Emulator::start();

    let output = emulator.run(
        "write",
        &["--node", NODE, "--offset", "0x08", "--value", "2a000000"],
    );
    assert!(output.status.success(), "write failed: {output:?}");
    assert_eq!(json_lines(&output)[0]["acknowledged"], true);

    let output = emulator.run("query", &["--node", NODE, "--offset", "8"]);
    assert!(output.status.success(), "query failed: {output:?}");
    assert_eq!(json_lines(&output)[0]["value_le"], 42);
}

#[test]
fn decimation_set_is_reported_back() {
    let emulator = Emulator::start();

    let output = emulator.run("decimation", &["--node", NODE, "--set", "5"]);
    assert!(output.status.success(), "decimation failed: {output:?}");
    assert_eq!(json_lines(&output)[0]["decimation"], 5);
}

#[test]
fn trace_prints_requested_sample_count() {
    let emulator = Emulator::start();

    let output = emulator.run(
        "trace",
        &[
            "--node", NODE, "--offset", "0x00", "--mode", "send-all", "--count", "3",
            "--duration", "10s",
        ],
    );
    assert!(output.status.success(), "trace failed: {output:?}");

    let samples = json_lines(&output);
    assert_eq!(samples.len(), 3);
    for sample in &samples {
        assert_eq!(sample["node"], 7);
        assert_eq!(sample["offset"], 0);
    }
}

#[test]
fn missing_node_exits_with_failure() {
    let emulator = Emulator::start();

    let output = emulator.run("query", &["--node", "99", "--offset", "0"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("node 99"));
}

#[test]
fn refused_connection_exits_with_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
    let addr = listener.local_addr().expect("local addr").to_string();
    drop(listener);

    let output = Command::new(env!("CARGO_BIN_EXE_dbgwire"))
        .args(["--log-level", "error", "scan", &addr, "--timeout", "1s"])
        .output()
        .expect("scan should run");

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("connect failed"));
}
