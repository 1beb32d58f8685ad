#![cfg(all(unix, feature = "cli"))]

use std::process::Command;

fn bufferlink() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_bufferlink"));
    command.arg("--log-level").arg("error");
    command
}

#[test]
fn simulate_reports_json_summary() {
    let output = bufferlink()
        .args(["--format", "json", "simulate", "--frames", "8", "--width", "64", "--height", "64"])
        .output()
        .expect("simulate should run");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(report["frames"], 8);
    assert_eq!(report["target"]["frames_completed"], 8);
    assert_eq!(report["target"]["releases"], 7);
    assert_eq!(report["compositor"]["frames_presented"], 8);
    assert_eq!(report["device"]["live_memory"], 0);
    assert_eq!(report["buffer_use"]["0"], 4);
    assert_eq!(report["buffer_use"]["1"], 4);
}

#[test]
fn simulate_raw_prints_frame_count() {
    let output = bufferlink()
        .args(["--format", "raw", "simulate", "-n", "3"])
        .output()
        .expect("simulate should run");
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "3");
}

#[test]
fn doctor_passes_on_unix() {
    let output = bufferlink()
        .args(["--format", "json", "doctor"])
        .output()
        .expect("doctor should run");
    assert_eq!(output.status.code(), Some(0));

    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(report["overall"], "pass");
    let names: Vec<&str> = report["checks"]
        .as_array()
        .expect("checks should be an array")
        .iter()
        .filter_map(|check| check["name"].as_str())
        .collect();
    assert!(names.contains(&"descriptor_passing"));
    assert!(names.contains(&"channel_round_trip"));
}

#[test]
fn version_json_names_the_wire_geometry() {
    let output = bufferlink()
        .args(["--format", "json", "version", "--extended"])
        .output()
        .expect("version should run");
    assert!(output.status.success());

    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(report["name"], "bufferlink");
    assert_eq!(report["message_size"], 32);
    assert_eq!(report["pool_size"], 4);
}

#[test]
fn invalid_size_is_a_usage_error() {
    let output = bufferlink()
        .args(["simulate", "--height", "0"])
        .output()
        .expect("simulate should run");
    assert_eq!(output.status.code(), Some(2));
}
