//! CLI integration tests

use std::process::{Command, Output};

fn run_cli(args: &[&str]) -> Output {
    Command::new("cargo")
        .args(["run", "-q", "-p", "ptp-collector-cli", "--"])
        .args(args)
        .env_remove("COLLECTOR_KUBECONFIG")
        .env_remove("COLLECTOR_INTERFACE")
        .env_remove("COLLECTOR_DURATION")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = run_cli(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("PTP grand master"), "Should show about text");
    for command in ["collect", "env", "logs", "detect", "start-debug", "stop-debug"] {
        assert!(stdout.contains(command), "Should show {} command", command);
    }
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = run_cli(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("ptp-collector"), "Should show binary name");
}

/// Test collect subcommand help
#[test]
fn test_collect_help() {
    let output = run_cli(&["collect", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Collect help should succeed");
    for flag in [
        "--kubeconfig",
        "--interface",
        "--duration",
        "--rate",
        "--announce",
        "--collector",
        "--logs-output",
        "--use-analyser-format",
        "--tempdir",
        "--keep",
    ] {
        assert!(stdout.contains(flag), "Should show {} option", flag);
    }
}

/// Test env verify subcommand help
#[test]
fn test_env_verify_help() {
    let output = run_cli(&["env", "verify", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Env verify help should succeed");
    assert!(stdout.contains("--interface"), "Should show interface option");
    assert!(stdout.contains("--nodename"), "Should show nodename option");
}

/// Test detect subcommand help
#[test]
fn test_detect_help() {
    let output = run_cli(&["detect", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Detect help should succeed");
    assert!(stdout.contains("--clock-type"), "Should show clock-type option");
}

/// Missing kubeconfig exits with the missing input code
#[test]
fn test_collect_without_kubeconfig() {
    let output = run_cli(&["collect", "--interface", "ens7f0"]);
    assert_eq!(output.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("kubeconfig"), "Should name the missing flag");
}

/// A zero duration is rejected before connecting
#[test]
fn test_collect_zero_duration() {
    let output = run_cli(&[
        "collect",
        "-k",
        "/nonexistent/kubeconfig",
        "-i",
        "ens7f0",
        "-d",
        "0s",
    ]);
    assert_eq!(output.status.code(), Some(3));
}

/// The Logs collector needs somewhere to write
#[test]
fn test_collect_logs_without_output() {
    let output = run_cli(&[
        "collect",
        "-k",
        "/nonexistent/kubeconfig",
        "-i",
        "ens7f0",
        "-s",
        "logs",
    ]);
    assert_eq!(output.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--logs-output"));
}

/// An unparseable --since is a flag error
#[test]
fn test_logs_bad_since() {
    let output = run_cli(&["logs", "-k", "/nonexistent/kubeconfig", "--since", "soon"]);
    assert_eq!(output.status.code(), Some(3));
}

/// Unknown clock types are rejected by the parser
#[test]
fn test_detect_bad_clock_type() {
    let output = run_cli(&["detect", "--clock-type", "OC"]);
    assert!(!output.status.success());
}
