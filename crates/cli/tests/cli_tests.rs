//! CLI integration tests

use std::process::{Command, Output};

fn orchctl(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_orchctl"))
        .args(args)
        .env_remove("ORCH_API_URL")
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = orchctl(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(
        stdout.contains("Capacity Orchestrator"),
        "Should show app name"
    );
    for command in ["route", "health", "predict", "agents", "incidents"] {
        assert!(stdout.contains(command), "Should show {} command", command);
    }
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = orchctl(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("orchctl"), "Should show binary name");
}

#[test]
fn test_route_help() {
    let output = orchctl(&["route", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("--payload"));
    assert!(stdout.contains("--prefer"));
    assert!(stdout.contains("--dry-run"));
}

#[test]
fn test_predict_help_lists_functions() {
    let output = orchctl(&["predict", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    for function in ["los", "forecast", "surge", "placement"] {
        assert!(stdout.contains(function), "Should show {}", function);
    }
}

#[test]
fn test_health_help_lists_actions() {
    let output = orchctl(&["health", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    for action in ["check-all", "check-one", "status", "recover"] {
        assert!(stdout.contains(action), "Should show {}", action);
    }
}

#[test]
fn test_missing_argument_fails() {
    let output = orchctl(&["predict", "los"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("CATEGORY"));
}

#[test]
fn test_unreachable_server_exits_nonzero() {
    let output = orchctl(&["--api-url", "http://127.0.0.1:9", "agents"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to send request"));
}
