//! Integration tests for the bufferbloat command-line interface
//!
//! None of these reach the point where the emulated network is created, so
//! they run without root.

use assert_cmd::Command;
use predicates::prelude::*;

/// Helper function to create a command instance for the bufferbloat binary
fn cli_command() -> Command {
    Command::cargo_bin("bufferbloat").expect("Failed to find bufferbloat binary")
}

#[test]
fn test_cli_help() {
    let mut cmd = cli_command();
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("--bw-server"))
        .stdout(predicate::str::contains("--bw-attacker"))
        .stdout(predicate::str::contains("--bw-innocent"))
        .stdout(predicate::str::contains("--delay"))
        .stdout(predicate::str::contains("--dir"))
        .stdout(predicate::str::contains("--maxq"))
        .stdout(predicate::str::contains("--cong"));
}

#[test]
fn test_cli_version() {
    let mut cmd = cli_command();
    cmd.arg("--version");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("bufferbloat"));
}

#[test]
fn test_cli_requires_dir() {
    let mut cmd = cli_command();
    cmd.args(["--bw-server", "10"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("--dir"));
}

#[test]
fn test_cli_rejects_non_numeric_bandwidth() {
    let mut cmd = cli_command();
    cmd.args(["--dir", "out", "--bw-innocent", "fast"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

#[test]
fn test_cli_invalid_topology_exits_non_zero() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = cli_command();
    cmd.arg("--dir")
        .arg(dir.path().join("run"))
        .args(["--bw-server", "0"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("topology"))
        .stderr(predicate::str::contains("bw_server"));
}

#[test]
fn test_cli_uncreatable_dir_exits_non_zero() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("plain-file");
    std::fs::write(&file, b"").unwrap();

    let mut cmd = cli_command();
    cmd.arg("--dir").arg(file.join("run"));

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("output directory"));
}

#[test]
fn test_cli_bad_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("base.json");
    std::fs::write(&path, "{ not json").unwrap();

    let mut cmd = cli_command();
    cmd.arg("--dir")
        .arg(dir.path().join("run"))
        .arg("--config")
        .arg(&path);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config file"));
}
