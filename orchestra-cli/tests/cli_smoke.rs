//! Binary smoke tests for the `orchestra` CLI.
//!
//! These run the actual compiled binary with `assert_cmd` to catch
//! regressions that unit tests inside the library can't: argument parsing,
//! exit codes, and the shape of error messages a real invocation produces.

use assert_cmd::Command;
use predicates::prelude::*;
use std::process::Command as StdCommand;

#[allow(deprecated)]
fn orchestra() -> Command {
    Command::cargo_bin("orchestra").unwrap()
}

fn init_repo(dir: &std::path::Path) {
    let run = |args: &[&str]| {
        StdCommand::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .expect("git available in test environment")
    };
    run(&["init", "-q"]);
    run(&["config", "user.email", "test@example.com"]);
    run(&["config", "user.name", "test"]);
    std::fs::write(dir.join("README.md"), "hello\n").unwrap();
    run(&["add", "."]);
    run(&["commit", "-q", "-m", "initial"]);
}

// ── Binary builds and runs ──────────────────────────────────────────────────

#[test]
fn binary_exists() {
    orchestra();
}

// ── Help ────────────────────────────────────────────────────────────────────

#[test]
fn help_flag() {
    orchestra()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Parallel issue orchestrator"));
}

#[test]
fn help_lists_subcommands() {
    let output = orchestra().arg("--help").output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    for cmd in &["sequential", "parallel", "sprint"] {
        assert!(stdout.contains(cmd), "help text should mention '{cmd}' subcommand");
    }
}

#[test]
fn version_flag() {
    orchestra()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("orchestra"));
}

#[test]
fn unknown_subcommand_fails() {
    orchestra()
        .arg("nonexistent-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

// ── Sequential / parallel / sprint against a real, empty repo ───────────────

#[test]
fn sequential_dry_run_on_empty_repo_reports_clean_finish() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());

    orchestra()
        .args(["sequential", "--repo"])
        .arg(dir.path())
        .arg("--dry-run")
        .assert()
        .success();
}

#[test]
fn parallel_dry_run_on_empty_repo_reports_clean_finish() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());

    orchestra()
        .args(["parallel", "--repo"])
        .arg(dir.path())
        .arg("--dry-run")
        .assert()
        .success();
}

#[test]
fn sprint_dry_run_on_empty_repo_reports_clean_finish() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());

    orchestra()
        .args(["sprint", "--repo"])
        .arg(dir.path())
        .arg("--dry-run")
        .assert()
        .success();
}

#[test]
fn run_against_nonexistent_repo_fails() {
    orchestra()
        .args(["parallel", "--repo", "/nonexistent/path/to/repo"])
        .assert()
        .failure();
}

#[test]
fn sequential_forces_single_worker_even_if_requested_otherwise() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());

    // --workers is silently overridden to 1 for `sequential`; this should
    // still complete cleanly on an issue-free repo rather than erroring on
    // the conflicting flag.
    orchestra()
        .args(["sequential", "--repo"])
        .arg(dir.path())
        .args(["--workers", "8", "--dry-run"])
        .assert()
        .success();
}
