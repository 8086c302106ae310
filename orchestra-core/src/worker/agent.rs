//! Agent invocation port.
//!
//! The orchestrator never assumes anything about what runs inside a
//! worktree beyond "a command that writes to stdout and exits". A real
//! process is spawned with an explicit timeout and a SIGTERM-then-SIGKILL
//! escalation; tests substitute a fake that returns canned output instantly.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::warn;

use crate::error::FailureKind;

/// A single invocation's outcome: exit status plus captured stdout/stderr.
#[derive(Debug, Clone)]
pub struct AgentOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Port for running the coding agent. `run` executes one pass (readiness or
/// implementation) with the given prompt file, inside `worktree`, subject to
/// `timeout`.
pub trait AgentRunner: Send + Sync {
    fn run(&self, worktree: &Path, prompt_path: &Path, timeout: Duration) -> Result<AgentOutput>;
}

/// Number of `CONTEXT_HANDOFF` continuations permitted before the worker
/// gives up.
pub const DEFAULT_HANDOFF_CAP: u32 = 3;

/// Marker the agent prints when it runs out of context mid-task and expects
/// to be re-invoked with a continuation prompt.
pub const CONTEXT_HANDOFF_MARKER: &str = "CONTEXT_HANDOFF";

/// Grace period between SIGTERM and SIGKILL when a run exceeds its timeout.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Runs the agent as a real subprocess: `<command> <prompt_path>` in
/// `worktree`, with the configured timeout enforced by a polling watchdog.
#[derive(Clone)]
pub struct ProcessAgentRunner {
    pub command: String,
    pub args: Vec<String>,
}

impl ProcessAgentRunner {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

impl AgentRunner for ProcessAgentRunner {
    fn run(&self, worktree: &Path, prompt_path: &Path, timeout: Duration) -> Result<AgentOutput> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .arg(prompt_path)
            .current_dir(worktree)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning agent command `{}`", self.command))?;

        match wait_with_timeout(&mut child, timeout)? {
            Some(status) => {
                let (stdout, stderr) = drain(&mut child);
                Ok(AgentOutput {
                    success: status.success(),
                    stdout,
                    stderr,
                })
            }
            None => {
                terminate(&mut child);
                Err(FailureKind::Timeout(timeout.as_secs()).into())
            }
        }
    }
}

fn wait_with_timeout(
    child: &mut Child,
    timeout: Duration,
) -> Result<Option<std::process::ExitStatus>> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if start.elapsed() >= timeout {
            return Ok(None);
        }
        std::thread::sleep(Duration::from_millis(100));
    }
}

fn terminate(child: &mut Child) {
    send_sigterm(child);
    let deadline = Instant::now() + KILL_GRACE;
    while Instant::now() < deadline {
        if matches!(child.try_wait(), Ok(Some(_))) {
            return;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    if let Err(e) = child.kill() {
        warn!("failed to SIGKILL timed-out agent process: {e}");
    }
    let _ = child.wait();
}

#[cfg(unix)]
fn send_sigterm(child: &Child) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;
    let pid = Pid::from_raw(child.id() as i32);
    let _ = signal::kill(pid, Signal::SIGTERM);
}

#[cfg(not(unix))]
fn send_sigterm(child: &mut Child) {
    let _ = child.kill();
}

fn drain(child: &mut Child) -> (String, String) {
    let mut stdout = String::new();
    let mut stderr = String::new();
    if let Some(mut out) = child.stdout.take() {
        let _ = out.read_to_string(&mut stdout);
    }
    if let Some(mut err) = child.stderr.take() {
        let _ = err.read_to_string(&mut stderr);
    }
    (stdout, stderr)
}

/// Detect the `CONTEXT_HANDOFF` marker in agent stdout.
pub fn needs_handoff(stdout: &str) -> bool {
    stdout.contains(CONTEXT_HANDOFF_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeRunner {
        output: AgentOutput,
    }

    impl AgentRunner for FakeRunner {
        fn run(&self, _worktree: &Path, _prompt_path: &Path, _timeout: Duration) -> Result<AgentOutput> {
            Ok(self.output.clone())
        }
    }

    #[test]
    fn needs_handoff_detects_marker() {
        assert!(needs_handoff("work in progress\nCONTEXT_HANDOFF\nplease continue"));
        assert!(!needs_handoff("## VERDICT\nREADY\n"));
    }

    #[test]
    fn fake_runner_round_trips_output() {
        let runner = FakeRunner {
            output: AgentOutput {
                success: true,
                stdout: "## VERDICT\nREADY\n".to_string(),
                stderr: String::new(),
            },
        };
        let out = runner
            .run(Path::new("/tmp"), Path::new("/tmp/prompt.md"), Duration::from_secs(1))
            .unwrap();
        assert!(out.success);
        assert!(out.stdout.contains("READY"));
    }

    #[test]
    fn real_process_runner_completes_before_timeout() {
        let runner = ProcessAgentRunner::new("echo", vec!["## VERDICT\nREADY".to_string()]);
        let dir = tempfile::tempdir().unwrap();
        let prompt = dir.path().join("prompt.md");
        std::fs::write(&prompt, "ignored by echo").unwrap();
        let out = runner.run(dir.path(), &prompt, Duration::from_secs(5)).unwrap();
        assert!(out.success);
        assert!(out.stdout.contains("READY"));
    }

    #[test]
    fn real_process_runner_times_out_long_running_command() {
        let runner = ProcessAgentRunner::new("sleep", vec!["5".to_string()]);
        let dir = tempfile::tempdir().unwrap();
        let prompt = dir.path().join("prompt.md");
        std::fs::write(&prompt, "x").unwrap();
        let err = runner
            .run(dir.path(), &prompt, Duration::from_millis(200))
            .unwrap_err();
        assert!(err.to_string().contains("timed out") || err.to_string().contains("timeout"));
    }
}
