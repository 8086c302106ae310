//! `WorkerResult` — produced exactly once per issue, when a worker
//! releases its worktree, and consumed exactly once by the merge coordinator.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::FailureKind;
use crate::issue::Issue;

/// Outcome of running one issue through the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerResult {
    pub issue: Issue,
    pub success: bool,
    pub branch: String,
    pub worktree_path: PathBuf,
    pub files_changed: Vec<String>,
    pub leaked_files: Vec<String>,
    pub duration: Duration,
    pub error: Option<FailureKind>,
    pub stdout: String,
    pub stderr: String,
    pub was_corrected: bool,
    pub should_close: bool,
    pub close_reason: Option<String>,
}

impl WorkerResult {
    /// Construct a successful result.
    #[allow(clippy::too_many_arguments)]
    pub fn success(
        issue: Issue,
        branch: String,
        worktree_path: PathBuf,
        files_changed: Vec<String>,
        leaked_files: Vec<String>,
        duration: Duration,
        stdout: String,
        stderr: String,
        was_corrected: bool,
    ) -> Self {
        Self {
            issue,
            success: true,
            branch,
            worktree_path,
            files_changed,
            leaked_files,
            duration,
            error: None,
            stdout,
            stderr,
            was_corrected,
            should_close: false,
            close_reason: None,
        }
    }

    /// Construct a failed result.
    #[allow(clippy::too_many_arguments)]
    pub fn failure(
        issue: Issue,
        branch: String,
        worktree_path: PathBuf,
        duration: Duration,
        error: FailureKind,
        stdout: String,
        stderr: String,
    ) -> Self {
        Self {
            issue,
            success: false,
            branch,
            worktree_path,
            files_changed: Vec::new(),
            leaked_files: Vec::new(),
            duration,
            error: Some(error),
            stdout,
            stderr,
            was_corrected: false,
            should_close: false,
            close_reason: None,
        }
    }

    /// Construct a `CLOSE`-verdict result: no implementation pass ran, no
    /// branch needs merging.
    pub fn closed(issue: Issue, duration: Duration, reason: String, stdout: String) -> Self {
        Self {
            issue,
            success: true,
            branch: String::new(),
            worktree_path: PathBuf::new(),
            files_changed: Vec::new(),
            leaked_files: Vec::new(),
            duration,
            error: None,
            stdout,
            stderr: String::new(),
            was_corrected: false,
            should_close: true,
            close_reason: Some(reason),
        }
    }
}
