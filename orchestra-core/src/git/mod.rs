//! Git operations port.
//!
//! All VCS mutation is invoked as a subprocess with an explicit argument
//! list — never through a shell. The trait exists so the merge coordinator
//! and worktree setup can be unit tested against an in-memory fake instead
//! of a real repository.

pub mod ops;

pub use ops::CliGitOps;

use std::path::{Path, PathBuf};

use anyhow::Result;

/// Outcome of attempting to merge a branch into the current branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged,
    Conflict,
}

/// Strategy used to update trunk from the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullStrategy {
    Rebase,
    Merge,
}

/// Outcome of a pull attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    UpToDate,
    FastForwarded,
    Conflict,
}

/// Opaque handle to a stash entry, used to pop the correct one later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StashHandle(pub String);

/// Port for all git operations the orchestrator needs against the main
/// repository tree and its worktrees.
pub trait GitOps: Send + Sync {
    /// Dynamically detect the repository's main/trunk branch — never
    /// hardcoded.
    fn trunk_branch(&self, repo_root: &Path) -> Result<String>;

    /// `git worktree add -b <branch> <path> <base>`.
    fn worktree_add(&self, repo_root: &Path, path: &Path, branch: &str, base: &str) -> Result<()>;

    /// Remove a worktree (and its directory).
    fn worktree_remove(&self, repo_root: &Path, path: &Path) -> Result<()>;

    /// Delete a local branch.
    fn branch_delete(&self, repo_root: &Path, branch: &str) -> Result<()>;

    /// Files changed on `branch` relative to `base`, paths relative to
    /// `repo_root`.
    fn diff_files(&self, repo_root: &Path, base: &str, branch: &str) -> Result<Vec<String>>;

    /// Tracked files with uncommitted changes in the main working tree.
    fn dirty_tracked_files(&self, repo_root: &Path) -> Result<Vec<String>>;

    /// Untracked files in the main working tree.
    fn untracked_files(&self, repo_root: &Path) -> Result<Vec<String>>;

    /// Commit currently-staged changes with the given message.
    fn commit_all(&self, repo_root: &Path, paths: &[String], message: &str) -> Result<()>;

    /// Stash tracked changes, returning a handle to restore them later.
    fn stash_push(&self, repo_root: &Path, message: &str) -> Result<StashHandle>;

    /// Pop a previously-pushed stash.
    fn stash_pop(&self, repo_root: &Path, handle: &StashHandle) -> Result<()>;

    /// Pull from the remote using the given strategy.
    fn pull(&self, repo_root: &Path, strategy: PullStrategy) -> Result<PullOutcome>;

    /// Whether a rebase is currently half-completed (sentinel files present).
    fn rebase_in_progress(&self, repo_root: &Path) -> bool;

    /// Abort a half-completed rebase.
    fn rebase_abort(&self, repo_root: &Path) -> Result<()>;

    /// Whether the index shows signs of corruption (distinct error signature
    /// from a benign conflict).
    fn index_is_corrupt(&self, repo_root: &Path) -> bool;

    /// Attempt to repair a corrupted index.
    fn repair_index(&self, repo_root: &Path) -> Result<()>;

    /// Merge `branch` into the current branch.
    fn merge(&self, repo_root: &Path, branch: &str) -> Result<MergeOutcome>;

    /// Rebase `branch` onto the current tip of `onto`.
    fn rebase_onto(&self, repo_root: &Path, branch: &str, onto: &str) -> Result<MergeOutcome>;

    /// Current commit hash of the configured upstream (`@{u}`), if one is
    /// configured, used to recognize a repeatedly-conflicting remote commit
    /// across merge attempts.
    fn upstream_commit(&self, repo_root: &Path) -> Result<Option<String>>;
}

/// Join a list of untracked files into a backup directory, preserving
/// relative structure, so they can be restored after a merge.
pub fn backup_untracked(repo_root: &Path, files: &[String], backup_dir: &Path) -> Result<()> {
    for rel in files {
        let src = repo_root.join(rel);
        if !src.is_file() {
            continue;
        }
        let dest = backup_dir.join(rel);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(&src, &dest)?;
    }
    Ok(())
}

/// Restore previously backed-up untracked files.
pub fn restore_untracked(repo_root: &Path, files: &[String], backup_dir: &Path) -> Result<()> {
    for rel in files {
        let src = backup_dir.join(rel);
        if !src.is_file() {
            continue;
        }
        let dest = repo_root.join(rel);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(&src, &dest)?;
    }
    Ok(())
}

/// Derive a worktree path under `base_dir` for a worker id.
pub fn worktree_path(base_dir: &Path, worker_id: &str) -> PathBuf {
    base_dir.join(worker_id)
}
