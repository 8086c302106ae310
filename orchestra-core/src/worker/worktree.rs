//! Worktree setup for a single worker.
//!
//! Creating or tearing down a worktree touches the shared `.git` metadata,
//! so both operations acquire the orchestrator's process-wide
//! [`crate::lock::GitLock`] for the span of the mutating git call.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::warn;

use crate::git::GitOps;
use crate::issue::Issue;
use crate::lock::GitLock;

/// A freshly created worktree for one issue, ready to hand to the agent.
pub struct Worktree {
    pub path: PathBuf,
    pub branch: String,
}

/// Create a worktree for `issue` branched off `base_branch`, under
/// `worktrees_dir/<worker_id>`.
pub fn setup(
    git: &dyn GitOps,
    repo_root: &Path,
    worktrees_dir: &Path,
    worker_id: &str,
    base_branch: &str,
    issue: &Issue,
    lock: &GitLock,
) -> Result<Worktree> {
    let path = crate::git::worktree_path(worktrees_dir, worker_id);
    if path.exists() {
        std::fs::remove_dir_all(&path)
            .with_context(|| format!("clearing stale worktree at {}", path.display()))?;
    }
    let branch = issue.branch_name();
    {
        let _guard = lock.acquire().context("acquiring git lock for worktree creation")?;
        git.worktree_add(repo_root, &path, &branch, base_branch)
            .with_context(|| format!("creating worktree for {}", issue.id))?;
    }
    Ok(Worktree { path, branch })
}

/// Copy the allow-listed context files from the main tree into the
/// worktree. A missing allow-listed file is logged and skipped rather than
/// treated as a setup failure — allow-list is best-effort context, not a
/// hard dependency. Directory entries in the allow list are skipped with a
/// warning: the allow list names files, not trees.
pub fn copy_allow_listed(repo_root: &Path, worktree: &Path, allow_list: &[String]) -> Result<()> {
    for rel in allow_list {
        let src = repo_root.join(rel);
        if src.is_dir() {
            warn!("allow-list entry {rel} is a directory, skipping");
            continue;
        }
        if !src.is_file() {
            warn!("allow-list entry {rel} not found in main tree, skipping");
            continue;
        }
        let dest = worktree.join(rel);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating parent dir for {rel}"))?;
        }
        std::fs::copy(&src, &dest).with_context(|| format!("copying allow-listed file {rel}"))?;
    }
    Ok(())
}

/// Remove a worktree and delete its branch. Worktree removal failure is
/// non-fatal to the overall run — it leaves behind a directory to
/// clean up later but does not block merge progress.
pub fn teardown(git: &dyn GitOps, repo_root: &Path, worktree: &Worktree, lock: &GitLock) -> Result<()> {
    let _guard = lock.acquire().context("acquiring git lock for worktree teardown")?;
    if let Err(e) = git.worktree_remove(repo_root, &worktree.path) {
        warn!("failed to remove worktree {}: {e}", worktree.path.display());
    }
    git.branch_delete(repo_root, &worktree.branch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    use crate::git::{MergeOutcome, PullOutcome, PullStrategy, StashHandle};
    use crate::issue::{Category, Issue, Priority};

    #[derive(Default)]
    struct FakeGit {
        added: Mutex<Vec<(PathBuf, String, String)>>,
    }

    impl GitOps for FakeGit {
        fn trunk_branch(&self, _repo_root: &Path) -> Result<String> {
            Ok("main".to_string())
        }
        fn worktree_add(&self, _repo_root: &Path, path: &Path, branch: &str, base: &str) -> Result<()> {
            self.added
                .lock()
                .unwrap()
                .push((path.to_path_buf(), branch.to_string(), base.to_string()));
            std::fs::create_dir_all(path)?;
            Ok(())
        }
        fn worktree_remove(&self, _repo_root: &Path, path: &Path) -> Result<()> {
            let _ = std::fs::remove_dir_all(path);
            Ok(())
        }
        fn branch_delete(&self, _repo_root: &Path, _branch: &str) -> Result<()> {
            Ok(())
        }
        fn diff_files(&self, _repo_root: &Path, _base: &str, _branch: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        fn dirty_tracked_files(&self, _repo_root: &Path) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        fn untracked_files(&self, _repo_root: &Path) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        fn commit_all(&self, _repo_root: &Path, _paths: &[String], _message: &str) -> Result<()> {
            Ok(())
        }
        fn stash_push(&self, _repo_root: &Path, _message: &str) -> Result<StashHandle> {
            Ok(StashHandle("stash@{0}".to_string()))
        }
        fn stash_pop(&self, _repo_root: &Path, _handle: &StashHandle) -> Result<()> {
            Ok(())
        }
        fn pull(&self, _repo_root: &Path, _strategy: PullStrategy) -> Result<PullOutcome> {
            Ok(PullOutcome::UpToDate)
        }
        fn rebase_in_progress(&self, _repo_root: &Path) -> bool {
            false
        }
        fn rebase_abort(&self, _repo_root: &Path) -> Result<()> {
            Ok(())
        }
        fn index_is_corrupt(&self, _repo_root: &Path) -> bool {
            false
        }
        fn repair_index(&self, _repo_root: &Path) -> Result<()> {
            Ok(())
        }
        fn merge(&self, _repo_root: &Path, _branch: &str) -> Result<MergeOutcome> {
            Ok(MergeOutcome::Merged)
        }
        fn rebase_onto(&self, _repo_root: &Path, _branch: &str, _onto: &str) -> Result<MergeOutcome> {
            Ok(MergeOutcome::Merged)
        }
        fn upstream_commit(&self, _repo_root: &Path) -> Result<Option<String>> {
            Ok(None)
        }
    }

    fn sample_issue() -> Issue {
        Issue {
            id: "BUG-001".to_string(),
            category: Category::Bugs,
            priority: Priority(2),
            title: "Fix the thing".to_string(),
            path: PathBuf::from("bugs/P2-BUG-001-fix-the-thing.md"),
            blocked_by: BTreeSet::new(),
        }
    }

    #[test]
    fn setup_creates_worktree_at_expected_path() {
        let git = FakeGit::default();
        let root = tempfile::tempdir().unwrap();
        let worktrees = tempfile::tempdir().unwrap();
        let issue = sample_issue();

        let lock = GitLock::default();
        let wt = setup(&git, root.path(), worktrees.path(), "worker-0", "main", &issue, &lock).unwrap();
        assert_eq!(wt.path, worktrees.path().join("worker-0"));
        assert_eq!(wt.branch, issue.branch_name());
        assert!(wt.path.is_dir());
    }

    #[test]
    fn copy_allow_listed_skips_missing_files() {
        let root = tempfile::tempdir().unwrap();
        let worktree = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("CONVENTIONS.md"), b"notes").unwrap();

        let allow_list = vec!["CONVENTIONS.md".to_string(), "missing.md".to_string()];
        copy_allow_listed(root.path(), worktree.path(), &allow_list).unwrap();

        assert!(worktree.path().join("CONVENTIONS.md").is_file());
        assert!(!worktree.path().join("missing.md").exists());
    }

    #[test]
    fn copy_allow_listed_skips_directories() {
        let root = tempfile::tempdir().unwrap();
        let worktree = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("docs")).unwrap();

        copy_allow_listed(root.path(), worktree.path(), &["docs".to_string()]).unwrap();
        assert!(!worktree.path().join("docs").exists());
    }
}
