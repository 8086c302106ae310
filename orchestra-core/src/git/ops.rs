//! Subprocess-backed implementation of [`super::GitOps`].
//!
//! Every mutation is `Command::new("git")` with an explicit argument
//! vector, never shelled out through `sh -c`.

use std::path::Path;
use std::process::{Command, Output};

use anyhow::{bail, Context, Result};

use super::{GitOps, MergeOutcome, PullOutcome, PullStrategy, StashHandle};

/// Real `git` binary, invoked as a subprocess.
#[derive(Debug, Default, Clone, Copy)]
pub struct CliGitOps;

impl CliGitOps {
    fn run(&self, repo_root: &Path, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(repo_root)
            .output()
            .with_context(|| format!("running git {:?} in {}", args, repo_root.display()))
    }

    fn run_ok(&self, repo_root: &Path, args: &[&str]) -> Result<()> {
        let output = self.run(repo_root, args)?;
        if !output.status.success() {
            bail!(
                "git {:?} failed: {}",
                args,
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(())
    }
}

impl GitOps for CliGitOps {
    fn trunk_branch(&self, repo_root: &Path) -> Result<String> {
        // `git symbolic-ref` against the remote HEAD is the dynamic way to
        // find the default branch; fall back to the local HEAD symbolic ref
        // if there is no configured remote (e.g. in tests).
        if let Ok(output) = self.run(
            repo_root,
            &["symbolic-ref", "refs/remotes/origin/HEAD"],
        ) {
            if output.status.success() {
                let s = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if let Some(name) = s.strip_prefix("refs/remotes/origin/") {
                    return Ok(name.to_string());
                }
            }
        }
        let output = self.run(repo_root, &["rev-parse", "--abbrev-ref", "HEAD"])?;
        if !output.status.success() {
            bail!("unable to determine trunk branch");
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn worktree_add(&self, repo_root: &Path, path: &Path, branch: &str, base: &str) -> Result<()> {
        let path_str = path.to_string_lossy().to_string();
        self.run_ok(
            repo_root,
            &["worktree", "add", "-b", branch, &path_str, base],
        )
    }

    fn worktree_remove(&self, repo_root: &Path, path: &Path) -> Result<()> {
        let path_str = path.to_string_lossy().to_string();
        self.run_ok(repo_root, &["worktree", "remove", "--force", &path_str])
    }

    fn branch_delete(&self, repo_root: &Path, branch: &str) -> Result<()> {
        self.run_ok(repo_root, &["branch", "-D", branch])
    }

    fn diff_files(&self, repo_root: &Path, base: &str, branch: &str) -> Result<Vec<String>> {
        let spec = format!("{base}...{branch}");
        let output = self.run(repo_root, &["diff", "--name-only", &spec])?;
        if !output.status.success() {
            bail!(
                "git diff failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(lines(&output.stdout))
    }

    fn dirty_tracked_files(&self, repo_root: &Path) -> Result<Vec<String>> {
        let output = self.run(repo_root, &["diff", "--name-only", "HEAD"])?;
        Ok(lines(&output.stdout))
    }

    fn untracked_files(&self, repo_root: &Path) -> Result<Vec<String>> {
        let output = self.run(
            repo_root,
            &["ls-files", "--others", "--exclude-standard"],
        )?;
        Ok(lines(&output.stdout))
    }

    fn commit_all(&self, repo_root: &Path, paths: &[String], message: &str) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut add_args = vec!["add"];
        add_args.extend(paths.iter().map(|s| s.as_str()));
        self.run_ok(repo_root, &add_args)?;
        self.run_ok(repo_root, &["commit", "--no-verify", "-m", message])
    }

    fn stash_push(&self, repo_root: &Path, message: &str) -> Result<StashHandle> {
        self.run_ok(
            repo_root,
            &["stash", "push", "--include-untracked", "-m", message],
        )?;
        let output = self.run(repo_root, &["stash", "list"])?;
        let first = String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .unwrap_or("stash@{0}")
            .split(':')
            .next()
            .unwrap_or("stash@{0}")
            .to_string();
        Ok(StashHandle(first))
    }

    fn stash_pop(&self, repo_root: &Path, handle: &StashHandle) -> Result<()> {
        self.run_ok(repo_root, &["stash", "pop", &handle.0])
    }

    fn pull(&self, repo_root: &Path, strategy: PullStrategy) -> Result<PullOutcome> {
        let args: &[&str] = match strategy {
            PullStrategy::Rebase => &["pull", "--rebase"],
            PullStrategy::Merge => &["pull", "--no-rebase"],
        };
        let output = self.run(repo_root, args)?;
        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            if stdout.contains("Already up to date") {
                return Ok(PullOutcome::UpToDate);
            }
            return Ok(PullOutcome::FastForwarded);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("CONFLICT") || stderr.contains("conflict") {
            return Ok(PullOutcome::Conflict);
        }
        bail!("git pull failed: {stderr}")
    }

    fn rebase_in_progress(&self, repo_root: &Path) -> bool {
        repo_root.join(".git/rebase-merge").is_dir() || repo_root.join(".git/rebase-apply").is_dir()
    }

    fn rebase_abort(&self, repo_root: &Path) -> Result<()> {
        self.run_ok(repo_root, &["rebase", "--abort"])
    }

    fn index_is_corrupt(&self, repo_root: &Path) -> bool {
        self.run(repo_root, &["status", "--porcelain"])
            .map(|o| {
                !o.status.success()
                    && String::from_utf8_lossy(&o.stderr).contains("index file")
            })
            .unwrap_or(false)
    }

    fn repair_index(&self, repo_root: &Path) -> Result<()> {
        let _ = std::fs::remove_file(repo_root.join(".git/index"));
        self.run_ok(repo_root, &["read-tree", "HEAD"])
    }

    fn merge(&self, repo_root: &Path, branch: &str) -> Result<MergeOutcome> {
        let output = self.run(repo_root, &["merge", "--no-ff", branch])?;
        if output.status.success() {
            return Ok(MergeOutcome::Merged);
        }
        let combined = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        if combined.contains("CONFLICT") || combined.contains("Automatic merge failed") {
            let _ = self.run(repo_root, &["merge", "--abort"]);
            return Ok(MergeOutcome::Conflict);
        }
        bail!("git merge failed: {combined}")
    }

    fn rebase_onto(&self, repo_root: &Path, branch: &str, onto: &str) -> Result<MergeOutcome> {
        self.run_ok(repo_root, &["checkout", branch])?;
        let output = self.run(repo_root, &["rebase", onto])?;
        if output.status.success() {
            self.run_ok(repo_root, &["checkout", onto])?;
            return Ok(MergeOutcome::Merged);
        }
        let _ = self.run(repo_root, &["rebase", "--abort"]);
        self.run_ok(repo_root, &["checkout", onto])?;
        Ok(MergeOutcome::Conflict)
    }

    fn upstream_commit(&self, repo_root: &Path) -> Result<Option<String>> {
        let output = self.run(repo_root, &["rev-parse", "@{u}"])?;
        if !output.status.success() {
            return Ok(None);
        }
        let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if hash.is_empty() {
            return Ok(None);
        }
        Ok(Some(hash))
    }
}

fn lines(stdout: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .filter(|l| !l.is_empty())
        .map(|l| l.to_string())
        .collect()
}
