//! Bounded worker pool.
//!
//! `WorkerPool<G, A>` coordinates all side effects through ports
//! (`G: GitOps`, `A: AgentRunner`) so the full lifecycle can be driven in
//! tests without touching a real git repository or spawning a real agent
//! process. It drives up to `parallelism` worktrees concurrently via
//! `std::thread`, handing each completed `WorkerResult` to the merge
//! coordinator's channel.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use log::{info, warn};

use crate::error::FailureKind;
use crate::git::GitOps;
use crate::issue::Issue;
use crate::lock::GitLock;
use crate::merge::MergeRequest;
use crate::queue::PriorityQueue;

use super::agent::{needs_handoff, AgentOutput, AgentRunner, DEFAULT_HANDOFF_CAP};
use super::result::WorkerResult;
use super::verdict::{parse_verdict, Verdict};
use super::worktree;

/// Fixed configuration shared by every worker thread in the pool.
pub struct PoolConfig {
    pub parallelism: usize,
    pub repo_root: PathBuf,
    pub worktrees_dir: PathBuf,
    pub base_branch: String,
    pub allow_list: Vec<String>,
    pub readiness_timeout: Duration,
    pub implementation_timeout: Duration,
    pub handoff_cap: u32,
    /// require at least one file outside the issues tree (and outside
    /// `completed/`) to have changed, or fail the issue with `no_code_changes`.
    pub require_code_changes: bool,
    /// Issue tree, relative to `repo_root` — excluded from the code-changes
    /// check since moving an issue file into `completed/` is routine
    /// lifecycle bookkeeping, not implementation work.
    pub issues_base_dir: String,
}

impl PoolConfig {
    pub fn new(repo_root: PathBuf, worktrees_dir: PathBuf, base_branch: String) -> Self {
        Self {
            parallelism: 1,
            repo_root,
            worktrees_dir,
            base_branch,
            allow_list: Vec::new(),
            readiness_timeout: Duration::from_secs(600),
            implementation_timeout: Duration::from_secs(3600),
            handoff_cap: DEFAULT_HANDOFF_CAP,
            require_code_changes: true,
            issues_base_dir: "issues".to_string(),
        }
    }
}

/// Whether `rel` (a path relative to the repo root, `/`-separated) falls
/// under the issues tree, including its `completed/` subtree.
pub(crate) fn is_issue_tree_path(rel: &str, issues_base_dir: &str) -> bool {
    let prefix = format!("{}/", issues_base_dir.trim_end_matches('/'));
    rel.starts_with(&prefix) || rel == issues_base_dir
}

/// Drives a bounded pool of worker threads, each pulling issues from the
/// shared `PriorityQueue` and emitting a `MergeRequest` per completed issue.
pub struct WorkerPool<G, A> {
    git: Arc<G>,
    agent: Arc<A>,
    config: Arc<PoolConfig>,
    git_lock: Arc<GitLock>,
}

impl<G, A> WorkerPool<G, A>
where
    G: GitOps + 'static,
    A: AgentRunner + 'static,
{
    pub fn new(git: G, agent: A, config: PoolConfig, git_lock: Arc<GitLock>) -> Self {
        Self {
            git: Arc::new(git),
            agent: Arc::new(agent),
            config: Arc::new(config),
            git_lock,
        }
    }

    /// Run the pool until `queue` reports empty and drained, dispatching
    /// each worker's result to `merges`. Blocks the calling thread.
    pub fn run(&self, queue: Arc<PriorityQueue>, merges: Sender<MergeRequest>) {
        std::thread::scope(|scope| {
            for worker_idx in 0..self.config.parallelism {
                let git = Arc::clone(&self.git);
                let agent = Arc::clone(&self.agent);
                let config = Arc::clone(&self.config);
                let git_lock = Arc::clone(&self.git_lock);
                let queue = Arc::clone(&queue);
                let merges = merges.clone();
                let worker_id = format!("worker-{worker_idx}");

                scope.spawn(move || {
                    worker_loop(worker_id, git.as_ref(), agent.as_ref(), &config, git_lock.as_ref(), &queue, &merges);
                });
            }
        });
    }
}

fn worker_loop(
    worker_id: String,
    git: &dyn GitOps,
    agent: &dyn AgentRunner,
    config: &PoolConfig,
    git_lock: &GitLock,
    queue: &PriorityQueue,
    merges: &Sender<MergeRequest>,
) {
    loop {
        match queue.get(Duration::from_millis(500)) {
            crate::queue::GetResult::Item(issue) => {
                let priority = issue.priority;
                info!("{worker_id} picked up {}", issue.id);
                let result = run_issue(&worker_id, git, agent, config, git_lock, issue);
                if result.success {
                    queue.mark_completed(priority);
                } else {
                    queue.mark_failed(priority);
                }
                if merges.send(MergeRequest::new(result)).is_err() {
                    warn!("{worker_id}: merge coordinator channel closed, stopping");
                    return;
                }
            }
            crate::queue::GetResult::Empty => {
                if queue.is_empty() {
                    return;
                }
            }
        }
    }
}

/// Run one issue end to end: worktree setup, readiness pass, implementation
/// pass (with `CONTEXT_HANDOFF` continuation), leak detection, teardown.
fn run_issue(
    worker_id: &str,
    git: &dyn GitOps,
    agent: &dyn AgentRunner,
    config: &PoolConfig,
    git_lock: &GitLock,
    issue: Issue,
) -> WorkerResult {
    let start = Instant::now();

    let wt = match worktree::setup(
        git,
        &config.repo_root,
        &config.worktrees_dir,
        worker_id,
        &config.base_branch,
        &issue,
        git_lock,
    ) {
        Ok(wt) => wt,
        Err(e) => {
            return WorkerResult::failure(
                issue,
                String::new(),
                PathBuf::new(),
                start.elapsed(),
                FailureKind::SetupFailed(e.to_string()),
                String::new(),
                String::new(),
            );
        }
    };

    if let Err(e) = worktree::copy_allow_listed(&config.repo_root, &wt.path, &config.allow_list) {
        warn!("{worker_id}: allow-list copy failed for {}: {e}", issue.id);
    }

    let ready_prompt = wt.path.join(".orchestra-readiness-prompt.md");
    if std::fs::write(&ready_prompt, readiness_prompt(&issue)).is_err() {
        return WorkerResult::failure(
            issue,
            wt.branch.clone(),
            wt.path.clone(),
            start.elapsed(),
            FailureKind::SetupFailed("failed to write readiness prompt".to_string()),
            String::new(),
            String::new(),
        );
    }

    let readiness = match agent.run(&wt.path, &ready_prompt, config.readiness_timeout) {
        Ok(out) => out,
        Err(e) => {
            let _ = worktree::teardown(git, &config.repo_root, &wt, git_lock);
            return WorkerResult::failure(
                issue,
                wt.branch,
                wt.path,
                start.elapsed(),
                timeout_or_setup_error(e),
                String::new(),
                String::new(),
            );
        }
    };

    let verdict = parse_verdict(&readiness.stdout);

    if verdict == Verdict::Close {
        let _ = worktree::teardown(git, &config.repo_root, &wt, git_lock);
        return WorkerResult::closed(
            issue,
            start.elapsed(),
            "agent verdict: CLOSE".to_string(),
            readiness.stdout,
        );
    }

    if !verdict.authorizes_implementation() {
        let _ = worktree::teardown(git, &config.repo_root, &wt, git_lock);
        return WorkerResult::failure(
            issue,
            wt.branch,
            wt.path,
            start.elapsed(),
            FailureKind::VerdictNotReady(verdict),
            readiness.stdout,
            readiness.stderr,
        );
    }

    let was_corrected = verdict == Verdict::Corrected;

    let (impl_output, failure) =
        run_implementation_with_handoffs(agent, &wt.path, &issue, config);

    let Some(impl_output) = impl_output else {
        let _ = worktree::teardown(git, &config.repo_root, &wt, git_lock);
        return WorkerResult::failure(
            issue,
            wt.branch,
            wt.path,
            start.elapsed(),
            failure.unwrap_or(FailureKind::AgentNonzeroExit(-1)),
            readiness.stdout,
            readiness.stderr,
        );
    };

    if !impl_output.success {
        let _ = worktree::teardown(git, &config.repo_root, &wt, git_lock);
        return WorkerResult::failure(
            issue,
            wt.branch,
            wt.path,
            start.elapsed(),
            FailureKind::AgentNonzeroExit(1),
            impl_output.stdout,
            impl_output.stderr,
        );
    }

    let files_changed = git
        .diff_files(&config.repo_root, &config.base_branch, &wt.branch)
        .unwrap_or_default();

    if config.require_code_changes {
        let has_code_change = files_changed
            .iter()
            .any(|rel| !is_issue_tree_path(rel, &config.issues_base_dir));
        if !has_code_change {
            let _ = worktree::teardown(git, &config.repo_root, &wt, git_lock);
            return WorkerResult::failure(
                issue,
                wt.branch,
                wt.path,
                start.elapsed(),
                FailureKind::NoCodeChanges,
                impl_output.stdout,
                impl_output.stderr,
            );
        }
    }

    let leaked = detect_leaks(git, &config.repo_root, &config.allow_list, &config.issues_base_dir);

    WorkerResult::success(
        issue,
        wt.branch,
        wt.path,
        files_changed,
        leaked,
        start.elapsed(),
        impl_output.stdout,
        impl_output.stderr,
        was_corrected,
    )
}

/// Run the implementation pass, following `CONTEXT_HANDOFF` continuations up
/// to `config.handoff_cap` times. Returns the final output on success, or
/// `None` with the terminating error if the cap is exceeded or the agent
/// itself errors.
fn run_implementation_with_handoffs(
    agent: &dyn AgentRunner,
    worktree_path: &Path,
    issue: &Issue,
    config: &PoolConfig,
) -> (Option<AgentOutput>, Option<FailureKind>) {
    let mut handoffs = 0;
    let mut prompt = implementation_prompt(issue);

    loop {
        let prompt_path = worktree_path.join(".orchestra-implementation-prompt.md");
        if std::fs::write(&prompt_path, &prompt).is_err() {
            return (
                None,
                Some(FailureKind::SetupFailed("failed to write implementation prompt".to_string())),
            );
        }

        let output = match agent.run(worktree_path, &prompt_path, config.implementation_timeout) {
            Ok(out) => out,
            Err(e) => return (None, Some(timeout_or_setup_error(e))),
        };

        if !needs_handoff(&output.stdout) {
            return (Some(output), None);
        }

        handoffs += 1;
        if handoffs > config.handoff_cap {
            return (None, Some(FailureKind::HandoffCapExceeded(config.handoff_cap)));
        }
        prompt = continuation_prompt(issue, &output.stdout);
    }
}

fn timeout_or_setup_error(e: anyhow::Error) -> FailureKind {
    if let Some(kind) = e.downcast_ref::<FailureKind>() {
        kind.clone()
    } else {
        FailureKind::SetupFailed(e.to_string())
    }
}

/// Leaked files: changes the agent made to the *main* repository's working
/// tree rather than inside its own worktree. Files under the issues
/// tree are excluded — a legitimate move into `completed/` shows up here too
/// but is not a leak.
fn detect_leaks(git: &dyn GitOps, repo_root: &Path, allow_list: &[String], issues_base_dir: &str) -> Vec<String> {
    let dirty = git.dirty_tracked_files(repo_root).unwrap_or_default();
    let untracked = git.untracked_files(repo_root).unwrap_or_default();
    dirty
        .into_iter()
        .chain(untracked)
        .filter(|rel| !is_issue_tree_path(rel, issues_base_dir))
        .filter(|rel| !allow_list.contains(rel))
        .collect()
}

fn readiness_prompt(issue: &Issue) -> String {
    format!(
        "Assess whether issue {} (\"{}\") is ready for implementation.\n\
         Respond with a `## VERDICT` section containing exactly one of:\n\
         READY, CORRECTED, NOT_READY, NEEDS_REVIEW, CLOSE.\n",
        issue.id, issue.title
    )
}

fn implementation_prompt(issue: &Issue) -> String {
    format!(
        "Implement issue {} (\"{}\"). Commit your changes on the current branch.\n\
         If you run out of context before finishing, print CONTEXT_HANDOFF and a summary\n\
         of remaining work.\n",
        issue.id, issue.title
    )
}

fn continuation_prompt(issue: &Issue, previous_stdout: &str) -> String {
    format!(
        "Continue implementing issue {}. Prior session handed off with:\n\n{}\n",
        issue.id, previous_stdout
    )
}
