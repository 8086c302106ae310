//! Sequential merge coordinator service.
//!
//! `MergeCoordinator<G>` routes all git side effects through the `GitOps`
//! port so the merge protocol itself — pre-merge sync, stash/backup,
//! merge-or-rebase retry, restore, circuit breaking — can be unit tested
//! against an in-memory fake. Every git mutation against the main tree
//! (stash, commit, pull, merge, worktree teardown) runs under the
//! process-wide `GitLock` so it never races a worker's own worktree setup.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::Receiver;
use log::{info, warn};

use crate::error::{FailureKind, MergeFailureKind};
use crate::git::{GitOps, MergeOutcome, PullOutcome, PullStrategy, StashHandle};
use crate::lock::GitLock;
use crate::worker::pool::is_issue_tree_path;
use crate::worker::worktree::{self, Worktree};

use super::circuit_breaker::CircuitBreaker;
use super::{MergeRequest, MergeRequestRecord, MergeStatus};

/// One merge attempt's outcome, handed to the caller for bookkeeping
/// (`ProcessingState` updates, summary reporting).
#[derive(Debug)]
pub struct MergeResult {
    pub issue_id: String,
    pub status: MergeStatus,
    pub retry_count: u32,
    pub error: Option<MergeFailureKind>,
    /// Set when this request never reached the merge protocol at all — the
    /// worker itself failed (timeout, bad verdict, ...). Distinct from
    /// `error`, which is reserved for failures of the merge protocol proper;
    /// both map to the same `ProcessingState::failed` reason-code space.
    pub worker_failure: Option<FailureKind>,
    pub leaked_files: Vec<String>,
    /// Non-fatal reason codes surfaced alongside a `Success`/`Failed` result
    /// — currently only `worktree_removal_failed`, which never blocks the
    /// merge itself.
    pub warnings: Vec<String>,
}

impl MergeResult {
    /// The reason code to persist, preferring a merge-protocol failure over
    /// a pass-through worker failure when (impossibly) both are set.
    pub fn reason_code(&self) -> Option<&'static str> {
        self.error
            .as_ref()
            .map(|e| e.reason_code())
            .or_else(|| self.worker_failure.as_ref().map(|f| f.reason_code()))
    }
}

/// One event emitted per request the coordinator drains: `Dispatched` fires
/// the moment the request is pulled off the channel (before any merge work
/// happens), `Completed` fires once it has been fully processed. Callers use
/// `Dispatched` to record a durable `pending_merges` entry and `Completed` to
/// clear it — crash-resumability needs both ends of the window, not just the
/// outcome.
pub enum MergeEvent {
    Dispatched(MergeRequestRecord),
    Completed(MergeResult),
}

/// Configuration for the merge protocol.
pub struct CoordinatorConfig {
    pub repo_root: PathBuf,
    pub issues_base_dir: PathBuf,
    pub base_branch: String,
    pub max_merge_retries: u32,
    pub pull_strategy: PullStrategy,
    pub circuit_breaker_failure_threshold: u32,
    pub circuit_breaker_cooldown_secs: u64,
}

/// Drains completed `WorkerResult`s from a channel and merges each, one at a
/// time, into trunk.
pub struct MergeCoordinator<G> {
    git: G,
    config: CoordinatorConfig,
    git_lock: Arc<GitLock>,
    breaker: CircuitBreaker,
    /// Upstream commits that have repeatedly conflicted against local
    /// history this run; once recorded, subsequent pulls against the same
    /// commit use `--merge` instead of `--rebase`.
    problematic_commits: HashSet<String>,
}

impl<G: GitOps> MergeCoordinator<G> {
    pub fn new(git: G, config: CoordinatorConfig, git_lock: Arc<GitLock>) -> Self {
        let breaker = CircuitBreaker::new(
            config.circuit_breaker_failure_threshold,
            Duration::from_secs(config.circuit_breaker_cooldown_secs),
        );
        Self {
            git,
            config,
            git_lock,
            breaker,
            problematic_commits: HashSet::new(),
        }
    }

    /// `issues_base_dir` relative to `repo_root`, `/`-separated, for the
    /// auto-commit/stash split in `merge_one`.
    fn issues_base_dir_rel(&self) -> String {
        self.config
            .issues_base_dir
            .strip_prefix(&self.config.repo_root)
            .unwrap_or(&self.config.issues_base_dir)
            .to_string_lossy()
            .replace('\\', "/")
    }

    /// Run until `requests` is closed (the worker pool has shut down),
    /// invoking `on_event` for every request, both when it is pulled off the
    /// channel and once it has been fully processed.
    pub fn run(&mut self, requests: Receiver<MergeRequest>, mut on_event: impl FnMut(MergeEvent)) {
        for request in requests {
            on_event(MergeEvent::Dispatched(request.to_record()));

            if self.breaker.is_tripped() {
                warn!(
                    "merge circuit breaker open ({} consecutive failures), skipping {}",
                    self.breaker.consecutive_failures(),
                    request.result.issue.id
                );
                on_event(MergeEvent::Completed(MergeResult {
                    issue_id: request.result.issue.id.clone(),
                    status: MergeStatus::Failed,
                    retry_count: 0,
                    error: Some(MergeFailureKind::MergeCancelled),
                    worker_failure: None,
                    leaked_files: Vec::new(),
                    warnings: Vec::new(),
                }));
                continue;
            }

            if request.result.should_close {
                on_event(MergeEvent::Completed(self.handle_close(&request)));
                continue;
            }

            if !request.result.success {
                // Never reached the merge protocol — pass the worker's own
                // failure reason straight through so the orchestrator still
                // records it and clears the issue's in-progress slot.
                on_event(MergeEvent::Completed(MergeResult {
                    issue_id: request.result.issue.id.clone(),
                    status: MergeStatus::Failed,
                    retry_count: 0,
                    error: None,
                    worker_failure: request.result.error.clone(),
                    leaked_files: Vec::new(),
                    warnings: Vec::new(),
                }));
                continue;
            }

            let result = self.merge_one(&request);
            match &result.status {
                MergeStatus::Success => self.breaker.record_success(),
                MergeStatus::Failed => self.breaker.record_failure(),
                _ => {}
            }
            on_event(MergeEvent::Completed(result));
        }
    }

    /// Handle a `CLOSE`-verdict result: no branch was ever created, so there
    /// is nothing to merge. Move the issue file into `completed/` directly
    /// in the main tree and auto-commit the move as routine lifecycle
    /// bookkeeping.
    fn handle_close(&self, request: &MergeRequest) -> MergeResult {
        let issue = &request.result.issue;
        let reason = request
            .result
            .close_reason
            .clone()
            .unwrap_or_else(|| "closed by agent".to_string());

        let old_rel = issue.path.to_string_lossy().to_string();
        if let Err(e) = crate::issue::move_to_completed(&self.config.issues_base_dir, issue) {
            warn!("{}: failed to move closed issue to completed: {e}", issue.id);
        } else if let Some(file_name) = issue.path.file_name() {
            let new_rel = self
                .config
                .issues_base_dir
                .join("completed")
                .join(file_name)
                .to_string_lossy()
                .to_string();
            let message = format!("chore: close {} ({reason})", issue.id);
            let outcome = match self.git_lock.acquire() {
                Ok(_guard) => self.git.commit_all(&self.config.repo_root, &[old_rel, new_rel], &message),
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                warn!("{}: failed to commit closure move: {e}", issue.id);
            }
        }

        info!("{}: closed without implementation ({reason})", issue.id);
        MergeResult {
            issue_id: issue.id.clone(),
            status: MergeStatus::Success,
            retry_count: 0,
            error: None,
            worker_failure: None,
            leaked_files: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn merge_one(&mut self, request: &MergeRequest) -> MergeResult {
        let issue_id = request.result.issue.id.clone();
        let branch = request.result.branch.clone();
        let worktree = Worktree {
            path: request.result.worktree_path.clone(),
            branch: branch.clone(),
        };
        let repo_root = self.config.repo_root.clone();
        let issues_base_dir_rel = self.issues_base_dir_rel();

        info!("merging {issue_id} from branch {branch}");

        let git_lock = Arc::clone(&self.git_lock);
        let _guard = match git_lock.acquire() {
            Ok(g) => g,
            Err(e) => {
                return failed(
                    issue_id,
                    MergeFailureKind::PullFailed(format!("failed to acquire git lock: {e}")),
                )
            }
        };

        let backup_dir = repo_root.join(".orchestra-merge-backup");
        let dirty = self.git.dirty_tracked_files(&repo_root).unwrap_or_default();
        let untracked = self.git.untracked_files(&repo_root).unwrap_or_default();

        // §4.3 step 1: issue-tracking bookkeeping is auto-committed; any
        // other tracked dirty file is stashed rather than swept in with it.
        let (issue_tree_dirty, rest_dirty): (Vec<String>, Vec<String>) = dirty
            .into_iter()
            .partition(|rel| is_issue_tree_path(rel, &issues_base_dir_rel));

        if !issue_tree_dirty.is_empty() {
            if let Err(e) = self
                .git
                .commit_all(&repo_root, &issue_tree_dirty, "chore: auto-commit issue-tracking changes")
            {
                return failed(issue_id, MergeFailureKind::StashFailed(e.to_string()));
            }
        }

        let mut stash_handle: Option<StashHandle> = None;
        if !rest_dirty.is_empty() {
            match self.git.stash_push(&repo_root, "orchestra pre-merge autosave") {
                Ok(handle) => stash_handle = Some(handle),
                Err(e) => return failed(issue_id, MergeFailureKind::StashFailed(e.to_string())),
            }
        }

        if !untracked.is_empty() {
            if crate::git::backup_untracked(&repo_root, &untracked, &backup_dir).is_err() {
                warn!("failed to back up untracked files before merging {issue_id}");
            }
        }

        if let Err(e) = self.sync_trunk(&repo_root) {
            self.restore(&repo_root, &untracked, &backup_dir, stash_handle.as_ref());
            return failed(issue_id, e);
        }

        let outcome = self.merge_with_retries(&repo_root, &branch, &issue_id);

        self.restore(&repo_root, &untracked, &backup_dir, stash_handle.as_ref());

        drop(_guard);

        let leaked = request.result.leaked_files.clone();
        if !leaked.is_empty() {
            warn!("{issue_id}: {} file(s) leaked outside the diff, reconciling as warnings", leaked.len());
        }

        match outcome {
            Ok(retries) => {
                let teardown_warning = self.cleanup_worktree(&repo_root, &worktree, &issue_id);
                let warnings = teardown_warning
                    .map(|w| vec![w.reason_code().to_string()])
                    .unwrap_or_default();
                MergeResult {
                    issue_id,
                    status: MergeStatus::Success,
                    retry_count: retries,
                    error: None,
                    worker_failure: None,
                    leaked_files: leaked,
                    warnings,
                }
            }
            Err((err, retries)) => MergeResult {
                issue_id,
                status: MergeStatus::Failed,
                retry_count: retries,
                error: Some(err),
                worker_failure: None,
                leaked_files: leaked,
                warnings: Vec::new(),
            },
        }
    }

    /// Pull trunk up to date before attempting the merge.
    ///
    /// Uses `--rebase` by default; if the commit currently at the tip of the
    /// upstream branch is known (from an earlier attempt this run) to
    /// repeatedly conflict against local history, switches to `--merge`
    /// instead. A conflicting pull records that commit as problematic for
    /// the remainder of the run.
    fn sync_trunk(&mut self, repo_root: &Path) -> Result<(), MergeFailureKind> {
        if self.git.rebase_in_progress(repo_root) {
            self.git
                .rebase_abort(repo_root)
                .map_err(|e| MergeFailureKind::PullFailed(e.to_string()))?;
        }
        if self.git.index_is_corrupt(repo_root) {
            self.git
                .repair_index(repo_root)
                .map_err(|_| MergeFailureKind::IndexCorruptUnrecoverable)?;
        }

        let upstream = self.git.upstream_commit(repo_root).ok().flatten();
        let strategy = match &upstream {
            Some(commit) if self.problematic_commits.contains(commit) => {
                info!("upstream commit {commit} previously conflicted, pulling with --merge");
                PullStrategy::Merge
            }
            _ => self.config.pull_strategy,
        };

        match self.git.pull(repo_root, strategy) {
            Ok(PullOutcome::Conflict) => {
                if let Some(commit) = upstream {
                    self.problematic_commits.insert(commit);
                }
                Err(MergeFailureKind::PullFailed(
                    "pull produced a conflict against trunk".to_string(),
                ))
            }
            Ok(_) => Ok(()),
            Err(e) => Err(MergeFailureKind::PullFailed(e.to_string())),
        }
    }

    /// Merge the branch, retrying via rebase-onto-trunk on conflict, up to
    /// `max_merge_retries` times.
    fn merge_with_retries(
        &self,
        repo_root: &Path,
        branch: &str,
        issue_id: &str,
    ) -> std::result::Result<u32, (MergeFailureKind, u32)> {
        let mut retries = 0;
        loop {
            let outcome = self.git.merge(repo_root, branch);
            match outcome {
                Ok(MergeOutcome::Merged) => return Ok(retries),
                Ok(MergeOutcome::Conflict) => {
                    if retries >= self.config.max_merge_retries {
                        return Err((
                            MergeFailureKind::ConflictUnresolvable(retries),
                            retries,
                        ));
                    }
                    retries += 1;
                    info!("{issue_id}: merge conflict, rebasing onto trunk (attempt {retries})");
                    match self.git.rebase_onto(repo_root, branch, &self.config.base_branch) {
                        Ok(MergeOutcome::Merged) => continue,
                        Ok(MergeOutcome::Conflict) => continue,
                        Err(e) => {
                            return Err((MergeFailureKind::PullFailed(e.to_string()), retries));
                        }
                    }
                }
                Err(e) => return Err((MergeFailureKind::PullFailed(e.to_string()), retries)),
            }
        }
    }

    fn restore(&self, repo_root: &Path, untracked: &[String], backup_dir: &Path, stash: Option<&StashHandle>) {
        if let Some(handle) = stash {
            if let Err(e) = self.git.stash_pop(repo_root, handle) {
                warn!("failed to pop stash after merge: {e}");
            }
        }
        if untracked.is_empty() {
            return;
        }
        if let Err(e) = crate::git::restore_untracked(repo_root, untracked, backup_dir) {
            warn!("failed to restore untracked files after merge: {e}");
        }
        let _ = std::fs::remove_dir_all(backup_dir);
    }

    /// Tear down the merged branch's worktree and delete its branch.
    /// Returns a non-fatal `WorktreeRemovalFailed` warning on failure — the
    /// merge itself already succeeded, this is cleanup only.
    fn cleanup_worktree(&self, repo_root: &Path, worktree: &Worktree, issue_id: &str) -> Option<MergeFailureKind> {
        match worktree::teardown(&self.git, repo_root, worktree, &self.git_lock) {
            Ok(()) => None,
            Err(e) => {
                warn!("{issue_id}: worktree teardown failed (non-fatal): {e}");
                Some(MergeFailureKind::WorktreeRemovalFailed(e.to_string()))
            }
        }
    }
}

fn failed(issue_id: String, error: MergeFailureKind) -> MergeResult {
    MergeResult {
        issue_id,
        status: MergeStatus::Failed,
        retry_count: 0,
        error: Some(error),
        worker_failure: None,
        leaked_files: Vec::new(),
        warnings: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration as StdDuration;

    use crate::issue::{Category, Issue, Priority};
    use crate::worker::result::WorkerResult;

    struct FakeGit {
        merge_outcomes: Mutex<Vec<MergeOutcome>>,
        pull_outcome: PullOutcome,
    }

    impl FakeGit {
        fn always_merges() -> Self {
            Self {
                merge_outcomes: Mutex::new(vec![MergeOutcome::Merged]),
                pull_outcome: PullOutcome::UpToDate,
            }
        }

        fn conflicts_then_merges(n: usize) -> Self {
            let mut outcomes = vec![MergeOutcome::Conflict; n];
            outcomes.push(MergeOutcome::Merged);
            outcomes.reverse();
            Self {
                merge_outcomes: Mutex::new(outcomes),
                pull_outcome: PullOutcome::UpToDate,
            }
        }

        fn always_conflicts() -> Self {
            Self {
                merge_outcomes: Mutex::new(vec![]),
                pull_outcome: PullOutcome::UpToDate,
            }
        }
    }

    impl GitOps for FakeGit {
        fn trunk_branch(&self, _r: &Path) -> Result<String> {
            Ok("main".into())
        }
        fn worktree_add(&self, _r: &Path, _p: &Path, _b: &str, _base: &str) -> Result<()> {
            Ok(())
        }
        fn worktree_remove(&self, _r: &Path, _p: &Path) -> Result<()> {
            Ok(())
        }
        fn branch_delete(&self, _r: &Path, _b: &str) -> Result<()> {
            Ok(())
        }
        fn diff_files(&self, _r: &Path, _base: &str, _b: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        fn dirty_tracked_files(&self, _r: &Path) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        fn untracked_files(&self, _r: &Path) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        fn commit_all(&self, _r: &Path, _p: &[String], _m: &str) -> Result<()> {
            Ok(())
        }
        fn stash_push(&self, _r: &Path, _m: &str) -> Result<StashHandle> {
            Ok(StashHandle("stash@{0}".into()))
        }
        fn stash_pop(&self, _r: &Path, _h: &StashHandle) -> Result<()> {
            Ok(())
        }
        fn pull(&self, _r: &Path, _s: PullStrategy) -> Result<PullOutcome> {
            Ok(self.pull_outcome)
        }
        fn rebase_in_progress(&self, _r: &Path) -> bool {
            false
        }
        fn rebase_abort(&self, _r: &Path) -> Result<()> {
            Ok(())
        }
        fn index_is_corrupt(&self, _r: &Path) -> bool {
            false
        }
        fn repair_index(&self, _r: &Path) -> Result<()> {
            Ok(())
        }
        fn merge(&self, _r: &Path, _b: &str) -> Result<MergeOutcome> {
            let mut outcomes = self.merge_outcomes.lock().unwrap();
            Ok(outcomes.pop().unwrap_or(MergeOutcome::Conflict))
        }
        fn rebase_onto(&self, _r: &Path, _b: &str, _o: &str) -> Result<MergeOutcome> {
            Ok(MergeOutcome::Merged)
        }
        fn upstream_commit(&self, _r: &Path) -> Result<Option<String>> {
            Ok(None)
        }
    }

    fn sample_request() -> MergeRequest {
        let issue = Issue {
            id: "BUG-001".to_string(),
            category: Category::Bugs,
            priority: Priority(2),
            title: "Fix the thing".to_string(),
            path: PathBuf::from("bugs/P2-BUG-001-fix-the-thing.md"),
            blocked_by: BTreeSet::new(),
        };
        let result = WorkerResult::success(
            issue,
            "parallel/BUG-001-fix-the-thing".to_string(),
            PathBuf::from("/tmp/worktree"),
            vec!["src/lib.rs".to_string()],
            Vec::new(),
            StdDuration::from_secs(1),
            String::new(),
            String::new(),
            false,
        );
        MergeRequest::new(result)
    }

    fn config() -> CoordinatorConfig {
        CoordinatorConfig {
            repo_root: PathBuf::from("/tmp/repo"),
            issues_base_dir: PathBuf::from("/tmp/repo/issues"),
            base_branch: "main".to_string(),
            max_merge_retries: 3,
            pull_strategy: PullStrategy::Rebase,
            circuit_breaker_failure_threshold: 3,
            circuit_breaker_cooldown_secs: 30,
        }
    }

    fn completed_results(coordinator: &mut MergeCoordinator<FakeGit>, requests: Receiver<MergeRequest>) -> Vec<MergeResult> {
        let mut results = Vec::new();
        coordinator.run(requests, |event| {
            if let MergeEvent::Completed(r) = event {
                results.push(r);
            }
        });
        results
    }

    #[test]
    fn clean_merge_succeeds_with_zero_retries() {
        let mut coordinator = MergeCoordinator::new(FakeGit::always_merges(), config(), Arc::new(GitLock::default()));
        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(sample_request()).unwrap();
        drop(tx);

        let results = completed_results(&mut coordinator, rx);

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, MergeStatus::Success);
        assert_eq!(results[0].retry_count, 0);
    }

    #[test]
    fn conflict_resolves_after_rebase_retry() {
        let mut coordinator = MergeCoordinator::new(FakeGit::conflicts_then_merges(2), config(), Arc::new(GitLock::default()));
        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(sample_request()).unwrap();
        drop(tx);

        let results = completed_results(&mut coordinator, rx);

        assert_eq!(results[0].status, MergeStatus::Success);
        assert_eq!(results[0].retry_count, 2);
    }

    #[test]
    fn unresolvable_conflict_fails_after_max_retries() {
        let mut coordinator = MergeCoordinator::new(FakeGit::always_conflicts(), config(), Arc::new(GitLock::default()));
        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(sample_request()).unwrap();
        drop(tx);

        let results = completed_results(&mut coordinator, rx);

        assert_eq!(results[0].status, MergeStatus::Failed);
        assert!(matches!(
            results[0].error,
            Some(MergeFailureKind::ConflictUnresolvable(_))
        ));
    }

    #[test]
    fn circuit_breaker_skips_requests_after_repeated_failures() {
        let mut coordinator = MergeCoordinator::new(FakeGit::always_conflicts(), config(), Arc::new(GitLock::default()));
        let (tx, rx) = crossbeam_channel::unbounded();
        for _ in 0..4 {
            tx.send(sample_request()).unwrap();
        }
        drop(tx);

        let results = completed_results(&mut coordinator, rx);

        assert_eq!(results.len(), 4);
        assert_eq!(results[3].error, Some(MergeFailureKind::MergeCancelled));
    }

    #[test]
    fn dispatched_event_fires_before_completed_event() {
        let mut coordinator = MergeCoordinator::new(FakeGit::always_merges(), config(), Arc::new(GitLock::default()));
        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(sample_request()).unwrap();
        drop(tx);

        let mut saw_dispatch_first = false;
        let mut dispatched = false;
        coordinator.run(rx, |event| match event {
            MergeEvent::Dispatched(record) => {
                assert_eq!(record.issue_id, "BUG-001");
                dispatched = true;
            }
            MergeEvent::Completed(_) => {
                saw_dispatch_first = dispatched;
            }
        });

        assert!(saw_dispatch_first);
    }

    #[test]
    fn issue_tree_dirty_files_are_auto_committed_not_stashed() {
        struct RecordingGit {
            inner: FakeGit,
            committed_paths: Mutex<Vec<String>>,
            stash_calls: Mutex<u32>,
        }
        impl GitOps for RecordingGit {
            fn trunk_branch(&self, r: &Path) -> Result<String> {
                self.inner.trunk_branch(r)
            }
            fn worktree_add(&self, r: &Path, p: &Path, b: &str, base: &str) -> Result<()> {
                self.inner.worktree_add(r, p, b, base)
            }
            fn worktree_remove(&self, r: &Path, p: &Path) -> Result<()> {
                self.inner.worktree_remove(r, p)
            }
            fn branch_delete(&self, r: &Path, b: &str) -> Result<()> {
                self.inner.branch_delete(r, b)
            }
            fn diff_files(&self, r: &Path, base: &str, b: &str) -> Result<Vec<String>> {
                self.inner.diff_files(r, base, b)
            }
            fn dirty_tracked_files(&self, _r: &Path) -> Result<Vec<String>> {
                Ok(vec!["issues/bugs/P2-BUG-001-x.md".to_string(), "src/scratch.rs".to_string()])
            }
            fn untracked_files(&self, r: &Path) -> Result<Vec<String>> {
                self.inner.untracked_files(r)
            }
            fn commit_all(&self, _r: &Path, paths: &[String], _m: &str) -> Result<()> {
                self.committed_paths.lock().unwrap().extend(paths.iter().cloned());
                Ok(())
            }
            fn stash_push(&self, r: &Path, m: &str) -> Result<StashHandle> {
                *self.stash_calls.lock().unwrap() += 1;
                self.inner.stash_push(r, m)
            }
            fn stash_pop(&self, r: &Path, h: &StashHandle) -> Result<()> {
                self.inner.stash_pop(r, h)
            }
            fn pull(&self, r: &Path, s: PullStrategy) -> Result<PullOutcome> {
                self.inner.pull(r, s)
            }
            fn rebase_in_progress(&self, r: &Path) -> bool {
                self.inner.rebase_in_progress(r)
            }
            fn rebase_abort(&self, r: &Path) -> Result<()> {
                self.inner.rebase_abort(r)
            }
            fn index_is_corrupt(&self, r: &Path) -> bool {
                self.inner.index_is_corrupt(r)
            }
            fn repair_index(&self, r: &Path) -> Result<()> {
                self.inner.repair_index(r)
            }
            fn merge(&self, r: &Path, b: &str) -> Result<MergeOutcome> {
                self.inner.merge(r, b)
            }
            fn rebase_onto(&self, r: &Path, b: &str, o: &str) -> Result<MergeOutcome> {
                self.inner.rebase_onto(r, b, o)
            }
            fn upstream_commit(&self, r: &Path) -> Result<Option<String>> {
                self.inner.upstream_commit(r)
            }
        }

        let git = RecordingGit {
            inner: FakeGit::always_merges(),
            committed_paths: Mutex::new(Vec::new()),
            stash_calls: Mutex::new(0),
        };

        let mut cfg = config();
        cfg.issues_base_dir = cfg.repo_root.join("issues");
        let mut coordinator = MergeCoordinator::new(git, cfg, Arc::new(GitLock::default()));
        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(sample_request()).unwrap();
        drop(tx);

        let results = completed_results(&mut coordinator, rx);

        assert_eq!(results[0].status, MergeStatus::Success);
        assert_eq!(
            *coordinator.git.committed_paths.lock().unwrap(),
            vec!["issues/bugs/P2-BUG-001-x.md".to_string()]
        );
        assert_eq!(*coordinator.git.stash_calls.lock().unwrap(), 1);
    }
}
