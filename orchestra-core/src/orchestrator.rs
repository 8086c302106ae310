//! Top-level run loop.
//!
//! `Orchestrator<G, A>` owns every other component's lifecycle for a whole
//! multi-wave run: scan issues, compute waves, drain each wave's P0
//! sub-wave sequentially then its parallel sub-wave concurrently,
//! checkpoint, and finally retry any merge-cancelled or
//! conflict-unresolvable issues with a single worker.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};

use crate::config::Config;
use crate::error::FailureKind;
use crate::git::GitOps;
use crate::graph::DependencyGraph;
use crate::issue::{self, Issue};
use crate::lock::GitLock;
use crate::merge::coordinator::{CoordinatorConfig, MergeCoordinator, MergeEvent, MergeResult};
use crate::merge::MergeStatus;
use crate::queue::PriorityQueue;
use crate::sprint::wave_planner::{self, SubWave};
use crate::state::{self, ProcessingState};
use crate::worker::agent::AgentRunner;
use crate::worker::pool::{PoolConfig, WorkerPool};

/// Final summary printed at the end of a run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub completed: Vec<String>,
    pub failed: BTreeMap<String, String>,
    pub interrupted: bool,
}

pub struct Orchestrator<G, A> {
    git: G,
    agent: A,
    config: Config,
    repo_root: PathBuf,
    shutdown: crate::signals::ShutdownSignal,
    git_lock: Arc<GitLock>,
}

impl<G, A> Orchestrator<G, A>
where
    G: GitOps + Clone + 'static,
    A: AgentRunner + Clone + 'static,
{
    pub fn new(git: G, agent: A, config: Config, repo_root: PathBuf, shutdown: crate::signals::ShutdownSignal) -> Self {
        Self {
            git,
            agent,
            config,
            repo_root,
            shutdown,
            git_lock: Arc::new(GitLock::default()),
        }
    }

    fn state_path(&self) -> PathBuf {
        self.repo_root.join(&self.config.automation.state_file)
    }

    fn pool_config(&self, parallelism: usize, base_branch: &str) -> PoolConfig {
        let mut pc = PoolConfig::new(
            self.repo_root.clone(),
            self.repo_root.join(&self.config.parallel.worktree_base_dir),
            base_branch.to_string(),
        );
        pc.parallelism = parallelism.max(1);
        pc.allow_list = self.config.parallel.allow_list.clone();
        pc.readiness_timeout = self.config.parallel.readiness_timeout();
        pc.implementation_timeout = self.config.parallel.implementation_timeout();
        pc.handoff_cap = self.config.parallel.handoff_cap;
        pc.require_code_changes = self.config.parallel.require_code_changes;
        pc.issues_base_dir = self.config.automation.issues_base_dir.clone();
        pc
    }

    fn coordinator_config(&self, base_branch: &str) -> CoordinatorConfig {
        CoordinatorConfig {
            repo_root: self.repo_root.clone(),
            issues_base_dir: self.repo_root.join(&self.config.automation.issues_base_dir),
            base_branch: base_branch.to_string(),
            max_merge_retries: self.config.parallel.max_merge_retries,
            pull_strategy: self.config.parallel.pull_strategy,
            circuit_breaker_failure_threshold: self.config.parallel.circuit_breaker_failure_threshold,
            circuit_breaker_cooldown_secs: self.config.parallel.circuit_breaker_cooldown_secs,
        }
    }

    /// Run the full orchestration loop and return a summary.
    pub fn run(&self) -> Result<RunSummary> {
        let state_path = self.state_path();
        let mut state = if self.config.automation.resume {
            state::load(&state_path)?.unwrap_or_else(ProcessingState::fresh)
        } else {
            ProcessingState::fresh()
        };

        let base_branch = match &self.config.automation.base_branch {
            Some(b) => b.clone(),
            None => self.git.trunk_branch(&self.repo_root)?,
        };

        let issues_dir = self.repo_root.join(&self.config.automation.issues_base_dir);
        let (issues, completed_ids) = issue::scan_issues(&issues_dir)?;
        let issues = self.apply_issue_filters(issues);

        let mut all_completed = completed_ids;
        all_completed.extend(state.completed.iter().cloned());

        let graph = DependencyGraph::build(issues, &all_completed)
            .context("building dependency graph")?;
        let waves = graph.waves();

        if self.config.automation.dry_run {
            self.print_planned_waves(&waves);
            return Ok(RunSummary::default());
        }

        let mut coordinator = MergeCoordinator::new(
            self.git.clone(),
            self.coordinator_config(&base_branch),
            Arc::clone(&self.git_lock),
        );

        for (wave_idx, wave) in waves.iter().enumerate() {
            if self.shutdown.is_requested() {
                warn!("shutdown requested before wave {wave_idx}, stopping");
                break;
            }

            let (p0, rest): (Vec<Issue>, Vec<Issue>) =
                wave.iter().cloned().partition(|issue| issue.priority.is_p0());

            self.run_sequential(&p0, &base_branch, &mut state, &mut coordinator);
            if self.shutdown.is_requested() {
                break;
            }
            if self.config.automation.sprint_mode && self.config.sprint.enable_file_contention_splitting {
                self.run_sprint_wave(&rest, &issues_dir, &base_branch, &mut state, &mut coordinator);
            } else {
                self.run_sub_wave(&rest, self.config.parallel.max_workers, &base_branch, &mut state, &mut coordinator);
            }

            state::save(&state_path, &state)?;
            info!("checkpointed after wave {wave_idx}");
        }

        if !self.shutdown.is_requested() {
            self.retry_cancelled_merges(&mut state, &base_branch, &mut coordinator);
        }

        if self.shutdown.is_requested() {
            for id in issue_ids_still_running(&state) {
                state.mark_failed(&id, &FailureKind::Interrupted);
            }
        }

        state::save(&state_path, &state)?;

        Ok(RunSummary {
            completed: state.completed.clone(),
            failed: state.failed.clone(),
            interrupted: self.shutdown.is_requested(),
        })
    }

    fn apply_issue_filters(&self, issues: Vec<Issue>) -> Vec<Issue> {
        filter_issues(issues, &self.config.automation)
    }

    /// Print the planned waves and their issues without touching git or
    /// spawning any agent process (`--dry-run`).
    fn print_planned_waves(&self, waves: &[Vec<Issue>]) {
        info!("dry run: {} wave(s) planned", waves.len());
        for (wave_idx, wave) in waves.iter().enumerate() {
            let ids: Vec<&str> = wave.iter().map(|issue| issue.id.as_str()).collect();
            info!("wave {wave_idx}: {}", ids.join(", "));
        }
    }

    fn run_sub_wave(
        &self,
        issues: &[Issue],
        parallelism: usize,
        base_branch: &str,
        state: &mut ProcessingState,
        coordinator: &mut MergeCoordinator<G>,
    ) {
        if issues.is_empty() {
            return;
        }
        for issue in issues {
            state.mark_in_progress(&issue.id);
        }

        let queue = Arc::new(PriorityQueue::default());
        queue.add_many(issues.to_vec());

        let pool = WorkerPool::new(
            self.git.clone(),
            self.agent.clone(),
            self.pool_config(parallelism, base_branch),
            Arc::clone(&self.git_lock),
        );
        let (tx, rx) = crossbeam_channel::unbounded();

        pool.run(Arc::clone(&queue), tx.clone());
        drop(tx);

        coordinator.run(rx, |event: MergeEvent| apply_merge_event(state, event));
    }

    /// Run `issues` one at a time, each through its own single-worker pool,
    /// synchronously merging before moving on to the next — so the next
    /// issue's worktree never branches off trunk before the previous one has
    /// actually landed. Used for P0 issues and the merge-cancelled retry
    /// pass, where strict ordering matters more than throughput.
    fn run_sequential(
        &self,
        issues: &[Issue],
        base_branch: &str,
        state: &mut ProcessingState,
        coordinator: &mut MergeCoordinator<G>,
    ) {
        if issues.is_empty() {
            return;
        }
        for issue in issues {
            state.mark_in_progress(&issue.id);
        }

        for issue in issues {
            if self.shutdown.is_requested() {
                break;
            }

            let queue = Arc::new(PriorityQueue::default());
            queue.add_many(vec![issue.clone()]);

            let pool = WorkerPool::new(
                self.git.clone(),
                self.agent.clone(),
                self.pool_config(1, base_branch),
                Arc::clone(&self.git_lock),
            );
            let (tx, rx) = crossbeam_channel::unbounded();

            pool.run(Arc::clone(&queue), tx.clone());
            drop(tx);

            coordinator.run(rx, |event: MergeEvent| apply_merge_event(state, event));
        }
    }

    /// Sprint mode: split `issues` into file-contention
    /// sub-waves and run each sub-wave through its own single-worker pool,
    /// up to `max_workers` sub-waves concurrently. Issues inside a sub-wave
    /// share a contended file and are forced to run one at a time; distinct
    /// sub-waves share no file and run in parallel with each other.
    fn run_sprint_wave(
        &self,
        issues: &[Issue],
        issues_dir: &Path,
        base_branch: &str,
        state: &mut ProcessingState,
        coordinator: &mut MergeCoordinator<G>,
    ) {
        if issues.is_empty() {
            return;
        }
        for issue in issues {
            state.mark_in_progress(&issue.id);
        }

        let sub_waves: Vec<SubWave> = wave_planner::split_by_file_contention(issues, |id| {
            issues
                .iter()
                .find(|i| i.id == id)
                .and_then(|i| fs::read_to_string(issues_dir.join(&i.path)).ok())
                .unwrap_or_default()
        });
        info!(
            "sprint mode: {} issue(s) split into {} file-contention sub-wave(s)",
            issues.len(),
            sub_waves.len()
        );

        let (tx, rx) = crossbeam_channel::unbounded();
        let max_concurrent = self.config.parallel.max_workers.max(1);
        let indexed: Vec<(usize, &SubWave)> = sub_waves.iter().enumerate().collect();

        for batch in indexed.chunks(max_concurrent) {
            std::thread::scope(|scope| {
                for (global_idx, sub_wave) in batch.iter().copied() {
                    let mut pc = self.pool_config(1, base_branch);
                    pc.worktrees_dir = pc.worktrees_dir.join(format!("sprint-{global_idx}"));
                    let pool = WorkerPool::new(self.git.clone(), self.agent.clone(), pc, Arc::clone(&self.git_lock));
                    let queue = Arc::new(PriorityQueue::default());
                    queue.add_many(sub_wave.issues.clone());
                    let tx = tx.clone();
                    scope.spawn(move || {
                        pool.run(queue, tx);
                    });
                }
            });
        }
        drop(tx);

        coordinator.run(rx, |event: MergeEvent| apply_merge_event(state, event));
    }

    fn retry_cancelled_merges(
        &self,
        state: &mut ProcessingState,
        base_branch: &str,
        coordinator: &mut MergeCoordinator<G>,
    ) {
        let retryable: Vec<String> = state
            .failed
            .iter()
            .filter(|(_, reason)| reason.as_str() == "merge_cancelled" || reason.as_str() == "conflict_unresolvable")
            .map(|(id, _)| id.clone())
            .collect();

        if retryable.is_empty() {
            return;
        }
        info!("retrying {} issue(s) after merge_cancelled/conflict_unresolvable", retryable.len());

        let issues_dir = self.repo_root.join(&self.config.automation.issues_base_dir);
        let Ok((all_issues, _)) = issue::scan_issues(&issues_dir) else {
            warn!("failed to re-scan issues tree for retry pass");
            return;
        };
        let to_retry: Vec<Issue> = all_issues
            .into_iter()
            .filter(|issue| retryable.contains(&issue.id))
            .collect();

        for id in &retryable {
            state.failed.remove(id);
        }

        self.run_sequential(&to_retry, base_branch, state, coordinator);
    }
}

fn apply_merge_event(state: &mut ProcessingState, event: MergeEvent) {
    match event {
        MergeEvent::Dispatched(record) => state.pending_merges.push(record),
        MergeEvent::Completed(result) => {
            state.pending_merges.retain(|r| r.issue_id != result.issue_id);
            apply_merge_result(state, result);
        }
    }
}

fn apply_merge_result(state: &mut ProcessingState, result: MergeResult) {
    match result.status {
        MergeStatus::Success => {
            state.mark_completed(&result.issue_id);
        }
        _ => {
            let reason = result
                .reason_code()
                .map(|r| r.to_string())
                .unwrap_or_else(|| "merge_failed".to_string());
            state.failed.insert(result.issue_id.clone(), reason);
            state.in_progress.remove(&result.issue_id);
        }
    }
}

fn issue_ids_still_running(state: &ProcessingState) -> Vec<String> {
    state.in_progress.iter().cloned().collect()
}

/// Apply `--only`/`--skip`/`--include-p0` to the full scanned issue list.
/// `only` (if non-empty) keeps just the named ids, plus every P0 issue when
/// `include_p0` is set; `skip` then removes any named id from whatever
/// remains.
fn filter_issues(issues: Vec<Issue>, automation: &crate::config::AutomationConfig) -> Vec<Issue> {
    let mut filtered = if automation.only.is_empty() {
        issues
    } else {
        issues
            .into_iter()
            .filter(|issue| automation.only.contains(&issue.id) || (automation.include_p0 && issue.priority.is_p0()))
            .collect()
    };
    if !automation.skip.is_empty() {
        filtered.retain(|issue| !automation.skip.contains(&issue.id));
    }
    filtered
}

/// Remove stale worktree directories and prune orphaned local branches left
/// over from a prior crashed run.
pub fn cleanup_stale_worktrees(worktrees_dir: &std::path::Path) -> Result<()> {
    if !worktrees_dir.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(worktrees_dir)? {
        let entry = entry?;
        if entry.path().is_dir() {
            fs::remove_dir_all(entry.path())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AutomationConfig;
    use crate::issue::{Category, Priority};
    use std::collections::BTreeSet;

    fn issue(id: &str, priority: u8) -> Issue {
        Issue {
            id: id.to_string(),
            category: Category::Bugs,
            priority: Priority(priority),
            title: id.to_string(),
            path: PathBuf::from(format!("bugs/P{priority}-{id}-x.md")),
            blocked_by: BTreeSet::new(),
        }
    }

    #[test]
    fn no_filters_returns_all_issues() {
        let automation = AutomationConfig::default();
        let issues = vec![issue("BUG-001", 1), issue("BUG-002", 2)];
        let filtered = filter_issues(issues, &automation);
        assert_eq!(filtered.len(), 2);
    }

    #[test]
    fn only_restricts_to_named_ids() {
        let mut automation = AutomationConfig::default();
        automation.only = vec!["BUG-002".to_string()];
        let issues = vec![issue("BUG-001", 1), issue("BUG-002", 2), issue("BUG-003", 3)];
        let filtered = filter_issues(issues, &automation);
        assert_eq!(filtered.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(), vec!["BUG-002"]);
    }

    #[test]
    fn only_with_include_p0_keeps_p0_issues_too() {
        let mut automation = AutomationConfig::default();
        automation.only = vec!["BUG-002".to_string()];
        automation.include_p0 = true;
        let issues = vec![issue("BUG-001", 0), issue("BUG-002", 2), issue("BUG-003", 3)];
        let filtered = filter_issues(issues, &automation);
        let ids: BTreeSet<&str> = filtered.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, BTreeSet::from(["BUG-001", "BUG-002"]));
    }

    #[test]
    fn skip_removes_named_ids_after_only() {
        let mut automation = AutomationConfig::default();
        automation.skip = vec!["BUG-002".to_string()];
        let issues = vec![issue("BUG-001", 1), issue("BUG-002", 2)];
        let filtered = filter_issues(issues, &automation);
        assert_eq!(filtered.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(), vec!["BUG-001"]);
    }
}
