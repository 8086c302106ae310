//! Structured error/failure taxonomy.
//!
//! `anyhow::Error` is used at I/O boundaries throughout this crate. These
//! enums exist for the places calling code needs to match on a closed set
//! of reasons — per-issue and per-merge failure kinds — rather than opaque
//! error text.

/// Why a worker failed to produce a usable result for an issue.
///
/// Recorded verbatim in `ProcessingState::failed` and in `WorkerResult`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailureKind {
    #[error("agent timed out after {0}s")]
    Timeout(u64),
    #[error("agent exited with non-zero status {0}")]
    AgentNonzeroExit(i32),
    #[error("readiness verdict was not ready: {0:?}")]
    VerdictNotReady(crate::worker::verdict::Verdict),
    #[error("no files changed outside the issues tree")]
    NoCodeChanges,
    #[error("context handoff cap ({0}) exceeded")]
    HandoffCapExceeded(u32),
    #[error("worktree/branch setup failed: {0}")]
    SetupFailed(String),
    #[error("interrupted by shutdown signal")]
    Interrupted,
}

impl FailureKind {
    /// The stable reason string persisted to `ProcessingState` and the
    /// final summary table.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::AgentNonzeroExit(_) => "agent_nonzero_exit",
            Self::VerdictNotReady(_) => "verdict_not_ready",
            Self::NoCodeChanges => "no_code_changes",
            Self::HandoffCapExceeded(_) => "handoff_cap_exceeded",
            Self::SetupFailed(_) => "setup_failed",
            Self::Interrupted => "interrupted",
        }
    }
}

/// Why a merge request failed to integrate into trunk.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeFailureKind {
    #[error("conflict unresolvable after {0} retries")]
    ConflictUnresolvable(u32),
    #[error("pull from trunk failed: {0}")]
    PullFailed(String),
    #[error("stash operation failed: {0}")]
    StashFailed(String),
    #[error("index corruption could not be repaired")]
    IndexCorruptUnrecoverable,
    #[error("worktree removal failed: {0}")]
    WorktreeRemovalFailed(String),
    #[error("merge cancelled at shutdown")]
    MergeCancelled,
}

impl MergeFailureKind {
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::ConflictUnresolvable(_) => "conflict_unresolvable",
            Self::PullFailed(_) => "pull_failed",
            Self::StashFailed(_) => "stash_failed",
            Self::IndexCorruptUnrecoverable => "index_corrupt_unrecoverable",
            Self::WorktreeRemovalFailed(_) => "worktree_removal_failed",
            Self::MergeCancelled => "merge_cancelled",
        }
    }

    /// Worktree removal failure is a warning, not a merge failure.
    pub fn is_fatal_to_merge(&self) -> bool {
        !matches!(self, Self::WorktreeRemovalFailed(_))
    }
}

/// Run-scoped errors that pause or abort the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("dependency cycle detected: {0}")]
    DependencyCycle(String),
    #[error("merge circuit breaker tripped after {0} consecutive failures")]
    CircuitBreakerTripped(u32),
    #[error("state file corrupt: {0}")]
    StateCorrupt(String),
    #[error("duplicate issue id across issues tree: {0}")]
    DuplicateIssueId(String),
}
