//! Statically-typed configuration: one explicit record per concern rather
//! than a generic key/value map threaded through every component.
//!
//! Loaded from a JSON file with `serde_json`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::git::PullStrategy;

/// Worker-pool and merge-coordinator tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ParallelConfig {
    pub max_workers: usize,
    pub readiness_timeout_secs: u64,
    pub implementation_timeout_secs: u64,
    pub handoff_cap: u32,
    pub max_merge_retries: u32,
    pub allow_list: Vec<String>,
    pub worktree_base_dir: String,
    pub require_code_changes: bool,
    #[serde(with = "pull_strategy_serde")]
    pub pull_strategy: PullStrategy,
    pub circuit_breaker_failure_threshold: u32,
    pub circuit_breaker_cooldown_secs: u64,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            readiness_timeout_secs: 600,
            implementation_timeout_secs: 3600,
            handoff_cap: 3,
            max_merge_retries: 3,
            allow_list: Vec::new(),
            worktree_base_dir: ".orchestra/worktrees".to_string(),
            require_code_changes: true,
            pull_strategy: PullStrategy::Rebase,
            circuit_breaker_failure_threshold: 3,
            circuit_breaker_cooldown_secs: 30,
        }
    }
}

impl ParallelConfig {
    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }

    pub fn implementation_timeout(&self) -> Duration {
        Duration::from_secs(self.implementation_timeout_secs)
    }

    pub fn circuit_breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.circuit_breaker_cooldown_secs)
    }
}

mod pull_strategy_serde {
    use super::PullStrategy;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &PullStrategy, s: S) -> Result<S::Ok, S::Error> {
        let text = match value {
            PullStrategy::Rebase => "rebase",
            PullStrategy::Merge => "merge",
        };
        s.serialize_str(text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<PullStrategy, D::Error> {
        let s = String::deserialize(d)?;
        match s.as_str() {
            "rebase" => Ok(PullStrategy::Rebase),
            "merge" => Ok(PullStrategy::Merge),
            other => Err(serde::de::Error::custom(format!("unknown pull strategy: {other}"))),
        }
    }
}

/// Sprint-mode wave planning tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SprintConfig {
    pub conflict_threshold: f64,
    pub enable_file_contention_splitting: bool,
}

impl Default for SprintConfig {
    fn default() -> Self {
        Self {
            conflict_threshold: crate::sprint::conflict::CONFLICT_THRESHOLD,
            enable_file_contention_splitting: true,
        }
    }
}

/// Top-level automation mode selection and issue-tree location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AutomationConfig {
    pub issues_base_dir: String,
    pub base_branch: Option<String>,
    pub state_file: String,
    pub dry_run: bool,
    pub resume: bool,
    /// Selects sprint mode: non-P0 waves are further split into file-
    /// contention sub-waves instead of running flat.
    pub sprint_mode: bool,
    /// Restrict the run to these issue ids. Empty means no restriction.
    /// Per-run, never persisted to a config file.
    #[serde(skip)]
    pub only: Vec<String>,
    /// Exclude these issue ids from the run, applied after `only`.
    #[serde(skip)]
    pub skip: Vec<String>,
    /// When `only` is non-empty, keep P0 issues regardless of whether
    /// they're named in `only`.
    #[serde(skip)]
    pub include_p0: bool,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            issues_base_dir: "issues".to_string(),
            base_branch: None,
            state_file: ".orchestra/state.json".to_string(),
            dry_run: false,
            resume: false,
            sprint_mode: false,
            only: Vec::new(),
            skip: Vec::new(),
            include_p0: false,
        }
    }
}

/// The full, statically-typed configuration record.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub parallel: ParallelConfig,
    pub sprint: SprintConfig,
    pub automation: AutomationConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        serde_json::from_str(&contents).with_context(|| format!("parsing config file {}", path.display()))
    }
}
