//! Crash-recoverable processing state.
//!
//! Persisted as JSON with atomic write (temp file + rename). Every field is
//! rebuilt from owned, freshly-allocated collections on load — `load` never
//! aliases the on-disk JSON value's buffers — so two independently loaded
//! `ProcessingState`s never share mutable state.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FailureKind;
use crate::merge::MergeRequestRecord;

/// Schema version written to the state file. Not yet interpreted on load —
/// a forward-compatibility placeholder.
pub const SCHEMA_VERSION: u32 = 1;

/// Per-issue phase durations, in milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhaseTiming {
    pub ready_ms: Option<u64>,
    pub implement_ms: Option<u64>,
    pub merge_ms: Option<u64>,
}

/// Crash-recoverable processing state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessingState {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub in_progress: HashSet<String>,
    pub completed: Vec<String>,
    pub failed: BTreeMap<String, String>,
    pub pending_merges: Vec<MergeRequestRecord>,
    pub timing: BTreeMap<String, PhaseTiming>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_checkpoint: Option<DateTime<Utc>>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl ProcessingState {
    pub fn fresh() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Record an issue leaving the queue and starting work.
    pub fn mark_in_progress(&mut self, id: &str) {
        self.in_progress.insert(id.to_string());
        self.checkpoint();
    }

    /// Move an issue from in-progress to completed, preserving order.
    pub fn mark_completed(&mut self, id: &str) {
        self.in_progress.remove(id);
        if !self.completed.contains(&id.to_string()) {
            self.completed.push(id.to_string());
        }
        self.checkpoint();
    }

    /// Move an issue from in-progress to failed with a reason.
    pub fn mark_failed(&mut self, id: &str, reason: &FailureKind) {
        self.in_progress.remove(id);
        self.failed.insert(id.to_string(), reason.reason_code().to_string());
        self.checkpoint();
    }

    /// Invariant check: no issue is both in-progress and completed.
    pub fn invariants_hold(&self) -> bool {
        self.in_progress
            .iter()
            .all(|id| !self.completed.contains(id))
    }

    fn checkpoint(&mut self) {
        self.last_checkpoint = Some(Utc::now());
    }
}

/// Load state from `path`, deep-copying every field into fresh allocations.
/// Returns `None` if the file does not exist (a fresh run).
pub fn load(path: &Path) -> Result<Option<ProcessingState>> {
    match fs::read_to_string(path) {
        Ok(contents) => {
            let state: ProcessingState = serde_json::from_str(&contents)
                .with_context(|| format!("parsing state file {}", path.display()))?;
            // Round-trip through an owned clone to guarantee no buffer in
            // the deserializer's arena is aliased by the returned value.
            Ok(Some(state.clone()))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("reading state file {}", path.display())),
    }
}

/// Persist `state` to `path` atomically (write to temp file, then rename).
pub fn save(path: &Path, state: &ProcessingState) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);
    let json = serde_json::to_string_pretty(state)?;
    let mut f = fs::File::create(&tmp)?;
    f.write_all(json.as_bytes())?;
    f.sync_all()?;
    fs::rename(&tmp, path)
        .with_context(|| format!("renaming {} to {}", tmp.display(), path.display()))?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
