//! Semantic conflict analysis.
//!
//! Pure functions over issue text, no I/O — the same shape as
//! `issue::parse_issue_content` and `graph::check_acyclic`: the sprint
//! planner calls these to decide whether two issues sharing a referenced
//! file are safe to run in parallel.

use std::collections::BTreeSet;

use regex::Regex;

const UI_REGION_KEYWORDS: &[&str] = &["header", "body", "sidebar", "footer", "card", "modal", "form"];

/// Coarse classification of what kind of change an issue body describes.
/// Ordering matters: it defines the tie-break when two conflicting issues
/// share a priority tier (structural → infrastructure → enhancement).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ModificationType {
    Structural,
    Infrastructure,
    Enhancement,
}

/// Threshold at or above which a pair of issues is treated as ordering-
/// dependent rather than parallel-safe.
pub const CONFLICT_THRESHOLD: f64 = 0.4;

/// Extracted signals used by conflict scoring: symbol names, explicit file
/// references, UI-region keywords mentioned, and the issue's modification
/// type.
#[derive(Debug, Clone)]
pub struct ConflictProfile {
    pub symbols: BTreeSet<String>,
    pub file_refs: BTreeSet<String>,
    pub ui_regions: BTreeSet<String>,
    pub modification_type: ModificationType,
}

fn symbol_regex() -> Regex {
    Regex::new(r"\b[A-Z][a-zA-Z0-9]*[a-z][A-Za-z0-9]*\b").expect("valid regex")
}

fn file_ref_regex() -> Regex {
    Regex::new(r"\b[\w./-]+\.(rs|toml|ts|tsx|js|jsx|py|go|md)\b").expect("valid regex")
}

/// Extract a conflict profile from an issue's raw body text.
pub fn extract_profile(body: &str) -> ConflictProfile {
    let symbols = symbol_regex()
        .find_iter(body)
        .map(|m| m.as_str().to_string())
        .collect();

    let file_refs = file_ref_regex()
        .find_iter(body)
        .map(|m| m.as_str().to_string())
        .collect();

    let lower = body.to_ascii_lowercase();
    let ui_regions = UI_REGION_KEYWORDS
        .iter()
        .filter(|kw| lower.contains(*kw))
        .map(|kw| kw.to_string())
        .collect();

    ConflictProfile {
        symbols,
        file_refs,
        ui_regions,
        modification_type: classify_modification_type(&lower),
    }
}

fn classify_modification_type(lower_body: &str) -> ModificationType {
    const STRUCTURAL: &[&str] = &["refactor", "restructure", "rearchitect", "rename module", "move file"];
    const INFRASTRUCTURE: &[&str] = &["ci", "pipeline", "deploy", "docker", "build script", "dependency upgrade"];

    if STRUCTURAL.iter().any(|kw| lower_body.contains(kw)) {
        ModificationType::Structural
    } else if INFRASTRUCTURE.iter().any(|kw| lower_body.contains(kw)) {
        ModificationType::Infrastructure
    } else {
        ModificationType::Enhancement
    }
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Combined symbol-and-scope-token set used for the semantic-target overlap
/// term: both class/function-style identifiers and explicit file references
/// count as "targets" a change touches.
fn targets(profile: &ConflictProfile) -> BTreeSet<String> {
    profile.symbols.union(&profile.file_refs).cloned().collect()
}

/// Compute the conflict score in `[0, 1]` for a pair of issue profiles
/// that are already known to share at least one file reference.
pub fn conflict_score(a: &ConflictProfile, b: &ConflictProfile) -> f64 {
    let semantic_overlap = jaccard(&targets(a), &targets(b));

    let section_overlap = if !a.ui_regions.is_disjoint(&b.ui_regions) {
        1.0
    } else {
        0.0
    };

    let type_match = if a.modification_type == b.modification_type {
        1.0
    } else {
        0.0
    };

    0.5 * semantic_overlap + 0.3 * section_overlap + 0.2 * type_match
}

/// Whether two issues sharing a file reference contend with each other
/// (score at or above the threshold).
pub fn contends(a: &ConflictProfile, b: &ConflictProfile) -> bool {
    !a.file_refs.is_disjoint(&b.file_refs) && conflict_score(a, b) >= CONFLICT_THRESHOLD
}
