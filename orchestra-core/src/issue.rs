//! Issue data model and file parsing.
//!
//! Issues are immutable inputs discovered by scanning category
//! subdirectories under a configured base directory. Parsing is split into
//! a pure function (`parse_issue_content`) and a filesystem-walking scan
//! (`scan_issues`), keeping pure parsing separate from I/O.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use regex::Regex;

/// Category an issue belongs to, derived from its containing directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Bugs,
    Features,
    Enhancements,
}

impl Category {
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Bugs => "bugs",
            Self::Features => "features",
            Self::Enhancements => "enhancements",
        }
    }

    fn from_dir_name(name: &str) -> Option<Self> {
        match name {
            "bugs" => Some(Self::Bugs),
            "features" => Some(Self::Features),
            "enhancements" => Some(Self::Enhancements),
            _ => None,
        }
    }

    /// Category implied by an identifier prefix (`BUG-017` -> `Bugs`).
    fn from_id_prefix(id: &str) -> Option<Self> {
        if id.starts_with("BUG-") {
            Some(Self::Bugs)
        } else if id.starts_with("FEAT-") {
            Some(Self::Features)
        } else if id.starts_with("ENH-") {
            Some(Self::Enhancements)
        } else {
            None
        }
    }
}

/// Priority tier, `P0` (highest) through `P5` (lowest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub u8);

impl Priority {
    pub const P0: Priority = Priority(0);

    pub fn is_p0(self) -> bool {
        self.0 == 0
    }

    fn parse(s: &str) -> Option<Self> {
        let n: u8 = s.strip_prefix('P')?.parse().ok()?;
        (n <= 5).then_some(Priority(n))
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// A single work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub id: String,
    pub category: Category,
    pub priority: Priority,
    pub title: String,
    pub path: PathBuf,
    pub blocked_by: BTreeSet<String>,
}

impl Issue {
    /// Deterministic ephemeral branch name for this issue.
    pub fn branch_name(&self) -> String {
        format!("parallel/{}-{}", self.id, crate::slug::slugify(&self.title))
    }
}

fn filename_regex() -> Regex {
    Regex::new(r"^P([0-5])-(BUG|FEAT|ENH)-(\d{3,})-(.+)\.md$").expect("valid regex")
}

/// Parse one issue file's content (pure, no I/O).
///
/// `path` is used only to derive the category (from its parent directory
/// name) and is stored on the returned `Issue` for later filesystem moves.
/// The `BUG/FEAT/ENH` id prefix and the containing directory are two
/// independent signals of category; a mismatch is logged as a warning and
/// the *directory* wins, since directory placement reflects deliberate
/// operator triage while the filename may be stale or copy-pasted.
pub fn parse_issue_content(content: &str, path: &Path) -> Result<Issue> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .context("issue path has no filename")?;

    let caps = filename_regex()
        .captures(file_name)
        .with_context(|| format!("issue filename does not match P#-(BUG|FEAT|ENH)-NNN-slug.md: {file_name}"))?;

    let priority = Priority(caps[1].parse()?);
    let kind = &caps[2];
    let number = &caps[3];
    let id = format!("{kind}-{number}");

    let dir_category = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .and_then(Category::from_dir_name);

    let id_category = Category::from_id_prefix(&id);

    let category = match (dir_category, id_category) {
        (Some(d), Some(i)) if d as u8 != i as u8 => {
            log::warn!(
                "issue {id}: directory category ({}) disagrees with id prefix ({}); using directory",
                d.dir_name(),
                i.dir_name()
            );
            d
        }
        (Some(d), _) => d,
        (None, Some(i)) => i,
        (None, None) => bail!("cannot determine category for issue {id} at {}", path.display()),
    };

    let title = first_title_line(content);
    let blocked_by = parse_blocked_by(content);

    Ok(Issue {
        id,
        category,
        priority,
        title,
        path: path.to_path_buf(),
        blocked_by,
    })
}

/// The first non-empty, non-heading-marker line of the body is the title.
fn first_title_line(content: &str) -> String {
    for line in content.lines() {
        let trimmed = line.trim().trim_start_matches('#').trim();
        if !trimmed.is_empty() && !trimmed.starts_with("Blocked By:") {
            return trimmed.to_string();
        }
    }
    String::new()
}

/// Parse a `Blocked By: BUG-012, FEAT-003` line. Absent or empty ⇒ no blockers.
fn parse_blocked_by(content: &str) -> BTreeSet<String> {
    for line in content.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("Blocked By:") {
            return rest
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
    }
    BTreeSet::new()
}

/// Scan the issues base directory, returning all active issues plus the set
/// of completed issue ids found under `completed/`.
///
/// Rejects duplicate identifiers across the entire tree (including
/// `completed/`).
pub fn scan_issues(base_dir: &Path) -> Result<(Vec<Issue>, BTreeSet<String>)> {
    let mut issues = Vec::new();
    let mut completed = BTreeSet::new();
    let mut seen = BTreeSet::new();

    for category in [Category::Bugs, Category::Features, Category::Enhancements] {
        let dir = base_dir.join(category.dir_name());
        for issue in scan_dir(&dir)? {
            if !seen.insert(issue.id.clone()) {
                bail!("duplicate issue id across issues tree: {}", issue.id);
            }
            issues.push(issue);
        }
    }

    let completed_dir = base_dir.join("completed");
    for issue in scan_dir(&completed_dir)? {
        if !seen.insert(issue.id.clone()) {
            bail!("duplicate issue id across issues tree: {}", issue.id);
        }
        completed.insert(issue.id);
    }

    Ok((issues, completed))
}

fn scan_dir(dir: &Path) -> Result<Vec<Issue>> {
    let mut out = Vec::new();
    if !dir.is_dir() {
        return Ok(out);
    }
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("reading issues directory {}", dir.display()))?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|e| e == "md"))
        .collect();
    entries.sort();

    for path in entries {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("reading issue file {}", path.display()))?;
        out.push(parse_issue_content(&content, &path)?);
    }
    Ok(out)
}

/// Move an issue file from its category directory into `completed/`,
/// creating the directory if needed. Idempotent: if the source no longer
/// exists (the agent already moved it), this is a no-op.
pub fn move_to_completed(base_dir: &Path, issue: &Issue) -> Result<()> {
    let completed_dir = base_dir.join("completed");
    fs::create_dir_all(&completed_dir)?;
    if !issue.path.exists() {
        return Ok(());
    }
    let dest = completed_dir.join(
        issue
            .path
            .file_name()
            .context("issue path has no filename")?,
    );
    fs::rename(&issue.path, &dest)
        .with_context(|| format!("moving {} to completed", issue.path.display()))?;
    Ok(())
}
