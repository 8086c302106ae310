//! Dependency graph and wave planner.
//!
//! Construction drops edges whose blocker is already completed, then checks
//! for cycles via DFS before handing back a graph callers can repeatedly
//! partition into waves with Kahn's algorithm.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use anyhow::{bail, Result};

use crate::issue::Issue;

/// A directed acyclic graph over active issue identifiers. Edges point from
/// blocker to blocked.
pub struct DependencyGraph {
    issues: HashMap<String, Issue>,
    /// blocker -> set of issues it blocks.
    forward: HashMap<String, BTreeSet<String>>,
    /// blocked -> set of its unresolved blockers.
    reverse: HashMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Build a graph over `issues`, dropping blocker edges already present
    /// in `completed`. Fails loudly (with the full cycle) if a cycle
    /// remains among the active issues.
    pub fn build(issues: Vec<Issue>, completed: &BTreeSet<String>) -> Result<Self> {
        let mut forward: HashMap<String, BTreeSet<String>> = HashMap::new();
        let mut reverse: HashMap<String, BTreeSet<String>> = HashMap::new();
        let active: HashSet<String> = issues.iter().map(|i| i.id.clone()).collect();

        for issue in &issues {
            reverse.entry(issue.id.clone()).or_default();
            forward.entry(issue.id.clone()).or_default();
            for blocker in &issue.blocked_by {
                if completed.contains(blocker) || !active.contains(blocker) {
                    // Satisfied already, or references an issue outside this
                    // run's active set — treat as resolved.
                    continue;
                }
                reverse.get_mut(&issue.id).unwrap().insert(blocker.clone());
                forward.entry(blocker.clone()).or_default().insert(issue.id.clone());
            }
        }

        let issue_map: HashMap<String, Issue> =
            issues.into_iter().map(|i| (i.id.clone(), i)).collect();

        let graph = Self {
            issues: issue_map,
            forward,
            reverse,
        };
        graph.check_acyclic()?;
        Ok(graph)
    }

    fn check_acyclic(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }
        let mut marks: HashMap<&str, Mark> = HashMap::new();
        let mut stack: Vec<String> = Vec::new();

        fn visit<'a>(
            node: &'a str,
            forward: &'a HashMap<String, BTreeSet<String>>,
            marks: &mut HashMap<&'a str, Mark>,
            stack: &mut Vec<String>,
        ) -> Result<()> {
            match marks.get(node) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    let start = stack.iter().position(|n| n == node).unwrap_or(0);
                    let mut cycle = stack[start..].to_vec();
                    cycle.push(node.to_string());
                    bail!("cycle detected: {}", cycle.join(" -> "));
                }
                None => {}
            }
            marks.insert(node, Mark::Visiting);
            stack.push(node.to_string());
            if let Some(next) = forward.get(node) {
                for child in next {
                    visit(child, forward, marks, stack)?;
                }
            }
            stack.pop();
            marks.insert(node, Mark::Done);
            Ok(())
        }

        let mut ids: Vec<&str> = self.issues.keys().map(|s| s.as_str()).collect();
        ids.sort();
        for id in ids {
            visit(id, &self.forward, &mut marks, &mut stack)?;
        }
        Ok(())
    }

    /// Partition all active issues into dependency waves via repeated
    /// leaf-extraction (Kahn's algorithm). Within a wave, issues are sorted
    /// by priority then id (stable).
    pub fn waves(&self) -> Vec<Vec<Issue>> {
        let mut remaining_blockers: BTreeMap<String, BTreeSet<String>> = self
            .reverse
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let mut waves = Vec::new();

        while !remaining_blockers.is_empty() {
            let ready: Vec<String> = remaining_blockers
                .iter()
                .filter(|(_, blockers)| blockers.is_empty())
                .map(|(id, _)| id.clone())
                .collect();

            if ready.is_empty() {
                // Should be unreachable after `check_acyclic`, but never spin.
                break;
            }

            for id in &ready {
                remaining_blockers.remove(id);
            }
            for blockers in remaining_blockers.values_mut() {
                for id in &ready {
                    blockers.remove(id);
                }
            }

            let mut wave: Vec<Issue> = ready
                .iter()
                .filter_map(|id| self.issues.get(id).cloned())
                .collect();
            wave.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
            waves.push(wave);
        }

        waves
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }
}
