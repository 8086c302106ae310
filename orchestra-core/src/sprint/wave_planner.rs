//! File-contention sub-wave splitting (sprint mode).
//!
//! A dependency wave computed by [`crate::graph::DependencyGraph::waves`] is
//! further split into sub-waves: connected components of the "contends
//! with" relation over file references. Issues inside the same sub-wave
//! share a contended file (directly or transitively) and must run one at a
//! time; distinct sub-waves never share a contended file, so they are safe
//! to dispatch in parallel with each other.

use std::collections::HashMap;

use crate::issue::Issue;

use super::conflict::{self, ConflictProfile};

/// One sub-wave: issues that must run sequentially relative to each other,
/// sorted by priority then id (same ordering rule as whole waves).
#[derive(Debug, Clone)]
pub struct SubWave {
    pub issues: Vec<Issue>,
}

/// Split `wave` into sub-waves using each issue's body text to extract a
/// conflict profile.
///
/// `body_of` maps an issue id to its raw markdown body (symbol/file-ref
/// extraction operates on the body, not the parsed `Issue` struct).
pub fn split_by_file_contention(wave: &[Issue], body_of: impl Fn(&str) -> String) -> Vec<SubWave> {
    let profiles: HashMap<String, ConflictProfile> = wave
        .iter()
        .map(|issue| (issue.id.clone(), conflict::extract_profile(&body_of(&issue.id))))
        .collect();

    let n = wave.len();
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut [usize], x: usize) -> usize {
        if parent[x] != x {
            parent[x] = find(parent, parent[x]);
        }
        parent[x]
    }

    fn union(parent: &mut [usize], a: usize, b: usize) {
        let ra = find(parent, a);
        let rb = find(parent, b);
        if ra != rb {
            parent[rb] = ra;
        }
    }

    for i in 0..n {
        for j in (i + 1)..n {
            let pi = &profiles[&wave[i].id];
            let pj = &profiles[&wave[j].id];
            if conflict::contends(pi, pj) {
                union(&mut parent, i, j);
            }
        }
    }

    let mut groups: HashMap<usize, Vec<Issue>> = HashMap::new();
    for i in 0..n {
        let root = find(&mut parent, i);
        groups.entry(root).or_default().push(wave[i].clone());
    }

    let mut sub_waves: Vec<SubWave> = groups
        .into_values()
        .map(|mut issues| {
            issues.sort_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| profiles[&a.id].modification_type.cmp(&profiles[&b.id].modification_type))
                    .then_with(|| a.id.cmp(&b.id))
            });
            SubWave { issues }
        })
        .collect();

    sub_waves.sort_by(|a, b| {
        let a_key = a.issues.first().map(|i| (i.priority, i.id.clone()));
        let b_key = b.issues.first().map(|i| (i.priority, i.id.clone()));
        a_key.cmp(&b_key)
    });

    sub_waves
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    use crate::issue::{Category, Priority};

    fn issue(id: &str, priority: u8) -> Issue {
        Issue {
            id: id.to_string(),
            category: Category::Enhancements,
            priority: Priority(priority),
            title: format!("Issue {id}"),
            path: PathBuf::from(format!("enhancements/P{priority}-ENH-{id}-x.md")),
            blocked_by: BTreeSet::new(),
        }
    }

    #[test]
    fn non_contending_issues_each_get_their_own_sub_wave() {
        let wave = vec![issue("001", 2), issue("002", 2)];
        let bodies: HashMap<&str, &str> = [
            ("001", "Touches src/foo.rs, adds FooWidget."),
            ("002", "Touches src/bar.rs, adds BarWidget."),
        ]
        .into_iter()
        .collect();

        let sub_waves = split_by_file_contention(&wave, |id| bodies[id].to_string());
        assert_eq!(sub_waves.len(), 2);
    }

    #[test]
    fn contending_issues_share_a_sub_wave() {
        let wave = vec![issue("001", 2), issue("002", 2)];
        let bodies: HashMap<&str, &str> = [
            ("001", "Refactor src/widget.rs, rename module UserHeader, header layout."),
            ("002", "Refactor src/widget.rs, touches UserHeader again, header spacing."),
        ]
        .into_iter()
        .collect();

        let sub_waves = split_by_file_contention(&wave, |id| bodies[id].to_string());
        assert_eq!(sub_waves.len(), 1);
        assert_eq!(sub_waves[0].issues.len(), 2);
    }

    #[test]
    fn transitive_contention_merges_into_one_component() {
        // 001-002 contend, 002-003 contend, 001-003 do not directly share a
        // file but end up in the same sub-wave via 002.
        let wave = vec![issue("001", 2), issue("002", 2), issue("003", 2)];
        let bodies: HashMap<&str, &str> = [
            ("001", "Refactor src/a.rs, rename module Thing, header area."),
            ("002", "Refactor src/a.rs and src/b.rs, touches Thing, header area."),
            ("003", "Refactor src/b.rs, touches Thing, header spacing."),
        ]
        .into_iter()
        .collect();

        let sub_waves = split_by_file_contention(&wave, |id| bodies[id].to_string());
        assert_eq!(sub_waves.len(), 1);
        assert_eq!(sub_waves[0].issues.len(), 3);
    }
}
