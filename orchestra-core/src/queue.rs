//! Priority queue.
//!
//! Two logical sub-queues — P0 and non-P0 — are maintained internally so
//! that callers get the P0-sequential rule for free from `get`: while any
//! P0 item is queued or in-flight, `get` only yields P0 work.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::issue::{Issue, Priority};

/// An item handed out by `get`, ordered (priority, enqueue time).
#[derive(Debug, Clone)]
struct Entry {
    issue: Issue,
    enqueued_at: Instant,
}

struct Inner {
    p0: VecDeque<Entry>,
    rest: VecDeque<Entry>,
    p0_in_flight: usize,
    rest_in_flight: usize,
}

/// Thread-safe priority queue honoring the P0-sequential rule.
pub struct PriorityQueue {
    inner: Mutex<Inner>,
    notify: Condvar,
}

/// Sentinel returned by `get` when the timeout elapses with nothing ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetResult<T> {
    Item(T),
    Empty,
}

impl Default for PriorityQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                p0: VecDeque::new(),
                rest: VecDeque::new(),
                p0_in_flight: 0,
                rest_in_flight: 0,
            }),
            notify: Condvar::new(),
        }
    }

    /// Enqueue a single issue.
    pub fn add(&self, issue: Issue) {
        let mut inner = self.inner.lock().unwrap();
        let entry = Entry {
            issue,
            enqueued_at: Instant::now(),
        };
        if entry.issue.priority.is_p0() {
            inner.p0.push_back(entry);
        } else {
            inner.rest.push_back(entry);
        }
        self.notify.notify_all();
    }

    /// Enqueue many issues at once, preserving relative order as the FIFO
    /// tiebreak. Returns the number enqueued.
    pub fn add_many(&self, issues: Vec<Issue>) -> usize {
        let count = issues.len();
        for issue in issues {
            self.add(issue);
        }
        count
    }

    /// Block until an item is available or `timeout` elapses.
    ///
    /// Returns P0 work whenever any exists (queued or in-flight elsewhere —
    /// P0 is drained sequentially by the caller, so in-flight P0 count is
    /// what keeps non-P0 dispatch held back). Once the P0 backlog is fully
    /// drained (none queued, none in-flight), non-P0 items become eligible.
    pub fn get(&self, timeout: Duration) -> GetResult<Issue> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(entry) = inner.p0.pop_front() {
                inner.p0_in_flight += 1;
                return GetResult::Item(entry.issue);
            }
            if inner.p0_in_flight == 0 {
                if let Some(entry) = inner.rest.pop_front() {
                    inner.rest_in_flight += 1;
                    return GetResult::Item(entry.issue);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return GetResult::Empty;
            }
            let (guard, timeout_result) = self
                .notify
                .wait_timeout(inner, deadline - now)
                .unwrap();
            inner = guard;
            if timeout_result.timed_out() {
                // Loop once more to re-check in case of a spurious wakeup
                // racing the deadline, then fall through naturally.
            }
        }
    }

    /// Mark an issue's processing complete, releasing its in-flight slot.
    pub fn mark_completed(&self, priority: Priority) {
        self.release_in_flight(priority);
    }

    /// Mark an issue's processing failed, releasing its in-flight slot.
    pub fn mark_failed(&self, priority: Priority) {
        self.release_in_flight(priority);
    }

    fn release_in_flight(&self, priority: Priority) {
        let mut inner = self.inner.lock().unwrap();
        if priority.is_p0() {
            inner.p0_in_flight = inner.p0_in_flight.saturating_sub(1);
        } else {
            inner.rest_in_flight = inner.rest_in_flight.saturating_sub(1);
        }
        self.notify.notify_all();
    }

    pub fn p0_count(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.p0.len() + inner.p0_in_flight
    }

    pub fn parallel_count(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.rest.len() + inner.rest_in_flight
    }

    pub fn len(&self) -> usize {
        self.p0_count() + self.parallel_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::parse_issue_content;
    use std::path::PathBuf;

    fn issue(priority: &str, id_num: &str, kind: &str) -> Issue {
        let file = format!("{priority}-{kind}-{id_num}-x.md");
        let dir = match kind {
            "BUG" => "bugs",
            "FEAT" => "features",
            _ => "enhancements",
        };
        parse_issue_content("Title\n", &PathBuf::from("/issues").join(dir).join(file)).unwrap()
    }

    #[test]
    fn fifo_within_same_priority() {
        let q = PriorityQueue::new();
        q.add(issue("P2", "001", "BUG"));
        q.add(issue("P2", "002", "BUG"));

        match q.get(Duration::from_millis(10)) {
            GetResult::Item(i) => assert_eq!(i.id, "BUG-001"),
            GetResult::Empty => panic!("expected item"),
        }
    }

    #[test]
    fn p0_drains_before_lower_priority() {
        let q = PriorityQueue::new();
        q.add(issue("P2", "001", "BUG"));
        q.add(issue("P0", "002", "BUG"));

        match q.get(Duration::from_millis(10)) {
            GetResult::Item(i) => assert_eq!(i.id, "BUG-002"),
            GetResult::Empty => panic!("expected item"),
        }
    }

    #[test]
    fn non_p0_blocked_while_p0_in_flight() {
        let q = PriorityQueue::new();
        q.add(issue("P0", "001", "BUG"));
        q.add(issue("P2", "002", "BUG"));

        let p0 = match q.get(Duration::from_millis(10)) {
            GetResult::Item(i) => i,
            GetResult::Empty => panic!("expected P0 item"),
        };
        assert_eq!(p0.id, "BUG-001");

        // P0 still in flight — non-P0 must not be handed out yet.
        assert!(matches!(
            q.get(Duration::from_millis(20)),
            GetResult::Empty
        ));

        q.mark_completed(Priority::P0);

        match q.get(Duration::from_millis(50)) {
            GetResult::Item(i) => assert_eq!(i.id, "BUG-002"),
            GetResult::Empty => panic!("expected non-P0 item after P0 drained"),
        }
    }

    #[test]
    fn empty_queue_times_out() {
        let q = PriorityQueue::new();
        assert!(matches!(
            q.get(Duration::from_millis(10)),
            GetResult::Empty
        ));
    }

    #[test]
    fn counts_reflect_in_flight_and_queued() {
        let q = PriorityQueue::new();
        q.add(issue("P0", "001", "BUG"));
        q.add(issue("P2", "002", "BUG"));
        assert_eq!(q.p0_count(), 1);
        assert_eq!(q.parallel_count(), 1);
        assert_eq!(q.len(), 2);
    }
}
