//! In-process git lock.
//!
//! Worker threads and the merge coordinator all touch the same repository's
//! `.git` metadata (worktree add/remove, the main tree's index). `GitLock`
//! serializes access to that shared state with an in-process `Mutex` rather
//! than a PID file, since every actor in this crate lives in the same
//! process.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::{bail, Result};

/// Maximum number of acquire attempts before giving up — bounded retries
/// rather than blocking forever on a stuck lock holder.
const DEFAULT_MAX_ATTEMPTS: u32 = 8;
const INITIAL_BACKOFF: Duration = Duration::from_millis(25);

/// Serializes access to git operations that mutate shared repository state.
pub struct GitLock {
    inner: Mutex<()>,
    max_attempts: u32,
}

/// RAII guard. Dropping it releases the lock.
pub struct GitLockGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl Default for GitLock {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

impl GitLock {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            inner: Mutex::new(()),
            max_attempts,
        }
    }

    /// Acquire the lock, retrying with exponential backoff if it is
    /// momentarily held elsewhere. A poisoned lock (a prior holder panicked
    /// mid-git-operation) is treated as recoverable: the repository may be
    /// in an inconsistent state, but refusing to ever lock again would wedge
    /// the whole run, so the guard is still handed out.
    pub fn acquire(&self) -> Result<GitLockGuard<'_>> {
        let mut backoff = INITIAL_BACKOFF;
        for attempt in 0..self.max_attempts {
            match self.inner.try_lock() {
                Ok(guard) => return Ok(GitLockGuard { _guard: guard }),
                Err(std::sync::TryLockError::Poisoned(poisoned)) => {
                    return Ok(GitLockGuard {
                        _guard: poisoned.into_inner(),
                    })
                }
                Err(std::sync::TryLockError::WouldBlock) => {
                    if attempt + 1 == self.max_attempts {
                        break;
                    }
                    std::thread::sleep(backoff);
                    backoff *= 2;
                }
            }
        }
        bail!("failed to acquire git lock after {} attempts", self.max_attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn sequential_acquire_succeeds() {
        let lock = GitLock::default();
        {
            let _g = lock.acquire().unwrap();
        }
        let _g2 = lock.acquire().unwrap();
    }

    #[test]
    fn contended_lock_times_out_with_small_attempt_budget() {
        let lock = Arc::new(GitLock::new(2));
        let held = lock.acquire().unwrap();
        let start = Instant::now();
        let err = lock.acquire().is_err();
        drop(held);
        assert!(err);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn lock_is_available_again_after_guard_drops() {
        let lock = GitLock::default();
        let guard = lock.acquire().unwrap();
        drop(guard);
        assert!(lock.acquire().is_ok());
    }
}
