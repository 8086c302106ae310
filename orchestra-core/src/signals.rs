//! SIGINT/SIGTERM-triggered graceful shutdown.
//!
//! A single `AtomicBool` flag is flipped by a background thread watching
//! `signal_hook::iterator::Signals`; every blocking loop in the
//! orchestrator polls it instead of being torn down mid-operation. Signal
//! handlers are installed once at startup and idempotent — re-delivery of
//! the same signal before shutdown completes is a no-op past the first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared shutdown flag. Cloning is cheap; every component that needs to
/// observe shutdown holds a clone.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    requested: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }
}

/// Install SIGINT/SIGTERM handlers once, returning the shared flag they set.
/// Idempotent: calling this twice in the same process installs two watcher
/// threads but both drive the same kind of flag — harmless, just wasteful —
/// so callers should call it exactly once at startup.
#[cfg(unix)]
pub fn install() -> anyhow::Result<ShutdownSignal> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let signal = ShutdownSignal::new();
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let flag = signal.clone();

    std::thread::spawn(move || {
        for _ in signals.forever() {
            flag.request();
        }
    });

    Ok(signal)
}

#[cfg(not(unix))]
pub fn install() -> anyhow::Result<ShutdownSignal> {
    Ok(ShutdownSignal::new())
}
