//! Async-signal-safe handler state, mechanized as two atomic flags.
//!
//! Per the design note on confining signal-handler state: a signal handler
//! here does nothing but flip a bit. All the actual work — reaping the
//! child, recording its exit status, deciding to stop the loop, unlinking
//! the socket path — happens on the main task, which polls these flags once
//! per tick. `signal_hook::flag::register` is itself written to be
//! async-signal-safe (a single atomic store), so no custom handler body is
//! needed and `errno` is never touched by our code inside a handler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use signal_hook::consts::signal::{SIGCHLD, SIGINT, SIGTERM};

/// Flags flipped by signal handlers and polled by the readiness loop.
#[derive(Debug, Clone)]
pub struct SignalFlags {
    /// Set when `SIGCHLD` was delivered; the loop reaps on observing this.
    pub child_exited: Arc<AtomicBool>,
    /// Set when `SIGTERM`/`SIGINT` was delivered; the loop stops on observing this.
    pub shutdown_requested: Arc<AtomicBool>,
}

impl SignalFlags {
    /// Register handlers for `SIGCHLD`, `SIGTERM`, and `SIGINT` that flip
    /// the returned flags. Safe to call once per process.
    pub fn install() -> Result<Self> {
        let child_exited = Arc::new(AtomicBool::new(false));
        let shutdown_requested = Arc::new(AtomicBool::new(false));

        signal_hook::flag::register(SIGCHLD, Arc::clone(&child_exited))
            .context("failed to register SIGCHLD handler")?;
        signal_hook::flag::register(SIGTERM, Arc::clone(&shutdown_requested))
            .context("failed to register SIGTERM handler")?;
        signal_hook::flag::register(SIGINT, Arc::clone(&shutdown_requested))
            .context("failed to register SIGINT handler")?;

        Ok(Self {
            child_exited,
            shutdown_requested,
        })
    }

    /// Take and clear the child-exited flag, returning whether it was set.
    pub fn take_child_exited(&self) -> bool {
        self.child_exited.swap(false, Ordering::SeqCst)
    }

    /// Whether a termination signal has been observed. Not cleared, since
    /// shutdown is a one-way transition.
    #[must_use]
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_start_clear() {
        let flags = SignalFlags {
            child_exited: Arc::new(AtomicBool::new(false)),
            shutdown_requested: Arc::new(AtomicBool::new(false)),
        };
        assert!(!flags.take_child_exited());
        assert!(!flags.shutdown_requested());
    }

    #[test]
    fn take_child_exited_clears_after_read() {
        let flags = SignalFlags {
            child_exited: Arc::new(AtomicBool::new(true)),
            shutdown_requested: Arc::new(AtomicBool::new(false)),
        };
        assert!(flags.take_child_exited());
        assert!(!flags.take_child_exited());
    }
}
