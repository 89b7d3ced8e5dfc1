//! Thin wrapper around an inherited PTY master file descriptor.
//!
//! The core loop is handed an already-open, already-non-blocking master fd
//! and a child pid; PTY *creation* happens in the entry point via an
//! external PTY-allocation facility, not here. This
//! module only does the things the event loop needs from that fd: async
//! readiness, raw read/write, window-size ioctl, and a window-change
//! signal to the controlling process group, plus the non-blocking reap the
//! signal-triggered shutdown path needs.

use std::os::unix::io::RawFd;

use anyhow::{Context, Result};
use tokio::io::unix::AsyncFd;

/// A bare `RawFd` that owns closing the descriptor on drop, so [`PtyMaster`]
/// can hand it to `AsyncFd` (which requires `AsRawFd`) while still being
/// the fd's one owner for the loop's lifetime.
struct OwnedRawFd(RawFd);

impl std::os::unix::io::AsRawFd for OwnedRawFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

impl Drop for OwnedRawFd {
    fn drop(&mut self) {
        // SAFETY: `self.0` is a valid, open fd owned exclusively by this value.
        unsafe {
            libc::close(self.0);
        }
    }
}

/// An inherited PTY master fd, wrapped for tokio readiness polling.
///
/// Closing happens on drop via [`OwnedRawFd`] — the fd was opened by the
/// entry point and handed here as its one subsequent owner for the life of
/// the loop.
#[derive(Debug)]
pub struct PtyMaster {
    inner: AsyncFd<OwnedRawFd>,
}

impl std::fmt::Debug for OwnedRawFd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("OwnedRawFd").field(&self.0).finish()
    }
}

impl PtyMaster {
    /// Wrap a raw, already-non-blocking PTY master fd for async readiness.
    pub fn from_raw_fd(fd: RawFd) -> Result<Self> {
        Ok(Self {
            inner: AsyncFd::new(OwnedRawFd(fd))
                .context("failed to register PTY master fd with the reactor")?,
        })
    }

    #[must_use]
    pub fn as_raw_fd(&self) -> RawFd {
        self.inner.get_ref().0
    }

    /// Wait for the fd to become readable, same suspension semantics as
    /// `UnixStream::readable()`.
    pub async fn readable(&self) -> Result<tokio::io::unix::AsyncFdReadyGuard<'_, OwnedRawFd>> {
        self.inner
            .readable()
            .await
            .context("PTY master fd readiness (read) failed")
    }

    /// Wait for the fd to become writable.
    pub async fn writable(&self) -> Result<tokio::io::unix::AsyncFdReadyGuard<'_, OwnedRawFd>> {
        self.inner
            .writable()
            .await
            .context("PTY master fd readiness (write) failed")
    }

    /// Non-blocking read straight into `buf`. Mirrors the `EAGAIN`/`EINTR`
    /// transient-vs-fatal split used for client sockets.
    pub fn try_read(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        let fd = self.as_raw_fd();
        // SAFETY: `fd` is a valid, open fd for the lifetime of `self`; `buf`
        // is a valid, appropriately-sized buffer for the duration of the call.
        let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n >= 0 {
            Ok(n as usize)
        } else {
            Err(std::io::Error::last_os_error())
        }
    }

    /// Non-blocking write from `buf`.
    pub fn try_write(&self, buf: &[u8]) -> std::io::Result<usize> {
        let fd = self.as_raw_fd();
        // SAFETY: `fd` is a valid, open fd for the lifetime of `self`; `buf`
        // is a valid, appropriately-sized buffer for the duration of the call.
        let n = unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) };
        if n >= 0 {
            Ok(n as usize)
        } else {
            Err(std::io::Error::last_os_error())
        }
    }

    /// Apply a window size to the PTY via `TIOCSWINSZ`.
    pub fn set_window_size(&self, winsize: crate::packet::WinSize) -> std::io::Result<()> {
        let ws = libc::winsize {
            ws_row: winsize.rows,
            ws_col: winsize.cols,
            ws_xpixel: winsize.xpix,
            ws_ypixel: winsize.ypix,
        };
        let fd = self.as_raw_fd();
        // SAFETY: `fd` names a valid terminal-like fd; `ws` is a fully
        // initialized `winsize` the ioctl only reads from.
        let rc = unsafe { libc::ioctl(fd, libc::TIOCSWINSZ, std::ptr::addr_of!(ws)) };
        if rc == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }
}

/// Send `SIGWINCH` to the PTY's foreground process group, prompting the
/// child shell (and whatever it's running) to re-query its window size.
///
/// A negative pid targets `kill(2)`'s process-group form: the child shell
/// is also its process group's leader, so `-child_pid` reaches it and
/// every process it has spawned in turn (e.g. a foreground program running
/// under the shell), not just the shell itself.
pub fn signal_window_change(child_pid: libc::pid_t) -> std::io::Result<()> {
    // SAFETY: sending a signal to a process group this process's own child
    // leads.
    let rc = unsafe { libc::kill(-child_pid, libc::SIGWINCH) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// Outcome of reaping children with `waitpid(WNOHANG)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapOutcome {
    /// No child has exited yet.
    StillRunning,
    /// The child exited; carries its reported exit status (may encode a
    /// signal termination per `waitpid(2)` conventions).
    Exited(i32),
}

/// Non-blocking reap of `child_pid`. Called from the main task after
/// observing the `SIGCHLD` flag, never from the signal handler itself.
pub fn try_reap(child_pid: libc::pid_t) -> std::io::Result<ReapOutcome> {
    let mut status: libc::c_int = 0;
    // SAFETY: `status` is a valid out-parameter for the duration of the call.
    let rc = unsafe { libc::waitpid(child_pid, &mut status, libc::WNOHANG) };
    match rc {
        0 => Ok(ReapOutcome::StillRunning),
        n if n == child_pid => Ok(ReapOutcome::Exited(status)),
        -1 => {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ECHILD) {
                // Already reaped by a previous tick.
                Ok(ReapOutcome::Exited(status))
            } else {
                Err(err)
            }
        }
        _ => Ok(ReapOutcome::StillRunning),
    }
}

/// Translate a raw `waitpid` status into a process exit code, mirroring
/// the shell conventions `$?` follows (128+signal for signal termination).
#[must_use]
pub fn exit_code_from_status(status: i32) -> i32 {
    // SAFETY: `status` is a raw status word as returned by `waitpid`.
    unsafe {
        if libc::WIFEXITED(status) {
            libc::WEXITSTATUS(status)
        } else if libc::WIFSIGNALED(status) {
            128 + libc::WTERMSIG(status)
        } else {
            1
        }
    }
}
