//! Daemon PID-file bookkeeping.
//!
//! Lets an operator or a supervising script tell whether the daemon behind
//! a given socket path is still alive without connecting to the socket,
//! and lets a fresh daemon detect and clean up a stale socket left by a
//! process that no longer exists. This is write-on-start,
//! remove-on-clean-shutdown bookkeeping only — it is not session
//! persistence, which this daemon does not provide.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// PID-file path for a daemon listening at `socket_path`: same directory,
/// same stem, `.pid` extension.
#[must_use]
pub fn pid_file_path(socket_path: &Path) -> PathBuf {
    socket_path.with_extension("pid")
}

/// Write the current process PID to the PID file next to `socket_path`.
pub fn write_pid_file(socket_path: &Path) -> Result<()> {
    let path = pid_file_path(socket_path);
    let pid = std::process::id();
    fs::write(&path, pid.to_string())
        .with_context(|| format!("failed to write PID file: {}", path.display()))?;
    log::info!("wrote PID file {} (pid={pid})", path.display());
    Ok(())
}

/// Read the PID recorded for a daemon at `socket_path`, if any.
#[must_use]
pub fn read_pid_file(socket_path: &Path) -> Option<u32> {
    let contents = fs::read_to_string(pid_file_path(socket_path)).ok()?;
    contents.trim().parse().ok()
}

/// Check whether the daemon recorded at `socket_path` is still alive, via
/// a zero-signal `kill` on the PID in its PID file.
#[must_use]
pub fn is_running(socket_path: &Path) -> bool {
    let Some(pid) = read_pid_file(socket_path) else {
        return false;
    };
    // SAFETY: signal 0 sends nothing; it only probes whether `pid` exists
    // and is signalable by this process.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

/// Remove a stale PID file and socket left by a daemon that is no longer
/// running. No-op (and leaves the files alone) if the daemon is still
/// alive, so a second daemon can never clobber a live one's rendezvous
/// point out from under it.
pub fn cleanup_stale(socket_path: &Path) {
    if is_running(socket_path) {
        log::debug!("daemon at {} is still running, skipping stale cleanup", socket_path.display());
        return;
    }

    let pid_path = pid_file_path(socket_path);
    if pid_path.exists() {
        let _ = fs::remove_file(&pid_path);
        log::debug!("removed stale PID file: {}", pid_path.display());
    }
    if socket_path.exists() {
        let _ = fs::remove_file(socket_path);
        log::debug!("removed stale socket file: {}", socket_path.display());
    }
}

/// Remove the PID file and socket on clean shutdown. Called once, from the
/// exit-glue path, regardless of which exit reason triggered it.
pub fn cleanup_on_shutdown(socket_path: &Path) {
    let pid_path = pid_file_path(socket_path);
    let _ = fs::remove_file(&pid_path);
    let _ = fs::remove_file(socket_path);
    log::info!("cleaned up daemon files at {}", socket_path.display());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_file_path_format() {
        let socket_path = PathBuf::from("/tmp/dtachd-abc123.sock");
        let pid_path = pid_file_path(&socket_path);
        assert_eq!(pid_path, PathBuf::from("/tmp/dtachd-abc123.pid"));
    }

    #[test]
    fn test_read_nonexistent_pid_file() {
        let socket_path = PathBuf::from("/tmp/dtachd-nonexistent-test-socket.sock");
        assert!(read_pid_file(&socket_path).is_none());
    }

    #[test]
    fn test_is_running_nonexistent() {
        let socket_path = PathBuf::from("/tmp/dtachd-nonexistent-test-socket-2.sock");
        assert!(!is_running(&socket_path));
    }

    #[test]
    fn test_pid_file_write_read_cleanup_cycle() {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket_path = dir.path().join("test.sock");

        write_pid_file(&socket_path).unwrap();
        assert_eq!(read_pid_file(&socket_path), Some(std::process::id()));
        assert!(is_running(&socket_path));

        cleanup_on_shutdown(&socket_path);
        assert!(read_pid_file(&socket_path).is_none());
        assert!(!is_running(&socket_path));
    }

    #[test]
    fn test_cleanup_stale_removes_files_for_dead_pid() {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket_path = dir.path().join("stale.sock");
        let pid_path = pid_file_path(&socket_path);

        // A PID essentially guaranteed not to be alive in this test's PID namespace.
        fs::write(&pid_path, "999999").unwrap();
        fs::write(&socket_path, b"").unwrap();

        cleanup_stale(&socket_path);

        assert!(!pid_path.exists());
        assert!(!socket_path.exists());
    }
}
