//! Daemon configuration: socket path, shell command, and the tunables that
//! override the compiled-in constants from [`crate::constants`].
//!
//! Socket path *discovery* (finding the right path for a given session) is
//! out of scope here — that's the caller's job. This module only holds the
//! values the daemon needs once it has been told, or has defaulted, a path.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::constants::{CLIENT_TIMEOUT, MAX_CONTENT, MAX_PTY_READ, QCAP};

/// Full daemon configuration.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ServerConfig {
    /// Rendezvous path for the listening Unix socket.
    pub socket_path: PathBuf,
    /// Command (argv) to run as the child shell.
    pub shell: Vec<String>,
    /// Override for [`QCAP`]: inbound ring-buffer capacity.
    pub queue_capacity: usize,
    /// Override for [`CLIENT_TIMEOUT`], in seconds.
    pub client_timeout_secs: u64,
    /// Override for [`MAX_CONTENT`].
    pub max_content_len: usize,
    /// Override for [`MAX_PTY_READ`].
    pub max_pty_read: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let socket_path = if crate::env::is_any_test() {
            // Test mode: a PID-qualified path under the OS temp dir, not the
            // repo tree — the daemon's sockets are ephemeral rendezvous
            // points, unlike the project's own tmp/ fixtures.
            std::env::temp_dir().join(format!("dtachd-test-{}.sock", std::process::id()))
        } else {
            std::env::temp_dir().join(format!("dtachd-{}.sock", std::process::id()))
        };

        let shell = vec![std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())];

        Self {
            socket_path,
            shell,
            queue_capacity: QCAP,
            client_timeout_secs: CLIENT_TIMEOUT.as_secs(),
            max_content_len: MAX_CONTENT,
            max_pty_read: MAX_PTY_READ,
        }
    }
}

impl ServerConfig {
    /// Build the default configuration, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("DTACHD_SOCKET_PATH") {
            self.socket_path = PathBuf::from(path);
        }

        if let Ok(shell) = std::env::var("DTACHD_SHELL") {
            self.shell = shell.split_whitespace().map(str::to_string).collect();
        }

        if let Ok(qcap) = std::env::var("DTACHD_QUEUE_CAPACITY") {
            if let Ok(n) = qcap.parse::<usize>() {
                self.queue_capacity = n;
            }
        }

        if let Ok(timeout) = std::env::var("DTACHD_CLIENT_TIMEOUT_SECS") {
            if let Ok(secs) = timeout.parse::<u64>() {
                self.client_timeout_secs = secs;
            }
        }

        if let Ok(len) = std::env::var("DTACHD_MAX_CONTENT_LEN") {
            if let Ok(n) = len.parse::<usize>() {
                self.max_content_len = n;
            }
        }

        if let Ok(len) = std::env::var("DTACHD_MAX_PTY_READ") {
            if let Ok(n) = len.parse::<usize>() {
                self.max_pty_read = n;
            }
        }
    }

    #[must_use]
    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }

    /// Persist this configuration as JSON with owner-only permissions.
    /// Not used by the daemon itself (there is no config *file* it reads
    /// back), but useful for a companion client to discover the running
    /// daemon's settings (e.g. `max_content_len`) without a protocol
    /// round-trip.
    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("failed to serialize daemon configuration")?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write config to {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("failed to set permissions on {}", path.display()))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_compiled_in_constants() {
        let config = ServerConfig::default();
        assert_eq!(config.queue_capacity, QCAP);
        assert_eq!(config.client_timeout_secs, CLIENT_TIMEOUT.as_secs());
        assert_eq!(config.max_content_len, MAX_CONTENT);
        assert_eq!(config.max_pty_read, MAX_PTY_READ);
        assert!(!config.shell.is_empty());
    }

    #[test]
    fn env_override_replaces_socket_path() {
        std::env::set_var("DTACHD_SOCKET_PATH", "/tmp/dtachd-override-test.sock");
        let mut config = ServerConfig::default();
        config.apply_env_overrides();
        assert_eq!(config.socket_path, PathBuf::from("/tmp/dtachd-override-test.sock"));
        std::env::remove_var("DTACHD_SOCKET_PATH");
    }

    #[test]
    fn env_override_replaces_queue_capacity() {
        std::env::set_var("DTACHD_QUEUE_CAPACITY", "4");
        let mut config = ServerConfig::default();
        config.apply_env_overrides();
        assert_eq!(config.queue_capacity, 4);
        std::env::remove_var("DTACHD_QUEUE_CAPACITY");
    }

    #[test]
    fn save_writes_readable_json_with_restrictive_permissions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        let config = ServerConfig::default();
        config.save(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let loaded: ServerConfig = serde_json::from_str(&content).unwrap();
        assert_eq!(loaded, config);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }
    }
}
