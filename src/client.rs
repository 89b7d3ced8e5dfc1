//! Per-client state: connection state, activity tracking, and the in-progress
//! packets on each side of the client's socket.
//!
//! The server keeps clients in a contiguous `Vec<Client>`; reaping a
//! disconnected client is a swap-remove while scanning the list.

use std::time::Instant;

use tokio::net::UnixStream;

use crate::packet::{ClientPacketState, ServerPacketState};

/// Lifecycle state of a connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Accepted, not yet attached.
    Connected,
    /// Eligible to receive PTY output and counted in the PTY-read gate.
    Attached,
    /// Explicitly detached; no longer counted in the gate, but may still
    /// be assigned fan-out references already in flight.
    Detached,
    /// Terminal: reaped at the top of the next tick.
    Disconnected,
}

/// A single connected client and its in-flight I/O.
#[derive(Debug)]
pub struct Client {
    pub socket: UnixStream,
    pub state: ClientState,
    pub last_activity: Instant,
    pub input: ClientPacketState,
    pub output: ServerPacketState,
}

impl Client {
    /// Wrap a freshly accepted, non-blocking socket as a new client in the
    /// initial `Connected` state.
    #[must_use]
    pub fn new(socket: UnixStream, now: Instant) -> Self {
        Self {
            socket,
            state: ClientState::Connected,
            last_activity: now,
            input: ClientPacketState::default(),
            output: ServerPacketState::default(),
        }
    }

    /// Whether this client is currently attached (eligible for PTY output
    /// fan-out and counted in the PTY-read gate).
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.state == ClientState::Attached
    }

    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.state == ClientState::Disconnected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_client_starts_connected() {
        let (a, _b) = UnixStream::pair().expect("socketpair");
        let c = Client::new(a, Instant::now());
        assert_eq!(c.state, ClientState::Connected);
        assert!(!c.is_attached());
        assert!(!c.is_disconnected());
    }

    #[tokio::test]
    async fn attached_state_is_detected() {
        let (a, _b) = UnixStream::pair().expect("socketpair");
        let mut c = Client::new(a, Instant::now());
        c.state = ClientState::Attached;
        assert!(c.is_attached());
    }
}
