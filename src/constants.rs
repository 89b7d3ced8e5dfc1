//! Application-wide constants for the daemon.
//!
//! This module centralizes all magic numbers and configuration constants
//! to improve maintainability and discoverability. Constants are grouped
//! by domain with documentation explaining their purpose.
//!
//! # Categories
//!
//! - **Wire format**: sizes baked into the fixed-layout client/server packets
//! - **Queue**: inbound ring-buffer capacity
//! - **Timeouts**: idle-client eviction

use std::time::Duration;

// ============================================================================
// Wire format
// ============================================================================

/// Maximum payload bytes in a single `CONTENT` client packet.
///
/// Chosen to comfortably hold a full terminal line plus paste bursts while
/// keeping the fixed-size client packet small enough to fit a few per
/// `recv` call; increase with caution as it changes the wire format.
pub const MAX_CONTENT: usize = 4096;

/// Maximum bytes read from the PTY master in one `ServerPacket`.
///
/// Matches `MAX_CONTENT`: one fan-out generation's worth of PTY output is
/// bounded by a single read, so the two buffers are sized identically to
/// keep an echoed round-trip inside one packet on each leg.
pub const MAX_PTY_READ: usize = 4096;

// ============================================================================
// Queue
// ============================================================================

/// Capacity of the inbound (client → PTY) ring buffer.
///
/// Small by design: the queue exists to absorb bursts while the PTY write
/// side catches up, not to buffer indefinitely. A full queue is reported
/// upstream as backpressure (unacked `CONTENT`, socket not re-armed for
/// read), never as dropped data.
pub const QCAP: usize = 32;

// ============================================================================
// Timeouts
// ============================================================================

/// How long a client may have undelivered outbound bytes before it is
/// force-disconnected.
///
/// Guards against a client that stopped reading (suspended process, dead
/// network peer that never sent a RST) from holding the shared PTY output
/// buffer's delivery open indefinitely — since a PTY read is gated on every
/// attached client having drained, one stuck client would otherwise starve
/// every other client's output.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(120);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_sizes_are_consistent() {
        assert!(MAX_CONTENT > 0);
        assert!(MAX_PTY_READ > 0);
    }

    #[test]
    fn test_queue_capacity_is_small_but_nonzero() {
        assert!(QCAP > 0);
        assert!(QCAP <= 256);
    }

    #[test]
    fn test_client_timeout_is_reasonable() {
        assert!(CLIENT_TIMEOUT >= Duration::from_secs(10));
        assert!(CLIENT_TIMEOUT <= Duration::from_secs(600));
    }
}
