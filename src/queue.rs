//! Bounded FIFO of client → PTY `CONTENT` packets awaiting a PTY write.
//!
//! A fixed-capacity ring buffer, not a growable one: the capacity *is* the
//! backpressure mechanism. `enqueue` never overwrites and never
//! blocks; a full queue simply refuses the packet, and the caller's job is
//! to leave the producing client's input un-acknowledged until a slot
//! frees up.

use crate::packet::ClientPacket;

/// Fixed-capacity ring buffer of pending `CONTENT` packets.
#[derive(Debug)]
pub struct InboundQueue {
    buf: Box<[ClientPacket]>,
    insert: usize,
    remove: usize,
    count: usize,
}

impl InboundQueue {
    /// Create a queue with room for exactly `capacity` packets.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![ClientPacket::default(); capacity.max(1)].into_boxed_slice(),
            insert: 0,
            remove: 0,
            count: 0,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    #[must_use]
    pub fn empty(&self) -> bool {
        self.count == 0
    }

    #[must_use]
    pub fn full(&self) -> bool {
        self.count == self.buf.len()
    }

    /// Attempt to enqueue a packet by value. Returns `false` (no-op) if the
    /// queue is full — the caller must not drop the packet in that case,
    /// only retry later.
    pub fn enqueue(&mut self, pkt: ClientPacket) -> bool {
        if self.full() {
            return false;
        }
        self.buf[self.insert] = pkt;
        self.insert = (self.insert + 1) % self.buf.len();
        self.count += 1;
        true
    }

    /// Reference to the head packet, if any.
    #[must_use]
    pub fn peek(&self) -> Option<&ClientPacket> {
        if self.empty() {
            None
        } else {
            Some(&self.buf[self.remove])
        }
    }

    /// Drop the head packet. No-op on an empty queue.
    pub fn dequeue(&mut self) {
        if self.empty() {
            return;
        }
        self.remove = (self.remove + 1) % self.buf.len();
        self.count -= 1;
    }
}
