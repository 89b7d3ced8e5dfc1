//! Fixed-layout wire packets and the partial-I/O offset tracking around them.
//!
//! Nothing here performs a parser in the traditional sense: a packet is
//! always moved as one contiguous block of [`WIRE_SIZE`] bytes, and the
//! only state a caller needs across non-blocking `recv`/`send` calls is how
//! many of those bytes have landed so far. Decoding is a handful of
//! `from_ne_bytes` reads once the block is complete — no incremental
//! parser, no allocation. Wire values are host-native (local Unix socket:
//! there is exactly one host on the wire), per the external-interfaces
//! contract.

use crate::constants::{MAX_CONTENT, MAX_PTY_READ};

/// Size of the fixed header: `{ type: u32, len: u32 }`.
pub const HEADER_SIZE: usize = 8;

/// Size of the full fixed wire record, header plus payload union.
pub const WIRE_SIZE: usize = HEADER_SIZE + MAX_CONTENT;

/// Discriminant for a decoded [`ClientPacket`], matching the external wire numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ClientPacketType {
    /// Raw bytes bound for the PTY.
    Content = 1,
    /// First attach: carries a window size and transitions the client to `ATTACHED`.
    Attach = 2,
    /// Client is detaching; no further output should be expected.
    Detach = 3,
    /// Window size changed; does not by itself change attach state.
    Resize = 4,
    /// Request a window-change signal with no size change (e.g. terminal repaint).
    Redraw = 5,
}

impl ClientPacketType {
    /// Decode a wire discriminant, if it names a known packet type.
    #[must_use]
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(Self::Content),
            2 => Some(Self::Attach),
            3 => Some(Self::Detach),
            4 => Some(Self::Resize),
            5 => Some(Self::Redraw),
            _ => None,
        }
    }
}

/// Window size, as carried by `ATTACH`/`RESIZE` payloads and applied to the
/// PTY via `TIOCSWINSZ`. Encoded in the first 8 bytes of the payload union.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WinSize {
    pub rows: u16,
    pub cols: u16,
    pub xpix: u16,
    pub ypix: u16,
}

/// A decoded client → server packet: `{ type, len, payload }`, with the
/// payload held as a fixed-size byte array (no allocation) regardless of
/// which union variant it logically represents.
#[derive(Debug, Clone, Copy)]
pub struct ClientPacket {
    pub ty: u32,
    pub len: u32,
    pub payload: [u8; MAX_CONTENT],
}

impl Default for ClientPacket {
    fn default() -> Self {
        Self {
            ty: 0,
            len: 0,
            payload: [0u8; MAX_CONTENT],
        }
    }
}

impl ClientPacket {
    /// Decoded packet type, or `None` for an unrecognized discriminant (the
    /// per-client pass treats this the same as a recognized-but-ignored
    /// type: mark handled, no further action).
    #[must_use]
    pub fn kind(&self) -> Option<ClientPacketType> {
        ClientPacketType::from_u32(self.ty)
    }

    /// View of the meaningful content bytes for a `Content` packet.
    #[must_use]
    pub fn content_bytes(&self) -> &[u8] {
        let len = (self.len as usize).min(self.payload.len());
        &self.payload[..len]
    }

    /// Window size carried by an `Attach`/`Resize` packet, decoded from the
    /// first 8 bytes of the payload.
    #[must_use]
    pub fn winsize(&self) -> WinSize {
        WinSize {
            rows: u16::from_ne_bytes([self.payload[0], self.payload[1]]),
            cols: u16::from_ne_bytes([self.payload[2], self.payload[3]]),
            xpix: u16::from_ne_bytes([self.payload[4], self.payload[5]]),
            ypix: u16::from_ne_bytes([self.payload[6], self.payload[7]]),
        }
    }

    fn encode_into(&self, buf: &mut [u8; WIRE_SIZE]) {
        buf[0..4].copy_from_slice(&self.ty.to_ne_bytes());
        buf[4..8].copy_from_slice(&self.len.to_ne_bytes());
        buf[HEADER_SIZE..].copy_from_slice(&self.payload);
    }

    fn decode_from(buf: &[u8; WIRE_SIZE]) -> Self {
        let ty = u32::from_ne_bytes(buf[0..4].try_into().expect("4-byte slice"));
        let len = u32::from_ne_bytes(buf[4..8].try_into().expect("4-byte slice"));
        let mut payload = [0u8; MAX_CONTENT];
        payload.copy_from_slice(&buf[HEADER_SIZE..]);
        Self { ty, len, payload }
    }

    /// Build a `Content` packet from message bytes, for use by tests and by
    /// any in-process client harness. Panics if `bytes` exceeds
    /// [`MAX_CONTENT`], which would never happen over the real wire since
    /// the client is bound by the same constant.
    #[must_use]
    pub fn content(bytes: &[u8]) -> Self {
        assert!(bytes.len() <= MAX_CONTENT, "content exceeds MAX_CONTENT");
        let mut payload = [0u8; MAX_CONTENT];
        payload[..bytes.len()].copy_from_slice(bytes);
        Self {
            ty: ClientPacketType::Content as u32,
            len: bytes.len() as u32,
            payload,
        }
    }

    /// Build an `Attach` packet carrying a window size.
    #[must_use]
    pub fn attach(winsize: WinSize) -> Self {
        Self::winsize_packet(ClientPacketType::Attach, winsize)
    }

    /// Build a `Resize` packet carrying a window size.
    #[must_use]
    pub fn resize(winsize: WinSize) -> Self {
        Self::winsize_packet(ClientPacketType::Resize, winsize)
    }

    /// Build a `Detach` packet.
    #[must_use]
    pub fn detach() -> Self {
        Self {
            ty: ClientPacketType::Detach as u32,
            ..Self::default()
        }
    }

    fn winsize_packet(ty: ClientPacketType, winsize: WinSize) -> Self {
        let mut payload = [0u8; MAX_CONTENT];
        payload[0..2].copy_from_slice(&winsize.rows.to_ne_bytes());
        payload[2..4].copy_from_slice(&winsize.cols.to_ne_bytes());
        payload[4..6].copy_from_slice(&winsize.xpix.to_ne_bytes());
        payload[6..8].copy_from_slice(&winsize.ypix.to_ne_bytes());
        Self {
            ty: ty as u32,
            len: 0,
            payload,
        }
    }

    /// Encode to a full [`WIRE_SIZE`]-byte wire record, for tests and any
    /// in-process client harness driving the daemon over a real socket.
    #[must_use]
    pub fn to_wire_bytes(&self) -> [u8; WIRE_SIZE] {
        let mut buf = [0u8; WIRE_SIZE];
        self.encode_into(&mut buf);
        buf
    }
}

/// In-progress receive state: the raw wire bytes seen so far, plus how many
/// have arrived. Decoding into a [`ClientPacket`] only happens once the
/// block is complete (see [`ClientPacketState::decode`]).
///
/// Invariant: `off == WIRE_SIZE` iff the packet is fully received.
#[derive(Clone, Copy)]
pub struct ClientPacketState {
    pub buf: [u8; WIRE_SIZE],
    pub off: usize,
}

impl std::fmt::Debug for ClientPacketState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientPacketState").field("off", &self.off).finish()
    }
}

impl Default for ClientPacketState {
    fn default() -> Self {
        Self {
            buf: [0u8; WIRE_SIZE],
            off: 0,
        }
    }
}

impl ClientPacketState {
    /// Mutable slice over the not-yet-received tail of the wire record,
    /// suitable as the destination of a single `recv`/`try_read` call.
    pub fn remaining_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.off..]
    }

    /// Bytes remaining to complete the current packet.
    #[must_use]
    pub fn remaining(&self) -> usize {
        WIRE_SIZE.saturating_sub(self.off)
    }

    /// Decode the received bytes into a [`ClientPacket`]. Only meaningful
    /// once [`is_input_complete`] is true.
    #[must_use]
    pub fn decode(&self) -> ClientPacket {
        ClientPacket::decode_from(&self.buf)
    }

    /// Reset to receive a fresh packet, discarding any prior contents.
    pub fn reset(&mut self) {
        self.buf = [0u8; WIRE_SIZE];
        self.off = 0;
    }
}

/// Pure predicate: has a full [`ClientPacket`] arrived?
#[must_use]
pub fn is_input_complete(state: &ClientPacketState) -> bool {
    state.off == WIRE_SIZE
}

/// Size of the server-side fixed header: `{ len: u32 }`.
pub const SERVER_HEADER_SIZE: usize = 4;

/// Size of the full fixed server → client wire record, header plus payload
/// capacity — same "whole fixed block, explicit len" discipline as
/// [`WIRE_SIZE`] on the client side: every byte past `len` is undefined
/// padding, but the record is always the same number of bytes on the wire
/// so a reader never needs a length-delimited parser.
pub const SERVER_WIRE_SIZE: usize = SERVER_HEADER_SIZE + MAX_PTY_READ;

/// A server → client wire record: raw PTY output bytes, transmitted whole.
///
/// `buf` holds the *entire* [`SERVER_WIRE_SIZE`]-byte wire record (header
/// plus padded payload), not just the `len` meaningful bytes — fan-out and
/// partial sends both operate on it as one opaque block, mirroring how
/// [`ClientPacketState`] treats its wire buffer.
#[derive(Debug, Clone)]
pub struct ServerPacket {
    pub len: u32,
    pub buf: Vec<u8>,
}

impl ServerPacket {
    /// An empty packet: nothing to send.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            len: 0,
            buf: Vec::new(),
        }
    }

    /// Encode a fresh PTY read into the fixed-size wire record. Panics if
    /// `bytes` exceeds [`MAX_PTY_READ`], which the readiness loop's read
    /// size clamp guarantees never happens.
    #[must_use]
    pub fn from_pty_bytes(bytes: &[u8]) -> Self {
        assert!(bytes.len() <= MAX_PTY_READ, "pty read exceeds MAX_PTY_READ");
        let mut buf = vec![0u8; SERVER_WIRE_SIZE];
        buf[..SERVER_HEADER_SIZE].copy_from_slice(&(bytes.len() as u32).to_ne_bytes());
        buf[SERVER_HEADER_SIZE..SERVER_HEADER_SIZE + bytes.len()].copy_from_slice(bytes);
        Self {
            len: bytes.len() as u32,
            buf,
        }
    }
}

/// In-progress send state for a [`ServerPacket`]. The packet is referenced,
/// not owned, by `Rc` so that a single PTY read's output can be fanned out
/// to every client's output slot without copying — the single-threaded loop
/// makes a plain `Rc` sufficient; no atomic refcount is needed.
///
/// Invariant: `pkt.is_some() && off == pkt.buf.len()` iff fully sent;
/// `pkt.is_none()` or an empty `pkt.buf` means nothing to send.
#[derive(Debug, Clone, Default)]
pub struct ServerPacketState {
    pub pkt: Option<std::rc::Rc<ServerPacket>>,
    pub off: usize,
}

/// Pure predicate: has the assigned [`ServerPacket`] (if any) been fully
/// sent? Completion is measured against the whole wire record (`buf.len()`),
/// not the meaningful-byte count `len` — the padding bytes are transmitted
/// too.
#[must_use]
pub fn is_output_complete(state: &ServerPacketState) -> bool {
    match &state.pkt {
        Some(pkt) => state.off == pkt.buf.len(),
        None => true,
    }
}

/// Pure predicate: is there anything left to send?
#[must_use]
pub fn is_output_nonempty(state: &ServerPacketState) -> bool {
    match &state.pkt {
        Some(pkt) => !pkt.buf.is_empty() && state.off < pkt.buf.len(),
        None => false,
    }
}
