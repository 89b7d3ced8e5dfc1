//! Server side of a detachable terminal multiplexer daemon.
//!
//! One PTY-backed child process, any number of attaching clients over a
//! Unix domain socket, and a single-task readiness loop ([`server::Server`])
//! that multiplexes all of it without a thread per connection. This crate is
//! the daemon side only — the attaching client is a separate program.

pub mod client;
pub mod config;
pub mod constants;
pub mod env;
pub mod hub;
pub mod packet;
pub mod pty;
pub mod queue;
pub mod server;
pub mod signals;

pub use client::{Client, ClientState};
pub use config::ServerConfig;
pub use packet::{ClientPacket, ClientPacketType, ServerPacket, WinSize};
pub use queue::InboundQueue;
pub use server::Server;
pub use signals::SignalFlags;
