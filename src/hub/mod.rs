//! Daemon filesystem bookkeeping: PID files and the Unix socket rendezvous path.
//!
//! The multiplexer core (see [`crate::server`]) only needs a socket path
//! handed to it; everything about *finding* or *naming* that path for a
//! given session lives here.

pub mod daemon;
