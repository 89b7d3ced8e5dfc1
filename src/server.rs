//! The readiness loop: the event loop that multiplexes the listening
//! socket, the PTY master, and every client socket.
//!
//! One call to [`Server::run`] is the whole daemon's lifetime. Internally
//! it is one async task; `futures_util::future::select_all` stands in for
//! a rebuilt-every-tick `fd_set`/`select()` pair —
//! each tick assembles a fresh vector of armed, already-`Box::pin`ned
//! futures (never carried forward from the previous tick) and awaits
//! whichever source becomes ready first. Everything that source implies
//! (accept, PTY read, a client's receive/send) then runs to completion
//! before the next tick's sources are assembled.
//!
//! There is exactly one suspension point per tick: the `select_all` await.
//! Every read/write issued in response to it is non-blocking.

use std::io::ErrorKind;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use futures_util::future::{select_all, BoxFuture};
use tokio::net::{UnixListener, UnixStream};

use crate::client::{Client, ClientState};
use crate::constants::MAX_PTY_READ;
use crate::packet::{
    is_input_complete, is_output_complete, is_output_nonempty, ClientPacketType, ServerPacket,
    ServerPacketState,
};
use crate::pty::{try_reap, PtyMaster, ReapOutcome};
use crate::queue::InboundQueue;
use crate::signals::SignalFlags;

/// Outcome of a non-blocking I/O attempt, collapsing the
/// "error-or-EOF-or-progress" cases a raw `read`/`write` return encodes
/// into a small enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IoOutcome {
    /// Made forward progress; carries the byte count.
    Progress(usize),
    /// Would have blocked; try again once the fd is ready.
    WouldBlock,
    /// Peer closed the connection (read) / connection is gone (write).
    Eof,
    /// A fatal, non-transient error.
    Error,
}

fn classify_read(result: std::io::Result<usize>) -> IoOutcome {
    match result {
        Ok(0) => IoOutcome::Eof,
        Ok(n) => IoOutcome::Progress(n),
        Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
            IoOutcome::WouldBlock
        }
        Err(_) => IoOutcome::Error,
    }
}

fn classify_write(result: std::io::Result<usize>) -> IoOutcome {
    match result {
        Ok(n) => IoOutcome::Progress(n),
        Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
            IoOutcome::WouldBlock
        }
        Err(_) => IoOutcome::Error,
    }
}

/// Server-owned state for the readiness loop.
pub struct Server {
    listener: UnixListener,
    socket_path: std::path::PathBuf,
    pty: PtyMaster,
    child_pid: libc::pid_t,
    clients: Vec<Client>,
    queue: InboundQueue,
    pty_input: crate::packet::ClientPacketState,
    signals: SignalFlags,
    running: bool,
    exit_code: i32,
    max_pty_read: usize,
    client_timeout: Duration,
}

/// Which source became ready in a given tick.
enum Ready {
    Listener(Option<UnixStream>),
    PtyRead,
    PtyWrite,
    Client(usize),
}

impl Server {
    /// Construct a server ready to run, bound to an already-listening
    /// socket and an already-open PTY master fd.
    #[must_use]
    pub fn new(
        listener: UnixListener,
        socket_path: std::path::PathBuf,
        pty_fd: RawFd,
        child_pid: libc::pid_t,
        signals: SignalFlags,
        queue_capacity: usize,
        max_pty_read: usize,
        client_timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            listener,
            socket_path,
            pty: PtyMaster::from_raw_fd(pty_fd)?,
            child_pid,
            clients: Vec::new(),
            queue: InboundQueue::new(queue_capacity),
            pty_input: crate::packet::ClientPacketState::default(),
            signals,
            running: true,
            exit_code: 0,
            max_pty_read,
            client_timeout,
        })
    }

    /// Run the readiness loop to completion. Returns the process exit code
    /// that should be reported once the loop returns (mirrors the child
    /// shell's own exit status when the shell has exited).
    pub async fn run(mut self) -> Result<i32> {
        loop {
            // Step 1: reap the dead.
            self.reap_disconnected();

            // Steps 4-onward expressed as "assemble this tick's armed set,
            // wait for the first ready one, then dispatch".
            let ready = self.wait_for_ready().await?;

            let mut pty_data = false;
            // Default true: vacuously nothing is blocking a clean shutdown
            // when there are no clients at all. The per-client pass below
            // is the only thing allowed to clear this for a tick that
            // actually has clients with unmet conditions.
            let mut clients_ready = true;

            match ready {
                Ready::Listener(socket) => self.accept_one(socket),
                Ready::PtyRead => {
                    if self.read_pty()? {
                        pty_data = true;
                        clients_ready = false;
                    }
                }
                // Write-readiness alone must never trigger a read: the two
                // directions are gated independently, same as the original's
                // separate read and write fd_sets. `drain_queue_to_pty`
                // below runs unconditionally every tick regardless of which
                // source woke it, so nothing is lost by not acting here.
                Ready::PtyWrite => {}
                Ready::Client(idx) => {
                    // Only the signaled client is serviced this tick; the
                    // others still get their per-client pass below so the
                    // gating predicate (`clients_ready`) and any pending
                    // sends make progress without waiting for their own
                    // individual readiness notification to dispatch a full
                    // pass over the whole list.
                    let _ = idx;
                }
            }

            self.per_client_pass(pty_data, &mut clients_ready).await;
            self.drain_queue_to_pty().await?;

            // Both signal flags are consulted every tick, before the break
            // decision below, so that a child-exit observed in the same
            // tick that also satisfies the drain gate (e.g. the PTY hit EOF
            // and every attached client was already caught up) still gets
            // its real exit status recorded before the loop stops — a
            // `break` that skipped this check could exit with a stale
            // default status instead of the child's actual one.
            if self.signals.shutdown_requested() && self.running {
                self.running = false;
            }
            if self.signals.take_child_exited() {
                self.handle_child_exit();
            }

            if clients_ready && !self.running {
                break;
            }
        }

        self.shutdown();
        Ok(self.exit_code)
    }

    /// Assemble the current tick's armed sources and await the first one
    /// ready. This is the loop's one suspension point.
    async fn wait_for_ready(&self) -> Result<Ready> {
        let mut futures: Vec<BoxFuture<'_, Result<Ready>>> = Vec::new();

        futures.push(Box::pin(async {
            // `accept()` is itself the non-blocking-under-readiness
            // primitive here (there is no separate "wait, then try"
            // pair for listeners the way `try_read`/`try_write` give
            // client sockets one) — a transient accept failure is
            // folded into `Ready::Listener(None)` rather than treated
            // as loop-fatal.
            match self.listener.accept().await {
                Ok((socket, _addr)) => Ok(Ready::Listener(Some(socket))),
                Err(_) => Ok(Ready::Listener(None)),
            }
        }));

        // A new PTY read is armed only when the client list is non-empty,
        // every client (not just the attached ones) is ATTACHED, and every
        // client has fully drained the previous fan-out — a client that is
        // merely CONNECTED (accepted but not yet attached) suspends reads
        // for everyone else exactly as an attached-but-still-sending client
        // does, matching the per-client gate applied in `per_client_pass`.
        let arm_pty_read = !self.clients.is_empty()
            && self
                .clients
                .iter()
                .all(|c| c.is_attached() && is_output_complete(&c.output));
        if arm_pty_read {
            futures.push(Box::pin(async {
                self.pty.readable().await?;
                Ok(Ready::PtyRead)
            }));
        }
        if !self.queue.empty() {
            futures.push(Box::pin(async {
                self.pty.writable().await?;
                Ok(Ready::PtyWrite)
            }));
        }

        for (idx, client) in self.clients.iter().enumerate() {
            if !is_input_complete(&client.input) {
                futures.push(Box::pin(async move {
                    client.socket.readable().await.context("client readiness (read) failed")?;
                    Ok(Ready::Client(idx))
                }));
            }
            if is_output_nonempty(&client.output) {
                futures.push(Box::pin(async move {
                    client.socket.writable().await.context("client readiness (write) failed")?;
                    Ok(Ready::Client(idx))
                }));
            }
        }

        loop {
            match select_all(futures.drain(..)).await.0 {
                Ok(ready) => return Ok(ready),
                Err(e) => {
                    // Interrupted readiness waits are transient; anything
                    // else is loop-fatal per the error taxonomy.
                    if let Some(io_err) = e.downcast_ref::<std::io::Error>() {
                        if io_err.kind() == ErrorKind::Interrupted {
                            continue;
                        }
                    }
                    return Err(e);
                }
            }
        }
    }

    fn accept_one(&mut self, socket: Option<UnixStream>) {
        match socket {
            Some(socket) => {
                let client = Client::new(socket, Instant::now());
                log::info!("accepted client (total now {})", self.clients.len() + 1);
                self.clients.push(client);
            }
            None => {
                // A transient accept error: silently ignored.
            }
        }
    }

    fn read_pty(&mut self) -> Result<bool> {
        // The read amount is configurable (tests shrink it), but the wire
        // record's payload capacity is the compile-time constant — clamp
        // so `ServerPacket::from_pty_bytes` never sees an oversized read.
        let mut buf = vec![0u8; self.max_pty_read.min(MAX_PTY_READ)];
        match classify_read(self.pty.try_read(&mut buf)) {
            IoOutcome::Progress(n) => {
                let pkt = Rc::new(ServerPacket::from_pty_bytes(&buf[..n]));
                for client in &mut self.clients {
                    client.output = ServerPacketState {
                        pkt: Some(Rc::clone(&pkt)),
                        off: 0,
                    };
                    client.last_activity = Instant::now();
                }
                Ok(n > 0)
            }
            IoOutcome::WouldBlock => Ok(false),
            IoOutcome::Eof | IoOutcome::Error => {
                log::warn!("PTY read failed fatally; shutting down");
                self.running = false;
                Ok(false)
            }
        }
    }

    async fn per_client_pass(&mut self, _pty_data_already_applied: bool, clients_ready: &mut bool) {
        let now = Instant::now();
        let client_timeout = self.client_timeout;
        let pty_fd = self.pty.as_raw_fd();
        let child_pid = self.child_pid;

        for client in &mut self.clients {
            if client.is_disconnected() {
                continue;
            }

            Self::receive_step(client);

            if client.is_disconnected() {
                *clients_ready = false;
                continue;
            }

            if is_input_complete(&client.input) {
                let handled = Self::dispatch_input(client, &mut self.queue, pty_fd, child_pid);
                if handled {
                    client.input.reset();
                } // else: backpressure — leave input in place, socket stays dormant for read.
            }

            Self::send_step(client);

            if !is_output_complete(&client.output) {
                if now.duration_since(client.last_activity) > client_timeout {
                    client.state = ClientState::Disconnected;
                } else if is_output_nonempty(&client.output) {
                    *clients_ready = false;
                }
            }

            if !client.is_attached() {
                *clients_ready = false;
            }
        }
    }

    fn receive_step(client: &mut Client) {
        if client.input.remaining() == 0 {
            return;
        }
        let result = client.socket.try_read(client.input.remaining_mut());
        match classify_read(result) {
            IoOutcome::Progress(n) => client.input.off += n,
            IoOutcome::WouldBlock => {}
            IoOutcome::Eof | IoOutcome::Error => client.state = ClientState::Disconnected,
        }
    }

    fn send_step(client: &mut Client) {
        let Some(pkt) = client.output.pkt.clone() else { return };
        if client.output.off >= pkt.buf.len() {
            return;
        }
        let remaining = &pkt.buf[client.output.off..];
        let result = client.socket.try_write(remaining);
        match classify_write(result) {
            IoOutcome::Progress(n) => {
                client.output.off += n;
                client.last_activity = Instant::now();
            }
            IoOutcome::WouldBlock => {}
            IoOutcome::Eof | IoOutcome::Error => client.state = ClientState::Disconnected,
        }
    }

    /// Dispatch a just-completed input packet. Returns whether it was
    /// handled (vs. left in place for backpressure).
    fn dispatch_input(
        client: &mut Client,
        queue: &mut InboundQueue,
        pty_fd: RawFd,
        child_pid: libc::pid_t,
    ) -> bool {
        let pkt = client.input.decode();
        match pkt.kind() {
            Some(ClientPacketType::Content) => queue.enqueue(pkt),
            Some(ClientPacketType::Attach) => {
                client.state = ClientState::Attached;
                Self::apply_winsize(pty_fd, child_pid, pkt.winsize());
                true
            }
            Some(ClientPacketType::Resize) => {
                Self::apply_winsize(pty_fd, child_pid, pkt.winsize());
                true
            }
            Some(ClientPacketType::Redraw) => {
                let _ = crate::pty::signal_window_change(child_pid);
                true
            }
            Some(ClientPacketType::Detach) => {
                client.state = ClientState::Detached;
                true
            }
            None => true,
        }
    }

    fn apply_winsize(pty_fd: RawFd, child_pid: libc::pid_t, winsize: crate::packet::WinSize) {
        let ws = libc::winsize {
            ws_row: winsize.rows,
            ws_col: winsize.cols,
            ws_xpixel: winsize.xpix,
            ws_ypixel: winsize.ypix,
        };
        // SAFETY: pty_fd is the server's own PTY master fd, valid for the
        // server's lifetime; ws is fully initialized.
        unsafe {
            libc::ioctl(pty_fd, libc::TIOCSWINSZ, std::ptr::addr_of!(ws));
        }
        let _ = crate::pty::signal_window_change(child_pid);
    }

    async fn drain_queue_to_pty(&mut self) -> Result<()> {
        while !self.queue.empty() {
            let Some(pkt) = self.queue.peek().copied() else { break };
            let remaining = pkt.content_bytes();
            let off = self.pty_input.off.min(remaining.len());
            let to_write = &remaining[off..];
            if to_write.is_empty() {
                self.queue.dequeue();
                self.pty_input.reset();
                continue;
            }
            match classify_write(self.pty.try_write(to_write)) {
                IoOutcome::Progress(n) => {
                    self.pty_input.off += n;
                    if self.pty_input.off >= remaining.len() {
                        self.queue.dequeue();
                        self.pty_input.reset();
                    }
                }
                IoOutcome::WouldBlock => break,
                IoOutcome::Eof | IoOutcome::Error => {
                    log::warn!("PTY write failed fatally; shutting down");
                    self.running = false;
                    break;
                }
            }
        }
        Ok(())
    }

    fn reap_disconnected(&mut self) {
        self.clients.retain(|c| !c.is_disconnected());
    }

    fn handle_child_exit(&mut self) {
        match try_reap(self.child_pid) {
            Ok(ReapOutcome::Exited(status)) => {
                self.exit_code = crate::pty::exit_code_from_status(status);
                self.running = false;
                log::info!("child exited with code {}", self.exit_code);
            }
            Ok(ReapOutcome::StillRunning) => {}
            Err(e) => log::warn!("waitpid failed: {e}"),
        }
    }

    fn shutdown(&self) {
        crate::hub::daemon::cleanup_on_shutdown(&self.socket_path);
        log::info!("daemon shut down, socket path removed: {}", self.socket_path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_read_maps_zero_to_eof() {
        assert_eq!(classify_read(Ok(0)), IoOutcome::Eof);
        assert_eq!(classify_read(Ok(3)), IoOutcome::Progress(3));
    }

    #[test]
    fn classify_read_maps_would_block_to_would_block() {
        let err = std::io::Error::from(ErrorKind::WouldBlock);
        assert_eq!(classify_read(Err(err)), IoOutcome::WouldBlock);
    }

    #[test]
    fn classify_read_maps_other_errors_to_error() {
        let err = std::io::Error::from(ErrorKind::ConnectionReset);
        assert_eq!(classify_read(Err(err)), IoOutcome::Error);
    }

    #[test]
    fn classify_write_never_reports_eof() {
        assert_eq!(classify_write(Ok(0)), IoOutcome::Progress(0));
    }
}
