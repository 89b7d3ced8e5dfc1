//! Shared harness for driving a real `Server` end to end over a real PTY
//! and a real Unix socket, in-process, instead of as a spawned subprocess.
//!
//! The loop's client list holds `Rc`-shared output packets (single-threaded
//! by design), so `Server` is not `Send` and can't be handed to
//! `tokio::spawn`. Each test instead runs the whole loop on its own OS
//! thread with its own dedicated current-thread runtime, exactly the way
//! `main.rs` runs it in production; the test's own async runtime only ever
//! talks to the daemon through the Unix socket and the `SignalFlags`, never
//! by touching `Server` itself.

use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use dtachd::packet::{ClientPacket, SERVER_HEADER_SIZE, SERVER_WIRE_SIZE};
use dtachd::SignalFlags;
use portable_pty::{native_pty_system, Child, CommandBuilder, PtySize};
use tempfile::TempDir;
use tokio::net::UnixStream;

fn set_nonblocking(fd: std::os::unix::io::RawFd) {
    // SAFETY: `fd` is a valid, open fd for the duration of this call.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
    }
}

/// A running daemon under test: its socket path, child pid, signal flags
/// (settable directly so tests can simulate signal delivery without
/// depending on real, process-global OS signal timing), and a handle to
/// the thread hosting the loop so the test can wait for its exit code.
pub struct TestDaemon {
    pub socket_path: PathBuf,
    pub child_pid: libc::pid_t,
    pub signals: SignalFlags,
    thread: Option<std::thread::JoinHandle<anyhow::Result<i32>>>,
    _tempdir: TempDir,
    _child: Box<dyn Child + Send + Sync>,
}

impl TestDaemon {
    /// Block until the daemon's loop returns, yielding its exit code.
    ///
    /// Runs the wait on a blocking-friendly helper thread so the caller's
    /// own async runtime keeps making progress (e.g. driving a client
    /// socket concurrently) while this waits.
    pub async fn wait_for_exit(&mut self) -> anyhow::Result<i32> {
        let handle = self.thread.take().expect("wait_for_exit called twice");
        tokio::task::spawn_blocking(move || handle.join().expect("daemon thread panicked"))
            .await
            .expect("join task panicked")
    }
}

/// Options narrowing the defaults for a single test: a short client
/// timeout so idle-eviction tests don't need to wait the real two minutes,
/// and a shrunk `max_pty_read` so chunking can be exercised without a
/// multi-kilobyte payload.
pub struct DaemonOptions {
    pub client_timeout: Duration,
    pub queue_capacity: usize,
    pub max_pty_read: usize,
}

impl Default for DaemonOptions {
    fn default() -> Self {
        Self {
            client_timeout: Duration::from_secs(120),
            queue_capacity: 32,
            max_pty_read: 4096,
        }
    }
}

/// Start a daemon with `shell` as its child command, bound to a fresh
/// socket under a fresh temp directory. The loop runs on its own thread;
/// this returns once the socket is bound and ready to accept.
pub fn start_daemon(shell: &[&str], opts: DaemonOptions) -> TestDaemon {
    let tempdir = TempDir::new().expect("tempdir");
    let socket_path = tempdir.path().join("dtachd-test.sock");

    let pty_system = native_pty_system();
    let pty_pair = pty_system
        .openpty(PtySize {
            rows: 24,
            cols: 80,
            pixel_width: 0,
            pixel_height: 0,
        })
        .expect("open pty");

    let mut cmd = CommandBuilder::new(shell[0]);
    for arg in &shell[1..] {
        cmd.arg(arg);
    }
    let child = pty_pair.slave.spawn_command(cmd).expect("spawn child");
    let child_pid = child.process_id().expect("child has a pid") as libc::pid_t;
    drop(pty_pair.slave);

    let pty_fd = pty_pair.master.as_raw_fd().expect("pty master has a raw fd");
    set_nonblocking(pty_fd);
    std::mem::forget(pty_pair.master);

    let std_listener = std::os::unix::net::UnixListener::bind(&socket_path).expect("bind socket");
    std_listener.set_nonblocking(true).expect("nonblocking listener");

    let signals = SignalFlags {
        child_exited: Arc::new(AtomicBool::new(false)),
        shutdown_requested: Arc::new(AtomicBool::new(false)),
    };

    let thread_signals = signals.clone();
    let thread_socket_path = socket_path.clone();
    let (ready_tx, ready_rx) = mpsc::channel::<()>();

    let thread = std::thread::spawn(move || -> anyhow::Result<i32> {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
        runtime.block_on(async move {
            let listener = tokio::net::UnixListener::from_std(std_listener)?;
            let server = dtachd::Server::new(
                listener,
                thread_socket_path,
                pty_fd,
                child_pid,
                thread_signals,
                opts.queue_capacity,
                opts.max_pty_read,
                opts.client_timeout,
            )?;
            let _ = ready_tx.send(());
            server.run().await
        })
    });

    ready_rx.recv_timeout(Duration::from_secs(5)).expect("daemon thread failed to start");

    TestDaemon {
        socket_path,
        child_pid,
        signals,
        thread: Some(thread),
        _tempdir: tempdir,
        _child: child,
    }
}

/// Connect a fresh client socket to a running daemon.
pub async fn connect(daemon: &TestDaemon) -> UnixStream {
    UnixStream::connect(&daemon.socket_path).await.expect("connect to daemon socket")
}

/// Send one fixed-size client wire record.
pub async fn send(stream: &mut UnixStream, pkt: ClientPacket) {
    use tokio::io::AsyncWriteExt;
    stream.write_all(&pkt.to_wire_bytes()).await.expect("write client packet");
}

/// Receive exactly one fixed-size server wire record and return its
/// meaningful payload bytes (the `len`-prefixed slice, not the padding).
pub async fn recv(stream: &mut UnixStream) -> Vec<u8> {
    use tokio::io::AsyncReadExt;
    let mut buf = vec![0u8; SERVER_WIRE_SIZE];
    stream.read_exact(&mut buf).await.expect("read server packet");
    let len = u32::from_ne_bytes(buf[..SERVER_HEADER_SIZE].try_into().expect("4-byte slice")) as usize;
    buf[SERVER_HEADER_SIZE..SERVER_HEADER_SIZE + len].to_vec()
}

/// Receive server packets, accumulating their payloads, until `predicate`
/// is satisfied by the accumulated bytes or `timeout` elapses (panicking
/// in the latter case with whatever was collected so far).
///
/// Several scenarios fan a single logical write out across more than one
/// `ServerPacket` generation (chunked PTY reads, a busy child producing
/// output on its own schedule), so tests assert on "eventually contains",
/// not on a single `recv()` call lining up with a single write.
pub async fn recv_until(
    stream: &mut UnixStream,
    timeout: Duration,
    predicate: impl Fn(&[u8]) -> bool,
) -> Vec<u8> {
    let mut acc = Vec::new();
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            panic!(
                "timed out waiting for condition; collected {} bytes: {:?}",
                acc.len(),
                String::from_utf8_lossy(&acc)
            );
        }
        let chunk = tokio::time::timeout(remaining, recv(stream))
            .await
            .unwrap_or_else(|_| panic!("timed out receiving a server packet; collected so far: {:?}", String::from_utf8_lossy(&acc)));
        acc.extend_from_slice(&chunk);
        if predicate(&acc) {
            return acc;
        }
    }
}

/// Wait for `stream` to report EOF (the server has dropped this client's
/// socket), within `timeout`. Returns `false` on timeout instead of
/// panicking, since a few tests want to assert non-disconnection too.
pub async fn wait_for_eof(stream: &mut UnixStream, timeout: Duration) -> bool {
    use tokio::io::AsyncReadExt;
    let mut byte = [0u8; 1];
    loop {
        match tokio::time::timeout(timeout, stream.read(&mut byte)).await {
            Ok(Ok(0)) => return true,
            Ok(Ok(_)) => continue, // stray data; keep waiting for the actual close
            Ok(Err(_)) => return true,
            Err(_) => return false,
        }
    }
}
