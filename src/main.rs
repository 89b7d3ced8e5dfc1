//! Daemon entry point: config, logging, PTY acquisition, socket bind, signal
//! registration, then handing everything to the readiness loop.

use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixListener as StdUnixListener;

use anyhow::{Context, Result};
use dtachd::{hub, ServerConfig, SignalFlags};
use portable_pty::{native_pty_system, CommandBuilder, PtySize};

fn init_logging() {
    let log_path = if let Ok(path) = std::env::var("DTACHD_LOG_FILE") {
        std::path::PathBuf::from(path)
    } else if let Ok(dir) = std::env::var("DTACHD_CONFIG_DIR") {
        std::path::PathBuf::from(dir).join("dtachd.log")
    } else if dtachd::env::is_any_test() {
        std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tmp/dtachd.log")
    } else {
        std::env::temp_dir().join(format!("dtachd-{}.log", std::process::id()))
    };

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = match std::fs::File::create(&log_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("failed to create log file at {log_path:?}: {e}, logging to stderr");
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
                .format_timestamp_secs()
                .init();
            return;
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .format_timestamp_secs()
        .init();
}

/// Flip `O_NONBLOCK` on a raw fd. The PTY master fd from `portable-pty` is
/// opened blocking; the readiness loop requires every fd it polls to be
/// non-blocking so a `try_read`/`try_write` can never stall the one task.
fn set_nonblocking(fd: std::os::unix::io::RawFd) -> std::io::Result<()> {
    // SAFETY: `fd` is a valid, open fd for the duration of this call.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error());
    }
    // SAFETY: `fd` is a valid, open fd for the duration of this call.
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

fn main() -> Result<()> {
    let config = ServerConfig::load().context("failed to load daemon configuration")?;

    init_logging();
    log::info!("dtachd starting, socket path {}", config.socket_path.display());

    // Acquire the PTY and spawn the child shell.
    let pty_system = native_pty_system();
    let pty_pair = pty_system
        .openpty(PtySize {
            rows: 24,
            cols: 80,
            pixel_width: 0,
            pixel_height: 0,
        })
        .context("failed to open PTY")?;

    let mut cmd = CommandBuilder::new(&config.shell[0]);
    for arg in &config.shell[1..] {
        cmd.arg(arg);
    }
    let child = pty_pair
        .slave
        .spawn_command(cmd)
        .context("failed to spawn child shell")?;
    let child_pid = child
        .process_id()
        .context("child shell has no process id")? as libc::pid_t;
    // The slave side belongs to the child now; the daemon only ever touches
    // the master.
    drop(pty_pair.slave);

    let pty_fd = pty_pair
        .master
        .as_raw_fd()
        .context("PTY master has no raw fd on this platform")?;
    set_nonblocking(pty_fd).context("failed to set PTY master non-blocking")?;
    // The daemon's one owner of this fd going forward is `PtyMaster`
    // (constructed inside `Server::new`); leak the box here so the
    // `portable_pty::MasterPty` destructor never closes it out from under
    // the loop.
    std::mem::forget(pty_pair.master);

    // Bind the rendezvous socket, clearing anything a dead prior daemon left
    // behind first.
    hub::daemon::cleanup_stale(&config.socket_path);
    if let Some(parent) = config.socket_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let std_listener = StdUnixListener::bind(&config.socket_path)
        .with_context(|| format!("failed to bind socket at {}", config.socket_path.display()))?;
    std_listener
        .set_nonblocking(true)
        .context("failed to set listener non-blocking")?;

    hub::daemon::write_pid_file(&config.socket_path)?;

    let signals = SignalFlags::install().context("failed to install signal handlers")?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    let exit_code = runtime.block_on(async move {
        let listener = tokio::net::UnixListener::from_std(std_listener)
            .context("failed to hand listener to the async runtime")?;
        let server = dtachd::Server::new(
            listener,
            config.socket_path.clone(),
            pty_fd,
            child_pid,
            signals,
            config.queue_capacity,
            config.max_pty_read,
            config.client_timeout(),
        )?;
        server.run().await
    })?;

    log::info!("dtachd exiting with code {exit_code}");
    std::process::exit(exit_code);
}
