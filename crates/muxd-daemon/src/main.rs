//! muxd Daemon
//!
//! Accepts many clients on one Unix socket and drives every session from a
//! single event loop.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use muxd_core::config::load_config;
use muxd_daemon::server::{Server, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "muxd")]
#[command(version, about = "muxd - multi-client session server on a Unix socket")]
struct Args {
    /// Socket file to create and listen on
    #[arg(env = "MUXD_SOCKET")]
    socket: Option<PathBuf>,

    /// JSON settings file (overrides the global settings file)
    #[arg(long, env = "MUXD_CONFIG")]
    config: Option<PathBuf>,

    /// Log level filter for the daemon (e.g. "info", "debug", "warn").
    #[arg(long, env = "MUXD_LOG_LEVEL")]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "MUXD_LOG_JSON")]
    log_json: bool,

    /// Bounded wait of each readiness poll, in milliseconds
    #[arg(long, env = "MUXD_POLL_TIMEOUT_MS")]
    poll_timeout_ms: Option<u64>,

    /// Sleep after an idle poll, in milliseconds (0 disables)
    #[arg(long, env = "MUXD_IDLE_SLEEP_MS")]
    idle_sleep_ms: Option<u64>,

    /// Largest command accepted in one read, in bytes
    #[arg(long, env = "MUXD_MAX_COMMAND_BYTES")]
    max_command_bytes: Option<usize>,

    /// Give up on a synchronous handshake after this many milliseconds
    #[arg(long, env = "MUXD_HANDSHAKE_TIMEOUT_MS")]
    handshake_timeout_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    if let Some(socket) = args.socket {
        config.daemon.socket_path = Some(socket);
    }
    if let Some(level) = args.log_level {
        config.daemon.log_level = level;
    }
    config.daemon.log_json |= args.log_json;
    if let Some(ms) = args.poll_timeout_ms {
        config.daemon.poll_timeout_ms = ms;
    }
    if let Some(ms) = args.idle_sleep_ms {
        config.daemon.idle_sleep_ms = ms;
    }
    if let Some(max) = args.max_command_bytes {
        config.protocol.max_command_bytes = max;
    }
    if args.handshake_timeout_ms.is_some() {
        config.protocol.handshake_timeout_ms = args.handshake_timeout_ms;
    }

    let log_filter = format!("muxd_daemon={}", config.daemon.log_level);
    muxd_core::tracing_init::init_tracing(&log_filter, config.daemon.log_json);

    let server_config = ServerConfig::from_config(&config)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        socket = %server_config.socket_path.display(),
        poll_timeout_ms = config.daemon.poll_timeout_ms,
        max_command_bytes = server_config.protocol.max_command_bytes,
        "Starting muxd"
    );

    let server = Server::bind(server_config)?;
    let shutdown = server.shutdown_handle();

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    // Notify systemd that the daemon is ready to serve. A no-op when not
    // running under systemd.
    sd_notify::notify(true, &[sd_notify::NotifyState::Ready])?;

    // The loop owns the server from here on; every exit path below goes
    // through its shutdown.
    let mut event_loop = tokio::task::spawn_blocking(move || server.run());

    let result = tokio::select! {
        joined = &mut event_loop => joined?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
            shutdown.trigger();
            event_loop.await?
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM shutdown signal");
            shutdown.trigger();
            event_loop.await?
        }
    };
    result?;

    info!("Daemon stopped");
    Ok(())
}
