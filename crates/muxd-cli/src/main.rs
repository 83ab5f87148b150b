//! muxd Client
//!
//! Interactive terminal client: answers the greeting, then reads one line
//! from stdin for every prompt the server sends.

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use muxd_cli::input::next_command;
use muxd_cli::{ConnectionConfig, SessionClient};
use muxd_core::protocol::display_payload;

#[derive(Parser, Debug)]
#[command(name = "muxd-client")]
#[command(version, about = "Interactive client for the muxd session server", long_about = None)]
struct Cli {
    /// Socket file the daemon listens on
    #[arg(env = "MUXD_SOCKET")]
    socket: PathBuf,

    /// Acknowledgment sent in reply to the greeting
    #[arg(long, default_value = "THANKS")]
    ack: String,

    /// Command that ends the session
    #[arg(long, default_value = "quit")]
    terminator: String,

    /// Give up waiting for the server after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Log level filter (e.g. "info", "debug")
    #[arg(long, env = "MUXD_LOG_LEVEL", default_value = "warn")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    muxd_core::tracing_init::init_tracing(&format!("muxd_cli={}", cli.log_level), false);

    let config = ConnectionConfig::new(&cli.socket)
        .with_acknowledgment(cli.ack.into_bytes())
        .with_read_timeout(cli.timeout_ms.map(Duration::from_millis));
    let mut client = SessionClient::connect(&config)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "{}", display_payload(client.greeting()))?;

    let mut stdin = io::stdin().lock();
    while let Some(prompt) = client.next_prompt()? {
        write!(out, "{}: ", display_payload(&prompt))?;
        out.flush()?;

        let Some(command) = next_command(&mut stdin)? else {
            info!("stdin closed");
            return Ok(());
        };
        client.send_command(command.as_bytes())?;
        if command == cli.terminator {
            return Ok(());
        }
    }

    writeln!(out, "Server closed the connection")?;
    Ok(())
}
