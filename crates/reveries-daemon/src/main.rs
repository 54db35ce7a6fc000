//! `reveriesd` — the Reveries background daemon binary.

mod clients;
mod config;
mod conversation;
mod ipc;
mod lifecycle;
mod protocol;

use std::path::PathBuf;

use clap::Parser;

/// Gives a conversational model episodic memory, associative recall, and a
/// self-driven inner monologue, served over a local Unix socket.
#[derive(Parser, Debug)]
#[command(name = "reveriesd", version, about)]
struct Cli {
    /// Path to the Unix socket clients connect through. Defaults to
    /// `<data dir>/reveries.sock`.
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Directory holding the SQLite store and PID file. Defaults to
    /// `$REVERIES_HOME` or the platform data directory.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Path to a JSON config file. Defaults to `<home dir>/config.json`.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = lifecycle::run(cli.data_dir, cli.socket, cli.config).await {
        tracing::error!(error = %e, "reveriesd exited with an error");
        std::process::exit(1);
    }

    Ok(())
}
