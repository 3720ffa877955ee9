//! EmberKV server binary.

use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use emberkv::{Server, DEFAULT_PORT};

#[derive(Parser, Debug)]
#[command(name = "emberkv", version, about = "Minimal in-memory key-value server")]
struct Args {
    /// The port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let server = Server::bind(args.port)
        .await
        .context("failed to start server")?;

    let shutdown = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl-c");
        info!("Shutdown signal received");
    };

    tokio::select! {
        _ = server.run() => {}
        _ = shutdown => {
            server.shutdown();
        }
    }

    let stats = server.stats();
    info!(
        connections = stats.connections_accepted.load(Ordering::Relaxed),
        commands = stats.commands_processed.load(Ordering::Relaxed),
        keys = server.current_size(),
        "Server shutdown complete"
    );

    Ok(())
}
