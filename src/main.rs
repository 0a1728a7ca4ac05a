//! runcast: streams a file to every TCP client that asks for it.
//!
//! Clients connect and send `run`; the server writes the whole payload
//! and then shuts down its send side. All clients are served from one
//! thread through a readiness multiplexer.
//!
//! Features:
//! - Bounded connection table with rejection on overflow
//! - Non-blocking partial writes resumed across iterations
//! - mio, poll(2), or select(2) readiness backends
//! - Configuration via CLI arguments or TOML file
//! - Graceful shutdown on SIGINT/SIGTERM

mod config;
mod payload;
mod protocol;
mod runtime;

use config::Config;
use payload::Payload;
use runtime::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        backlog = config.backlog,
        max_connections = config.max_connections,
        chunk_size = config.chunk_size,
        multiplexer = ?config.multiplexer,
        payload = %config.payload_path.display(),
        "Starting runcast server"
    );

    let payload = Payload::load(&config.payload_path)?;
    info!(bytes = payload.len(), "Payload loaded");

    let server = Server::bind(&config, payload)?;
    runtime::install_signal_handlers(server.shutdown_handle())?;
    info!(addr = %server.local_addr(), "Stop with SIGINT or SIGTERM");

    server.run()?;
    info!("Server stopped");
    Ok(())
}
