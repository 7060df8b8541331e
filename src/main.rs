//! tagrpc: reactor server for a tag-delimited request/response protocol
//!
//! Features:
//! - Incremental framing of fragmented or coalesced messages
//! - Asynchronous responses spliced into the request envelope
//! - Unsolicited events to one connection or all of them
//! - Configuration via CLI arguments or TOML file
//!
//! The binary answers every request with the built-in echo handler.

use tagrpc::{Config, EchoHandler, Server};
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
        listen = %config.listen,
        max_connections = config.max_connections,
        read_chunk = config.read_chunk,
        "Starting tagrpc server"
    );

    let mut server = Server::bind(&config)?;
    let mut handler = EchoHandler::new(server.response_sender());
    server.run(&mut handler)?;
    Ok(())
}
