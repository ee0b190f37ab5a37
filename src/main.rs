//! taskline: a multi-protocol TCP server
//!
//! Features:
//! - Several protocols per port, selected by the first byte of the first message
//! - Protocols that speak first on ports of their own
//! - A single dispatcher thread that serializes all protocol work
//! - Write and read timeouts with a reference-counted close sequence
//! - Configuration via CLI arguments or TOML file

use taskline::config::Config;
use taskline::protocols;
use taskline::server::Server;
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
        name = %config.name,
        services = config.services.len(),
        write_timeout_ms = config.write_timeout.as_millis() as u64,
        read_timeout_ms = config.read_timeout.map_or(0, |t| t.as_millis() as u64),
        max_connections = config.max_connections,
        "Starting taskline server"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.thread_name("taskline-io").enable_all().build()?;

    let server = Server::new(config, &protocols::builtin_registry())?;
    runtime.block_on(server.run())?;

    info!("Server stopped");
    Ok(())
}
