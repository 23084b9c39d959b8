//! Podium relay: WebSocket hub for presentation sessions.
//!
//! Configured from the environment (`PODIUM_RELAY_BIND`,
//! `PODIUM_CREDENTIAL`, `PODIUM_RELAY_MAX_CLIENTS`,
//! `PODIUM_RELAY_BROADCAST_CAPACITY`); log level via `RUST_LOG`.

use log::info;

use podium_sync::server::{RelayConfig, RelayServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = RelayConfig::from_env()?;
    info!(
        "Starting Podium relay on {} (max {} clients)",
        config.bind_addr, config.max_clients
    );

    RelayServer::new(config).run().await?;
    Ok(())
}
