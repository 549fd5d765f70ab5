//! Connect to a real hub, log in, and print a few listings.
//!
//! Reads `WS_URL`, `SPRUT_LOGIN`, `SPRUT_PASSWORD` and `SPRUT_SERIAL` from the
//! environment or a `.env` file.
//!
//! ```bash
//! RUST_LOG=sprut_client=debug cargo run -p sprut-client --example hub_smoke
//! ```

use std::time::Duration;

use sprut_client::{SessionClient, SessionConfig, SessionEvent};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let client = SessionClient::new(SessionConfig::from_env()?)?;
    let mut events = client.events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SessionEvent::Connected { epoch } => info!(%epoch, "connected"),
                SessionEvent::Disconnected { epoch, reason } => {
                    warn!(%epoch, %reason, "disconnected")
                }
                SessionEvent::Unsolicited(value) => info!(%value, "hub event"),
            }
        }
    });

    tokio::time::timeout(Duration::from_secs(10), client.connected()).await??;

    let version = client.version().await?;
    info!(data = ?version.data, "server.version");

    let hubs = client.list_hubs().await?;
    info!(data = ?hubs.data, "hub.list");

    let rooms = client.list_rooms().await?;
    info!(data = ?rooms.data, "room.list");

    let metrics = client.metrics().snapshot();
    info!(?metrics, "session counters");

    client.close().await?;
    Ok(())
}
