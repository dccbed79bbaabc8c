//! Voice Matchmaking Server - Entry Point
//!
//! Loads configuration, starts the Matchmaker actor and accepts
//! WebSocket connections.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use voice_match::{
    handle_connection, ChannelNotifier, Config, DailyProvisioner, Matchmaker, RoomProvisioner,
    StaticProvisioner,
};

/// Channel buffer size for matchmaker commands
const CHANNEL_BUFFER_SIZE: usize = 256;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=voice_match=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("voice_match=info")),
        )
        .init();

    let provisioner: Arc<dyn RoomProvisioner> = match &config.daily_api_key {
        Some(api_key) => {
            info!("Provisioning rooms on {}.daily.co", config.daily_domain);
            Arc::new(DailyProvisioner::new(
                api_key.clone(),
                config.daily_domain.clone(),
                config.room_expiry,
            )?)
        }
        None => {
            warn!("DAILY_API_KEY not set, handing out unprovisioned room URLs");
            Arc::new(StaticProvisioner::new(config.daily_domain.clone()))
        }
    };

    // Start TCP listener
    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("Voice matchmaking server listening on {}", config.bind_addr);

    let notifier = Arc::new(ChannelNotifier::new());
    let matchmaker = Matchmaker::spawn(
        provisioner,
        notifier.clone(),
        config.match_timeout,
        CHANNEL_BUFFER_SIZE,
    );

    info!("Matchmaker actor started");

    // Connection accept loop
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("New connection from {}", addr);
                let matchmaker = matchmaker.clone();
                let notifier = notifier.clone();

                // Spawn handler task for each connection
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, matchmaker, notifier).await {
                        error!("Connection handler error: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
