//! # roomcast server
//!
//! Line-oriented TCP server hosting independent chat rooms.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! roomcast
//!
//! # Run with environment variables
//! ROOMCAST_PORT=6000 ROOMCAST_HOST=0.0.0.0 roomcast
//! ```
//!
//! A client connects, sends a handshake line `<room>:<name>[:<mode>]`,
//! and from then on every line it writes is published to the room's bus
//! and every line the room routes to it is written back.

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roomcast=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting roomcast server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
