//! # Chatterbox Server
//!
//! Room-scoped realtime chat relay over WebSockets.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! chatterbox
//!
//! # Run with environment variables
//! CHATTERBOX_PORT=9000 CHATTERBOX_HOST=0.0.0.0 chatterbox
//! ```

use anyhow::Result;
use chatterbox_server::{config, handlers, metrics};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatterbox=debug,chatterbox_core=debug,chatterbox_server=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    tracing::info!(
        "Starting Chatterbox server on {}:{}",
        config.host,
        config.port
    );

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
