//! # Beacon Server
//!
//! Real-time event distribution broker.
//!
//! Three listeners share one broker: a publisher socket for trusted
//! internal callers, a subscriber push socket, and a long-poll HTTP
//! endpoint for clients without WebSocket support.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! beacon
//!
//! # Run with a config file in the working directory
//! beacon  # reads beacon.toml if present
//!
//! # Run with environment variables
//! BEACON_HTTP_PORT=8080 BEACON_HTTP_HOST=0.0.0.0 beacon
//! ```

mod config;
mod longpoll;
mod metrics;
mod publisher;
mod state;
mod subscriber;

use anyhow::{Context, Result};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beacon=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    // Initialize metrics
    if config.metrics.enabled {
        metrics::init_metrics();
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            tracing::error!("Failed to start metrics server: {}", e);
        }
    }

    let state = Arc::new(AppState::new(config.clone()));

    tokio::try_join!(
        serve(
            "publisher",
            config.publisher.addr(),
            publisher::router(state.clone())
        ),
        serve(
            "subscriber",
            config.subscriber.addr(),
            subscriber::router(state.clone())
        ),
        serve("long-poll", config.http.addr(), longpoll::router(state)),
    )?;

    Ok(())
}

/// Bind one listener and serve its router. A bind failure aborts startup.
async fn serve(name: &'static str, addr: SocketAddr, app: Router) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {name} listener on {addr}"))?;

    info!("{} listening on {}", name, addr);

    axum::serve(listener, app)
        .await
        .with_context(|| format!("{name} listener failed"))?;

    Ok(())
}
