//! Fog Gateway — edge processing service for greenhouse IoT telemetry.
//!
//! Validates MQTT-published and CoAP-probed sensor readings (HMAC
//! signature, freshness window, replay protection, per-sensor rate
//! limiting, optional AES-GCM payload decryption) and forwards the ones
//! that pass to a cloud ingest endpoint.

mod aead;
mod broker;
mod canonical;
mod config;
mod control;
mod error;
mod forwarder;
mod metrics;
mod models;
mod noncecache;
mod probe;
mod ratelimit;
mod signature;
mod timegate;
mod token;
mod validator;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::broker::Broker;
use crate::config::Config;
use crate::control::AppState;
use crate::forwarder::Forwarder;
use crate::metrics::Metrics;
use crate::probe::Probe;
use crate::ratelimit::RateLimiter;
use crate::token::TokenMinter;
use crate::validator::Validator;

/// Bounded channel capacity between producers (broker, control-plane poll)
/// and the forwarder. Overflow drops the newest record.
const FORWARD_QUEUE_CAPACITY: usize = 1000;
/// Time allowed to drain the forwarder queue after a shutdown signal before
/// the process force-closes.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "fog_gateway=info,tower_http=info".into()))
        .json()
        .init();

    let config = match Config::from_env() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };
    info!(host = %config.host, port = config.port, sensors = config.security.sensor_hmac_keys.len(), "starting fog gateway");

    let metrics = Arc::new(Metrics::default());

    let rate_limiter = RateLimiter::new(
        config.rate_limit.messages_per_minute,
        config.rate_limit.burst_capacity,
        config.rate_limit.algorithm,
    );
    let validator = Arc::new(Validator::new(config.security.clone(), rate_limiter, metrics.clone()));
    let token_minter = Arc::new(TokenMinter::new(config.security.jwt_secret.clone(), "fog"));
    let probe = Arc::new(Probe::new(validator.clone()));

    let forwarder = match Forwarder::new(config.cloud.clone(), token_minter, metrics.clone()) {
        Ok(f) => Arc::new(f),
        Err(e) => {
            error!(error = %e, "failed to build cloud HTTP client");
            std::process::exit(1);
        }
    };

    let (forward_tx, forward_rx) = mpsc::channel(FORWARD_QUEUE_CAPACITY);

    let broker = Broker::new(config.mqtt.clone(), validator.clone(), forward_tx.clone(), metrics.clone());
    let broker_handle = tokio::spawn(async move { broker.run().await });

    let forwarder_for_task = forwarder.clone();
    let forwarder_handle = tokio::spawn(async move { forwarder_for_task.run(forward_rx).await });

    let state = AppState {
        config: config.clone(),
        validator: validator.clone(),
        probe: probe.clone(),
        forward_tx: forward_tx.clone(),
        metrics: metrics.clone(),
        started_at: Instant::now(),
    };
    // Our own handle is no longer needed; the broker and control-plane
    // state each hold a clone, and the channel only closes once those do.
    drop(forward_tx);

    let app = control::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, %addr, "failed to bind control plane listener");
            std::process::exit(1);
        }
    };
    info!(%addr, "control plane listening");

    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await {
        error!(error = %e, "control plane server error");
    }

    info!("shutdown signal received, stopping broker");
    broker_handle.abort();

    info!(timeout_secs = SHUTDOWN_DRAIN_TIMEOUT.as_secs(), "draining forwarder queue");
    match tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, forwarder_handle).await {
        Ok(Ok(())) => info!("forwarder drained cleanly"),
        Ok(Err(e)) => error!(error = %e, "forwarder task panicked"),
        Err(_) => error!("forwarder drain timed out, forcing shutdown"),
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
    info!("ctrl-c received");
}
