//! Control Plane — health, metrics, sanitized config, and on-demand
//! CoAP probing over HTTP.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::warn;

use crate::config::Config;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::models::{ProcessedTelemetry, SecurityEvent};
use crate::probe::Probe;
use crate::ratelimit::SensorStats;
use crate::validator::Validator;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub validator: Arc<Validator>,
    pub probe: Arc<Probe>,
    pub forward_tx: mpsc::Sender<ProcessedTelemetry>,
    pub metrics: Arc<Metrics>,
    pub started_at: Instant,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/config", get(config_view))
        .route("/coap/poll", post(coap_poll))
        .route("/sensors/:sensor_id/current", get(sensor_current))
        .with_state(state)
}

fn round2(secs: f64) -> f64 {
    (secs * 100.0).round() / 100.0
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "uptime_seconds": round2(state.started_at.elapsed().as_secs_f64()),
    }))
}

#[derive(Serialize)]
struct MetricsResponse {
    uptime_seconds: f64,
    nonce_cache_size: usize,
    rate_limit: std::collections::BTreeMap<String, SensorStats>,
    counters: MetricsSnapshot,
}

async fn metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        uptime_seconds: round2(state.started_at.elapsed().as_secs_f64()),
        nonce_cache_size: state.validator.nonce_cache_len(),
        rate_limit: state.validator.rate_limiter().all_stats(),
        counters: state.metrics.snapshot(),
    })
}

async fn config_view(State(state): State<AppState>) -> Json<serde_json::Value> {
    let c = &state.config;
    Json(json!({
        "mqtt": {
            "host": c.mqtt.host,
            "port": c.mqtt.port,
            "secure_port": c.mqtt.secure_port,
            "use_tls": c.mqtt.use_tls,
        },
        "security": {
            "enable_signature_verification": c.security.enable_signature_verification,
            "enable_timestamp_validation": c.security.enable_timestamp_validation,
            "enable_nonce_validation": c.security.enable_nonce_validation,
            "enable_rate_limiting": c.security.enable_rate_limiting,
            "timestamp_window_seconds": c.security.timestamp_window_seconds,
            "nonce_cache_size": c.security.nonce_cache_size,
        },
        "rate_limit": {
            "messages_per_minute": c.rate_limit.messages_per_minute,
            "burst_capacity": c.rate_limit.burst_capacity,
        },
        "cloud": {
            "url": c.cloud.url,
            "timeout_seconds": c.cloud.timeout_seconds,
        },
    }))
}

#[derive(Serialize)]
struct PollResult {
    sensor_id: String,
    valid: bool,
    value: Option<f64>,
    errors: Vec<String>,
}

async fn coap_poll(State(state): State<AppState>) -> Json<serde_json::Value> {
    let results = state.probe.poll_sensors(&state.config.sensor_endpoints).await;
    let mut valid_readings = 0;
    let mut rendered = Vec::with_capacity(results.len());

    for (sensor_id, verdict) in results {
        match verdict {
            Some(v) if v.ok => {
                valid_readings += 1;
                if let Some(processed) = v.processed {
                    let value = processed.value;
                    if state.forward_tx.try_send(processed).is_err() {
                        state.metrics.record_back_pressure();
                        let event = SecurityEvent::new(
                            "security.back_pressure",
                            "WARNING",
                            sensor_id.as_str(),
                            json!({"queue": "forwarder"}),
                        );
                        warn!(event_type = %event.event_type, severity = event.severity, sensor_id = %event.sensor_id, details = %event.details, "security_event");
                    }
                    rendered.push(PollResult { sensor_id, valid: true, value: Some(value), errors: vec![] });
                }
            }
            Some(v) => rendered.push(PollResult { sensor_id, valid: false, value: None, errors: v.errors }),
            None => rendered.push(PollResult {
                sensor_id,
                valid: false,
                value: None,
                errors: vec!["no response".into()],
            }),
        }
    }

    Json(json!({
        "message": format!("polled {} sensors", state.config.sensor_endpoints.len()),
        "valid_readings": valid_readings,
        "results": rendered,
    }))
}

async fn sensor_current(State(state): State<AppState>, Path(sensor_id): Path<String>) -> impl IntoResponse {
    let Some(endpoint) = state.config.sensor_endpoints.iter().find(|e| e.sensor_id == sensor_id) else {
        return (StatusCode::NOT_FOUND, Json(json!({"error": format!("unknown sensor: {sensor_id}")}))).into_response();
    };

    match state.probe.get_sensor_reading(endpoint, "current").await {
        Some(verdict) if verdict.ok => {
            let processed = verdict.processed.expect("ok verdict carries a processed record");
            (
                StatusCode::OK,
                Json(json!({
                    "sensor_id": processed.sensor_id,
                    "timestamp": processed.timestamp.to_rfc3339(),
                    "type": processed.sensor_type,
                    "value": processed.value,
                    "unit": processed.unit,
                    "security_validated": processed.validation.signature && processed.validation.timestamp,
                })),
            )
                .into_response()
        }
        Some(verdict) => (StatusCode::BAD_REQUEST, Json(json!({"errors": verdict.errors}))).into_response(),
        None => (StatusCode::BAD_GATEWAY, Json(json!({"error": "failed to get reading"}))).into_response(),
    }
}
