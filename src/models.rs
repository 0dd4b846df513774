//! Telemetry data models.
//!
//! Unknown fields on `RawEnvelope` are preserved via `#[serde(flatten)]`
//! into `extra` so the canonicalizer signs them too instead of silently
//! dropping them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EncryptedData {
    pub ciphertext: String,
    pub nonce: String,
}

/// The envelope exactly as it arrives on the bus or in a probe response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawEnvelope {
    pub sensor_id: String,
    pub ts: String,
    #[serde(rename = "type")]
    pub sensor_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub nonce: String,
    #[serde(default)]
    pub enc: bool,
    pub ver: i64,
    pub sig: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_data: Option<EncryptedData>,
    /// Any fields beyond the ones named above — still part of the signed
    /// content, and must not fail verification just for being unrecognized.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

pub const KNOWN_SENSOR_TYPES: &[&str] = &["temperature", "humidity", "wind"];

/// Immutable record emitted when validation passes.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedTelemetry {
    pub sensor_id: String,
    pub timestamp: DateTime<Utc>,
    pub sensor_type: String,
    pub value: f64,
    pub unit: String,
    pub nonce: String,
    pub decrypted: bool,
    pub validation: ValidationFlags,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ValidationFlags {
    pub signature: bool,
    pub timestamp: bool,
    pub nonce: bool,
    pub rate: bool,
}

/// DTO sent to the cloud ingest endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CloudTelemetryDto {
    pub sensor_id: String,
    pub timestamp: String,
    pub sensor_type: String,
    pub value: f64,
    pub unit: String,
    pub fog_processed_at: String,
    pub security_validated: bool,
}

impl CloudTelemetryDto {
    pub fn from_processed(t: &ProcessedTelemetry) -> Self {
        let v = &t.validation;
        Self {
            sensor_id: t.sensor_id.clone(),
            timestamp: t.timestamp.to_rfc3339(),
            sensor_type: t.sensor_type.clone(),
            value: t.value,
            unit: t.unit.clone(),
            fog_processed_at: Utc::now().to_rfc3339(),
            security_validated: v.signature && v.timestamp && v.nonce && v.rate,
        }
    }
}

/// A diagnostic-only security event; never forwarded as telemetry.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityEvent {
    pub event_type: String,
    pub severity: &'static str,
    pub sensor_id: String,
    pub details: Value,
}

impl SecurityEvent {
    pub fn new(event_type: impl Into<String>, severity: &'static str, sensor_id: impl Into<String>, details: Value) -> Self {
        Self { event_type: event_type.into(), severity, sensor_id: sensor_id.into(), details }
    }
}
