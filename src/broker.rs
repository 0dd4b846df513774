//! MQTT Broker Worker — subscribes to sensor telemetry and validates it.
//!
//! Owns the broker connection on a single poll loop, reconnecting with
//! capped exponential backoff and re-subscribing on every new connection.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, Transport};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};

use crate::config::MqttConfig;
use crate::metrics::Metrics;
use crate::models::{ProcessedTelemetry, SecurityEvent};
use crate::validator::{ValidationContext, Validator};

const TELEMETRY_TOPIC: &str = "greenhouse/+/telemetry";
const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub struct Broker {
    config: MqttConfig,
    validator: Arc<Validator>,
    forward_tx: mpsc::Sender<ProcessedTelemetry>,
    metrics: Arc<Metrics>,
}

impl Broker {
    pub fn new(
        config: MqttConfig,
        validator: Arc<Validator>,
        forward_tx: mpsc::Sender<ProcessedTelemetry>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { config, validator, forward_tx, metrics }
    }

    /// Runs until the process is torn down. Reconnects with exponential
    /// backoff (base 1s, cap 30s) and re-subscribes on every new connection.
    #[instrument(skip(self))]
    pub async fn run(&self) {
        let mut backoff = Duration::from_secs(1);
        loop {
            let port = if self.config.use_tls { self.config.secure_port } else { self.config.port };
            let mut opts = MqttOptions::new("fog-service", self.config.host.clone(), port);
            opts.set_keep_alive(Duration::from_secs(60));
            if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
                opts.set_credentials(user.clone(), pass.clone());
            }
            if self.config.use_tls {
                opts.set_transport(Transport::tls_with_default_config());
            }

            let (client, mut eventloop) = AsyncClient::new(opts, 256);

            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!(host = %self.config.host, "connected to mqtt broker");
                        if let Err(e) = client.subscribe(TELEMETRY_TOPIC, QoS::AtLeastOnce).await {
                            error!(error = %e, "subscribe failed after connect");
                        } else {
                            info!(topic = TELEMETRY_TOPIC, "subscribed");
                        }
                        backoff = Duration::from_secs(1);
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        self.handle_publish(&publish.topic, &publish.payload);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, backoff_secs = backoff.as_secs(), "mqtt connection lost, reconnecting");
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                        break;
                    }
                }
            }
        }
    }

    /// Processes one publish synchronously on the poll loop, preserving
    /// arrival order across sensors.
    fn handle_publish(&self, topic: &str, payload: &[u8]) {
        let Some(topic_sensor_id) = sensor_id_from_topic(topic) else {
            warn!(topic, "invalid telemetry topic format");
            return;
        };

        let envelope: crate::models::RawEnvelope = match serde_json::from_slice(payload) {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, sensor_id = topic_sensor_id, "malformed telemetry payload");
                return;
            }
        };

        if envelope.sensor_id != topic_sensor_id {
            let event = SecurityEvent::new(
                "security.identity_spoof",
                "ERROR",
                topic_sensor_id,
                json!({"topic_sensor_id": topic_sensor_id, "envelope_sensor_id": envelope.sensor_id}),
            );
            warn!(event_type = %event.event_type, severity = event.severity, sensor_id = %event.sensor_id, details = %event.details, "security_event");
            return;
        }

        let verdict = self.validator.validate(envelope, ValidationContext::broker());
        for event in &verdict.security_events {
            warn!(event_type = %event.event_type, severity = event.severity, sensor_id = %event.sensor_id, details = %event.details, "security_event");
        }

        if !verdict.ok {
            warn!(sensor_id = topic_sensor_id, errors = ?verdict.errors, "telemetry validation failed");
            return;
        }

        if let Some(processed) = verdict.processed {
            if self.forward_tx.try_send(processed).is_err() {
                self.metrics.record_back_pressure();
                let event = SecurityEvent::new(
                    "security.back_pressure",
                    "WARNING",
                    topic_sensor_id,
                    json!({"queue": "forwarder"}),
                );
                warn!(event_type = %event.event_type, severity = event.severity, sensor_id = %event.sensor_id, details = %event.details, "security_event");
            }
        }
    }
}

fn sensor_id_from_topic(topic: &str) -> Option<&str> {
    let mut parts = topic.split('/');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("greenhouse"), Some(sensor_id), Some("telemetry"), None) => Some(sensor_id),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_topic() {
        assert_eq!(sensor_id_from_topic("greenhouse/temp-01/telemetry"), Some("temp-01"));
    }

    #[test]
    fn rejects_wrong_segment_count() {
        assert_eq!(sensor_id_from_topic("greenhouse/temp-01/telemetry/extra"), None);
        assert_eq!(sensor_id_from_topic("greenhouse/telemetry"), None);
    }

    #[test]
    fn rejects_wrong_prefix_or_suffix() {
        assert_eq!(sensor_id_from_topic("barn/temp-01/telemetry"), None);
        assert_eq!(sensor_id_from_topic("greenhouse/temp-01/status"), None);
    }
}
