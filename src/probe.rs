//! CoAP Probe Client — on-demand GET requests to sensors.
//!
//! Built on `coap-lite`'s sans-I/O packet encode/decode over a plain
//! `tokio::net::UdpSocket`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use coap_lite::{CoapRequest, Packet as CoapPacket, RequestType as Method};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{instrument, warn};

use crate::models::RawEnvelope;
use crate::validator::{ValidationContext, Validator, Verdict};

/// Resource paths tried in order when the exact path a sensor exposes is
/// unknown.
const DISCOVERY_PATHS: &[&str] =
    &["current", "status", "info", "config", "health", "metrics", ".well-known/core"];

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SensorEndpoint {
    pub sensor_id: String,
    pub host: String,
    pub port: u16,
}

pub struct Probe {
    validator: Arc<Validator>,
}

impl Probe {
    pub fn new(validator: Arc<Validator>) -> Self {
        Self { validator }
    }

    /// GETs `path` from `endpoint` and runs the result through the
    /// validator on the lenient probe path (doubled freshness window, no
    /// nonce cache).
    #[instrument(skip(self), fields(sensor_id = %endpoint.sensor_id, path))]
    pub async fn get_sensor_reading(&self, endpoint: &SensorEndpoint, path: &str) -> Option<Verdict> {
        let payload = match timeout(REQUEST_TIMEOUT, self.request(endpoint, path)).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                warn!(error = %e, "coap request failed");
                return None;
            }
            Err(_) => {
                warn!(timeout_secs = REQUEST_TIMEOUT.as_secs(), "coap request timed out");
                return None;
            }
        };

        let envelope: RawEnvelope = match serde_json::from_slice(&payload) {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "malformed coap response payload");
                return None;
            }
        };

        Some(self.validator.validate(envelope, ValidationContext::probe()))
    }

    async fn request(&self, endpoint: &SensorEndpoint, path: &str) -> std::io::Result<Vec<u8>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let addr: SocketAddr = format!("{}:{}", endpoint.host, endpoint.port)
            .parse()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "unresolvable sensor address"))?;

        let mut request: CoapRequest<SocketAddr> = CoapRequest::new();
        request.set_method(Method::Get);
        request.set_path(path);
        request.message.header.message_id = rand::random();
        request.message.set_token(rand::random::<[u8; 4]>().to_vec());

        let bytes = request
            .message
            .to_bytes()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        socket.send_to(&bytes, addr).await?;

        let mut buf = [0u8; 2048];
        let (n, _) = socket.recv_from(&mut buf).await?;
        let response = CoapPacket::from_bytes(&buf[..n])
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        Ok(response.payload)
    }

    /// Tries each well-known path in turn, returning the first response
    /// that parses and validates.
    pub async fn discover(&self, endpoint: &SensorEndpoint) -> Option<Verdict> {
        for path in DISCOVERY_PATHS {
            if let Some(verdict) = self.get_sensor_reading(endpoint, path).await {
                return Some(verdict);
            }
        }
        None
    }

    /// Polls multiple sensors concurrently.
    pub async fn poll_sensors(&self, endpoints: &[SensorEndpoint]) -> Vec<(String, Option<Verdict>)> {
        let requests = endpoints.iter().map(|endpoint| async move {
            let verdict = self.get_sensor_reading(endpoint, "current").await;
            (endpoint.sensor_id.clone(), verdict)
        });
        futures::future::join_all(requests).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_paths_cover_the_documented_set() {
        assert_eq!(
            DISCOVERY_PATHS,
            &["current", "status", "info", "config", "health", "metrics", ".well-known/core"]
        );
    }
}
