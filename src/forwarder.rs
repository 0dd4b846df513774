//! Cloud Forwarder — drains validated telemetry and POSTs it upstream.
//!
//! Retry/backoff mirrors the reconnect policy in [`crate::broker`] (base
//! 1s, factor 2, cap 30s). The bounded channel it drains is filled with
//! `try_send` at the producer side, so a full queue drops the newest
//! record rather than applying backpressure to the broker.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};

use crate::config::CloudConfig;
use crate::error::{FogError, FogResult};
use crate::metrics::Metrics;
use crate::models::{CloudTelemetryDto, ProcessedTelemetry};
use crate::token::TokenMinter;

const MAX_ATTEMPTS: u32 = 5;
const BASE_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub struct Forwarder {
    client: Client,
    cloud: CloudConfig,
    token_minter: Arc<TokenMinter>,
    metrics: Arc<Metrics>,
}

impl Forwarder {
    pub fn new(cloud: CloudConfig, token_minter: Arc<TokenMinter>, metrics: Arc<Metrics>) -> FogResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cloud.timeout_seconds))
            .danger_accept_invalid_certs(cloud.tls_insecure)
            .build()
            .map_err(|e| FogError::Forward(e.to_string()))?;
        Ok(Self { client, cloud, token_minter, metrics })
    }

    /// Runs until the channel is closed (graceful shutdown drains whatever
    /// remains queued).
    #[instrument(skip(self, rx))]
    pub async fn run(&self, mut rx: mpsc::Receiver<ProcessedTelemetry>) {
        while let Some(record) = rx.recv().await {
            self.send(record).await;
        }
        info!("forwarder channel closed, drain complete");
    }

    async fn send(&self, record: ProcessedTelemetry) {
        let dto = CloudTelemetryDto::from_processed(&record);
        let url = format!("{}/api/ingest", self.cloud.url);

        let mut attempt = 0u32;
        let mut backoff = BASE_BACKOFF;
        let mut retried_auth = false;

        loop {
            attempt += 1;
            let token = match self.token_minter.current_token() {
                Ok(t) => t,
                Err(e) => {
                    error!(sensor_id = %dto.sensor_id, error = %e, "failed to mint service token");
                    return;
                }
            };

            let outcome = self
                .client
                .post(&url)
                .bearer_auth(token)
                .header("X-API-Key", &self.cloud.api_key)
                .json(&dto)
                .send()
                .await;

            match outcome {
                Ok(resp) if resp.status().is_success() => {
                    info!(sensor_id = %dto.sensor_id, status = resp.status().as_u16(), "cloud_send_success");
                    self.metrics.record_forwarded();
                    return;
                }
                Ok(resp) => {
                    let status = resp.status();
                    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) && !retried_auth {
                        warn!(sensor_id = %dto.sensor_id, status = status.as_u16(), "auth rejected, re-minting token and retrying once");
                        retried_auth = true;
                        self.token_minter.invalidate();
                        continue;
                    }
                    if status.is_server_error() {
                        if attempt >= MAX_ATTEMPTS {
                            error!(sensor_id = %dto.sensor_id, status = status.as_u16(), attempts = attempt, "giving up after repeated server errors");
                            self.metrics.record_permanently_failed();
                            return;
                        }
                        warn!(sensor_id = %dto.sensor_id, status = status.as_u16(), backoff_secs = backoff.as_secs(), "server error, backing off");
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                        continue;
                    }
                    error!(sensor_id = %dto.sensor_id, status = status.as_u16(), "permanent cloud rejection, dropping record");
                    self.metrics.record_permanently_failed();
                    return;
                }
                Err(e) => {
                    if attempt >= MAX_ATTEMPTS {
                        error!(sensor_id = %dto.sensor_id, error = %e, attempts = attempt, "giving up after repeated transport errors");
                        self.metrics.record_permanently_failed();
                        return;
                    }
                    warn!(sensor_id = %dto.sensor_id, error = %e, backoff_secs = backoff.as_secs(), "transport error, backing off");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }
}
