//! Configuration loaded once at startup into an immutable object.
//!
//! Sensor HMAC keys are discovered from any `SENSOR_<NAME>_HMAC_KEY`
//! environment variable rather than a fixed sensor list, so new sensors
//! can be onboarded by an operator without a rebuild.

use std::collections::HashMap;
use std::env;

use tracing::error;

use crate::error::{FogError, FogResult};
use crate::probe::SensorEndpoint;
use crate::ratelimit::Algorithm;

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub secure_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub sensor_hmac_keys: HashMap<String, [u8; 32]>,
    pub aes_gcm_key: Option<[u8; 32]>,
    pub jwt_secret: String,
    pub enable_signature_verification: bool,
    pub enable_timestamp_validation: bool,
    pub enable_nonce_validation: bool,
    pub enable_rate_limiting: bool,
    pub timestamp_window_seconds: i64,
    pub nonce_cache_size: usize,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub messages_per_minute: u32,
    pub burst_capacity: u32,
    pub algorithm: Algorithm,
}

#[derive(Debug, Clone)]
pub struct CloudConfig {
    pub url: String,
    pub api_key: String,
    pub timeout_seconds: u64,
    pub tls_insecure: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub mqtt: MqttConfig,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
    pub cloud: CloudConfig,
    pub sensor_endpoints: Vec<SensorEndpoint>,
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn hex_key_32(raw: &str, what: &str) -> FogResult<[u8; 32]> {
    let bytes = hex::decode(raw).map_err(|e| FogError::Config(format!("{what}: invalid hex: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| FogError::Config(format!("{what}: expected 32 bytes")))
}

/// Discover `SENSOR_<NAME>_HMAC_KEY` variables and map them to sensor ids.
/// `<NAME>` is the sensor id with `-` upper-cased and `-`/`.` turned into `_`
/// (`SENSOR_TEMP_HMAC_KEY` for a `temp-01` style identity collapses to the
/// device family name).
fn discover_sensor_keys() -> FogResult<HashMap<String, [u8; 32]>> {
    let mut keys = HashMap::new();
    for (k, v) in env::vars() {
        let Some(mid) = k.strip_prefix("SENSOR_").and_then(|s| s.strip_suffix("_HMAC_KEY")) else {
            continue;
        };
        if v.is_empty() {
            continue;
        }
        let sensor_id = mid.to_ascii_lowercase().replace('_', "-");
        let key = hex_key_32(&v, &format!("SENSOR_{mid}_HMAC_KEY"))?;
        keys.insert(sensor_id, key);
    }
    Ok(keys)
}

/// Maps each configured sensor to a CoAP endpoint using the same
/// `SENSOR_<NAME>_*` env-var convention [`discover_sensor_keys`] uses.
/// Defaults to `sensor-<id>` on the standard CoAP port when unset.
fn discover_sensor_endpoints(sensor_ids: &[String]) -> Vec<SensorEndpoint> {
    sensor_ids
        .iter()
        .map(|id| {
            let upper = id.to_ascii_uppercase().replace('-', "_");
            let host = env::var(format!("SENSOR_{upper}_HOST")).unwrap_or_else(|_| format!("sensor-{id}"));
            let port = env_parse(&format!("SENSOR_{upper}_PORT"), 5683u16);
            SensorEndpoint { sensor_id: id.clone(), host, port }
        })
        .collect()
}

impl Config {
    pub fn from_env() -> FogResult<Self> {
        let mqtt = MqttConfig {
            host: env::var("MQTT_HOST").unwrap_or_else(|_| "localhost".into()),
            port: env_parse("MQTT_PORT", 1883),
            secure_port: env_parse("MQTT_SECURE_PORT", 8883),
            username: env::var("MQTT_USERNAME").ok(),
            password: env::var("MQTT_PASSWORD").ok(),
            use_tls: env_bool("ENABLE_TLS", false),
        };

        let sensor_hmac_keys = discover_sensor_keys()?;

        let aes_gcm_key = match env::var("AES_GCM_KEY") {
            Ok(v) if !v.is_empty() => Some(hex_key_32(&v, "AES_GCM_KEY")?),
            _ => None,
        };

        let jwt_secret = env::var("JWT_SECRET_KEY")
            .map_err(|_| FogError::Config("JWT_SECRET_KEY is required".into()))?;
        if jwt_secret.is_empty() {
            return Err(FogError::Config("JWT_SECRET_KEY must not be empty".into()));
        }
        if sensor_hmac_keys.is_empty() {
            return Err(FogError::Config(
                "at least one SENSOR_<NAME>_HMAC_KEY must be configured".into(),
            ));
        }

        let security = SecurityConfig {
            sensor_hmac_keys,
            aes_gcm_key,
            jwt_secret,
            enable_signature_verification: env_bool("ENABLE_SIGNATURE_VERIFICATION", true),
            enable_timestamp_validation: env_bool("ENABLE_TIMESTAMP_VALIDATION", true),
            enable_nonce_validation: env_bool("ENABLE_NONCE_VALIDATION", true),
            enable_rate_limiting: env_bool("ENABLE_RATE_LIMITING", true),
            timestamp_window_seconds: env_parse("TIMESTAMP_WINDOW_SECONDS", 120),
            nonce_cache_size: env_parse("NONCE_CACHE_SIZE", 10_000),
        };

        for (flag, tripped) in [
            ("ENABLE_SIGNATURE_VERIFICATION", !security.enable_signature_verification),
            ("ENABLE_TIMESTAMP_VALIDATION", !security.enable_timestamp_validation),
            ("ENABLE_NONCE_VALIDATION", !security.enable_nonce_validation),
            ("ENABLE_RATE_LIMITING", !security.enable_rate_limiting),
        ] {
            if tripped {
                error!(event_type = "security.gate_disabled", gate = flag,
                    "CRITICAL: security gate disabled via environment kill-switch");
            }
        }

        let algorithm = match env::var("RATE_LIMIT_ALGORITHM").as_deref() {
            Ok("leaky_bucket") => Algorithm::LeakyBucket,
            _ => Algorithm::TokenBucket,
        };
        let rate_limit = RateLimitConfig {
            messages_per_minute: env_parse("RATE_LIMIT_PER_MINUTE", 60),
            burst_capacity: env_parse("RATE_LIMIT_BURST", 10),
            algorithm,
        };

        let cloud = CloudConfig {
            url: env::var("CLOUD_URL").unwrap_or_else(|_| "https://localhost:8443".into()),
            api_key: env::var("FOG_API_KEY").unwrap_or_default(),
            timeout_seconds: env_parse("CLOUD_TIMEOUT_SECONDS", 30),
            tls_insecure: env_bool("CLOUD_TLS_INSECURE", false),
        };

        let mut sensor_ids: Vec<String> = security.sensor_hmac_keys.keys().cloned().collect();
        sensor_ids.sort();
        let sensor_endpoints = discover_sensor_endpoints(&sensor_ids);

        Ok(Config {
            host: env::var("FOG_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env_parse("FOG_PORT", 8000),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".into()),
            mqtt,
            security,
            rate_limit,
            cloud,
            sensor_endpoints,
        })
    }
}
