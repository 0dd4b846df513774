//! Validator — composes the canonicalizer, signature verifier, AEAD
//! decryptor, timestamp gate, nonce cache, and rate limiter into a single
//! validation verdict.
//!
//! The broker and probe paths share every gate and diverge only through
//! `ValidationContext`'s leniency knobs, rather than duplicating the whole
//! chain for each caller.
//!
//! Gate order is fixed so cheap checks short-circuit expensive ones: rate
//! limit before cryptography (DoS resistance), signature before nonce
//! (don't let unauthenticated nonces poison the cache), nonce before AEAD
//! (don't decrypt replayed envelopes).

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use crate::aead::{self, DecryptFailure};
use crate::config::SecurityConfig;
use crate::metrics::Metrics;
use crate::models::{ProcessedTelemetry, RawEnvelope, SecurityEvent, ValidationFlags, KNOWN_SENSOR_TYPES};
use crate::noncecache::{NonceCache, NonceOutcome};
use crate::ratelimit::{Admission, RateLimiter};
use crate::signature::{self, SignatureFailure};

#[derive(Debug, Clone, Copy)]
pub struct ValidationContext {
    /// Probe responses bypass the nonce cache.
    pub bypass_nonce: bool,
    /// The probe path doubles the freshness window.
    pub window_multiplier: i64,
    /// On the probe path a stale timestamp is a warning, not a rejection.
    pub freshness_is_warning: bool,
}

impl ValidationContext {
    pub fn broker() -> Self {
        Self { bypass_nonce: false, window_multiplier: 1, freshness_is_warning: false }
    }

    pub fn probe() -> Self {
        Self { bypass_nonce: true, window_multiplier: 2, freshness_is_warning: true }
    }
}

#[derive(Debug, Default)]
pub struct Verdict {
    pub ok: bool,
    pub processed: Option<ProcessedTelemetry>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub security_events: Vec<SecurityEvent>,
}

pub struct Validator {
    security: SecurityConfig,
    nonce_cache: NonceCache,
    rate_limiter: RateLimiter,
    metrics: Arc<Metrics>,
}

impl Validator {
    pub fn new(security: SecurityConfig, rate_limiter: RateLimiter, metrics: Arc<Metrics>) -> Self {
        let nonce_cache = NonceCache::new(security.nonce_cache_size);
        Self { security, nonce_cache, rate_limiter, metrics }
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn nonce_cache_len(&self) -> usize {
        self.nonce_cache.len()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Runs every gate and records the outcome in [`Self::metrics`] before
    /// returning it — every caller (broker, probe, control-plane poll)
    /// routes through here, so this is the single place outcomes are
    /// counted regardless of which path produced them.
    pub fn validate(&self, envelope: RawEnvelope, ctx: ValidationContext) -> Verdict {
        let verdict = self.validate_inner(envelope, ctx);
        self.metrics.record_verdict(&verdict);
        verdict
    }

    fn validate_inner(&self, envelope: RawEnvelope, ctx: ValidationContext) -> Verdict {
        let mut v = Verdict::default();
        let sensor_id = envelope.sensor_id.clone();

        // Step 1: structural parse already happened by the time we have a
        // `RawEnvelope` in hand; the protocol-version check lives here since
        // it is still a structural concern. Only version 1 is accepted.
        if envelope.ver != 1 {
            v.errors.push(format!("unsupported protocol version {}", envelope.ver));
            return v;
        }

        // Step 2: rate limiter, ahead of cryptography to resist DoS.
        let mut rate_ok = true;
        if self.security.enable_rate_limiting {
            if self.rate_limiter.admit(&sensor_id) == Admission::Throttled {
                rate_ok = false;
                v.errors.push("rate limit exceeded".into());
                v.security_events.push(SecurityEvent::new(
                    "security.rate_limit_exceeded", "WARNING", sensor_id.as_str(), json!({}),
                ));
                return v;
            }
        }

        // Step 3: signature verification.
        let mut sig_ok = true;
        if self.security.enable_signature_verification {
            let key = self.security.sensor_hmac_keys.get(&sensor_id);
            if let Err(failure) = signature::verify(&envelope, key) {
                sig_ok = false;
                let reason = match failure {
                    SignatureFailure::NoKey => "no HMAC key configured for sensor",
                    SignatureFailure::MissingSig => "missing signature",
                    SignatureFailure::Mismatch => "invalid HMAC signature",
                };
                v.errors.push(reason.into());
                v.security_events.push(SecurityEvent::new(
                    "security.invalid_signature", "ERROR", sensor_id.as_str(), json!({"reason": reason}),
                ));
                return v;
            }
        }

        // Step 4: timestamp freshness.
        let mut ts_ok = true;
        let window = self.security.timestamp_window_seconds * ctx.window_multiplier;
        if self.security.enable_timestamp_validation {
            let gate = crate::timegate::check(&envelope.ts, Utc::now(), window);
            if !gate.valid {
                ts_ok = false;
                let msg = format!("timestamp outside valid window (age: {:.1}s)", gate.age_seconds);
                v.security_events.push(SecurityEvent::new(
                    "security.invalid_timestamp",
                    if ctx.freshness_is_warning { "WARNING" } else { "ERROR" },
                    sensor_id.as_str(),
                    json!({"age_seconds": gate.age_seconds}),
                ));
                if ctx.freshness_is_warning {
                    v.warnings.push(msg);
                } else {
                    v.errors.push(msg);
                    return v;
                }
            }
        }

        // Step 5: nonce uniqueness, only once signature is valid.
        let mut nonce_ok = true;
        if self.security.enable_nonce_validation && !ctx.bypass_nonce {
            if self.nonce_cache.check_and_record(&envelope.nonce) == NonceOutcome::Seen {
                nonce_ok = false;
                v.errors.push("nonce already used (replay attack)".into());
                v.security_events.push(SecurityEvent::new(
                    "security.replay_attack", "ERROR", sensor_id.as_str(), json!({"nonce": envelope.nonce}),
                ));
                return v;
            }
        }

        // Step 6: AEAD decryption if encrypted.
        let mut decrypted = false;
        let mut value = envelope.value;
        let mut unit = envelope.unit.clone();
        let mut sensor_type = envelope.sensor_type.clone();

        if envelope.enc {
            let Some(enc_data) = &envelope.encrypted_data else {
                v.errors.push("missing ciphertext for encrypted envelope".into());
                v.security_events.push(SecurityEvent::new(
                    "security.decryption_failed", "ERROR", sensor_id.as_str(), json!({"reason": "missing_ciphertext"}),
                ));
                return v;
            };
            let Some(aes_key) = &self.security.aes_gcm_key else {
                v.errors.push("no AES-GCM key configured".into());
                v.security_events.push(SecurityEvent::new(
                    "security.decryption_failed", "ERROR", sensor_id.as_str(), json!({"reason": "no_key"}),
                ));
                return v;
            };
            match aead::decrypt(enc_data, aes_key) {
                Ok(plaintext) => {
                    if let Some(v2) = plaintext.get("value").and_then(|x| x.as_f64()) {
                        value = Some(v2);
                    }
                    if let Some(t2) = plaintext.get("type").and_then(|x| x.as_str()) {
                        sensor_type = t2.to_string();
                    }
                    if unit.is_none() {
                        unit = plaintext.get("unit").and_then(|x| x.as_str()).map(str::to_string);
                    }
                    decrypted = true;
                }
                Err(failure) => {
                    let reason = match failure {
                        DecryptFailure::MissingCiphertext => "missing_ciphertext",
                        DecryptFailure::BadBase64 => "bad_base64",
                        DecryptFailure::AuthTagFailure => "auth_tag_failure",
                        DecryptFailure::PlaintextNotObject => "plaintext_not_object",
                    };
                    v.errors.push("failed to decrypt payload".into());
                    v.security_events.push(SecurityEvent::new(
                        "security.decryption_failed", "ERROR", sensor_id.as_str(), json!({"reason": reason}),
                    ));
                    return v;
                }
            }
        }

        // Step 7: final sanity.
        let Some(value) = value else {
            v.errors.push("missing telemetry value".into());
            return v;
        };
        if !KNOWN_SENSOR_TYPES.contains(&sensor_type.as_str()) {
            v.errors.push(format!("unknown sensor type {sensor_type}"));
            return v;
        }

        let Some(parsed_ts) = crate::timegate::parse_ts(&envelope.ts) else {
            v.errors.push("unparseable timestamp".into());
            return v;
        };

        v.ok = true;
        v.processed = Some(ProcessedTelemetry {
            sensor_id,
            timestamp: parsed_ts,
            sensor_type,
            value,
            unit: unit.unwrap_or_default(),
            nonce: envelope.nonce,
            decrypted,
            validation: ValidationFlags { signature: sig_ok, timestamp: ts_ok, nonce: nonce_ok, rate: rate_ok },
        });
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::Algorithm;
    use std::collections::{BTreeMap, HashMap};

    fn security_config(keys: HashMap<String, [u8; 32]>) -> SecurityConfig {
        SecurityConfig {
            sensor_hmac_keys: keys,
            aes_gcm_key: Some([1u8; 32]),
            jwt_secret: "secret".into(),
            enable_signature_verification: true,
            enable_timestamp_validation: true,
            enable_nonce_validation: true,
            enable_rate_limiting: true,
            timestamp_window_seconds: 120,
            nonce_cache_size: 1000,
        }
    }

    fn validator_with_key(sensor_id: &str, key: [u8; 32]) -> Validator {
        let mut keys = HashMap::new();
        keys.insert(sensor_id.to_string(), key);
        let rl = RateLimiter::new(600, 50, Algorithm::TokenBucket);
        Validator::new(security_config(keys), rl, Arc::new(Metrics::default()))
    }

    fn signed_envelope(sensor_id: &str, key: &[u8; 32], nonce: &str, ts_offset_secs: i64) -> RawEnvelope {
        let ts = (Utc::now() - chrono::Duration::seconds(ts_offset_secs)).to_rfc3339();
        let mut env = RawEnvelope {
            sensor_id: sensor_id.into(),
            ts,
            sensor_type: "temperature".into(),
            value: Some(22.5),
            unit: Some("C".into()),
            nonce: nonce.into(),
            enc: false,
            ver: 1,
            sig: String::new(),
            encrypted_data: None,
            extra: BTreeMap::new(),
        };
        env.sig = signature::sign(&env, key);
        env
    }

    #[test]
    fn happy_path_s1() {
        let key = [4u8; 32];
        let validator = validator_with_key("temp-01", key);
        let env = signed_envelope("temp-01", &key, "n1", 0);
        let verdict = validator.validate(env, ValidationContext::broker());
        assert!(verdict.ok, "errors: {:?}", verdict.errors);
        let p = verdict.processed.unwrap();
        assert_eq!(p.value, 22.5);
        assert!(p.validation.signature && p.validation.timestamp && p.validation.nonce && p.validation.rate);
    }

    #[test]
    fn replay_s2() {
        let key = [4u8; 32];
        let validator = validator_with_key("temp-01", key);
        let env1 = signed_envelope("temp-01", &key, "dup", 0);
        let env2 = signed_envelope("temp-01", &key, "dup", 0);
        assert!(validator.validate(env1, ValidationContext::broker()).ok);
        let second = validator.validate(env2, ValidationContext::broker());
        assert!(!second.ok);
        assert!(second.security_events.iter().any(|e| e.event_type == "security.replay_attack"));
    }

    #[test]
    fn stale_s3() {
        let key = [4u8; 32];
        let validator = validator_with_key("temp-01", key);
        let env = signed_envelope("temp-01", &key, "n-stale", 200);
        let verdict = validator.validate(env, ValidationContext::broker());
        assert!(!verdict.ok);
        assert!(verdict.security_events.iter().any(|e| e.event_type == "security.invalid_timestamp"));
    }

    #[test]
    fn bad_signature_s4() {
        let key = [4u8; 32];
        let validator = validator_with_key("temp-01", key);
        let mut env = signed_envelope("temp-01", &key, "n-bad", 0);
        env.sig.pop();
        env.sig.push('X');
        let verdict = validator.validate(env, ValidationContext::broker());
        assert!(!verdict.ok);
        assert!(verdict.security_events.iter().any(|e| e.event_type == "security.invalid_signature"));
    }

    #[test]
    fn throttle_s5() {
        let key = [4u8; 32];
        let mut keys = HashMap::new();
        keys.insert("temp-01".to_string(), key);
        let rl = RateLimiter::new(60, 10, Algorithm::TokenBucket);
        let validator = Validator::new(security_config(keys), rl, Arc::new(Metrics::default()));

        let mut admitted = 0;
        for i in 0..20 {
            let env = signed_envelope("temp-01", &key, &format!("n{i}"), 0);
            if validator.validate(env, ValidationContext::broker()).ok {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10, "burst=10 should admit exactly 10 of 20");
    }

    #[test]
    fn probe_path_doubles_window_and_bypasses_nonce() {
        let key = [4u8; 32];
        let validator = validator_with_key("temp-01", key);
        // 200s old: rejected at W=120 on the broker path, accepted at 2W=240.
        let env = signed_envelope("temp-01", &key, "probe-n", 200);
        let verdict = validator.validate(env, ValidationContext::probe());
        assert!(verdict.ok, "errors: {:?}", verdict.errors);

        // Same nonce replayed via probe path must still pass — nonce cache bypassed.
        let env2 = signed_envelope("temp-01", &key, "probe-n", 200);
        let verdict2 = validator.validate(env2, ValidationContext::probe());
        assert!(verdict2.ok);
        assert_eq!(validator.nonce_cache_len(), 0, "probe path must not write the nonce cache");
    }

    #[test]
    fn encrypted_envelope_s6() {
        let key = [4u8; 32];
        let aes_key = [1u8; 32];
        let mut keys = HashMap::new();
        keys.insert("temp-01".to_string(), key);
        let mut sc = security_config(keys);
        sc.aes_gcm_key = Some(aes_key);
        let rl = RateLimiter::new(600, 50, Algorithm::TokenBucket);
        let validator = Validator::new(sc, rl, Arc::new(Metrics::default()));

        let nonce_bytes = [2u8; 12];
        let plaintext = json!({"value": 19.0, "type": "temperature"});
        let encrypted_data = aead::encrypt(&plaintext, &aes_key, &nonce_bytes);

        let mut env = RawEnvelope {
            sensor_id: "temp-01".into(),
            ts: Utc::now().to_rfc3339(),
            sensor_type: "temperature".into(),
            value: None,
            unit: None,
            nonce: "enc-n1".into(),
            enc: true,
            ver: 1,
            sig: String::new(),
            encrypted_data: Some(encrypted_data),
            extra: BTreeMap::new(),
        };
        env.sig = signature::sign(&env, &key);

        let verdict = validator.validate(env, ValidationContext::broker());
        assert!(verdict.ok, "errors: {:?}", verdict.errors);
        assert_eq!(verdict.processed.unwrap().value, 19.0);
    }
}
