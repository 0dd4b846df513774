//! Signature Verifier — HMAC-SHA-256 over the canonicalized envelope.
//!
//! Constant-time comparison is provided by `hmac::Mac::verify_slice`, which
//! compares the raw digest bytes rather than the base64 text.

use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::canonical::canonicalize;
use crate::models::RawEnvelope;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureFailure {
    NoKey,
    MissingSig,
    Mismatch,
}

pub fn verify(envelope: &RawEnvelope, key: Option<&[u8; 32]>) -> Result<(), SignatureFailure> {
    let Some(key) = key else { return Err(SignatureFailure::NoKey) };
    if envelope.sig.is_empty() {
        return Err(SignatureFailure::MissingSig);
    }
    let provided = base64::engine::general_purpose::STANDARD
        .decode(&envelope.sig)
        .map_err(|_| SignatureFailure::Mismatch)?;

    let canon = canonicalize(envelope).map_err(|_| SignatureFailure::Mismatch)?;
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(&canon);
    mac.verify_slice(&provided).map_err(|_| SignatureFailure::Mismatch)
}

/// Used by sensor-facing tooling and tests to produce a valid `sig`.
pub fn sign(envelope: &RawEnvelope, key: &[u8; 32]) -> String {
    let canon = canonicalize(envelope).expect("envelope must serialize");
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(&canon);
    let digest = mac.finalize().into_bytes();
    base64::engine::general_purpose::STANDARD.encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn base_envelope() -> RawEnvelope {
        RawEnvelope {
            sensor_id: "temp-01".into(),
            ts: "2026-07-30T12:00:00+00:00".into(),
            sensor_type: "temperature".into(),
            value: Some(22.5),
            unit: Some("C".into()),
            nonce: "n1".into(),
            enc: false,
            ver: 1,
            sig: String::new(),
            encrypted_data: None,
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn valid_signature_round_trips() {
        let key = [7u8; 32];
        let mut env = base_envelope();
        env.sig = sign(&env, &key);
        assert!(verify(&env, Some(&key)).is_ok());
    }

    #[test]
    fn tampered_field_fails_verification() {
        let key = [7u8; 32];
        let mut env = base_envelope();
        env.sig = sign(&env, &key);
        env.value = Some(99.9);
        assert_eq!(verify(&env, Some(&key)), Err(SignatureFailure::Mismatch));
    }

    #[test]
    fn no_key_registered() {
        let env = base_envelope();
        assert_eq!(verify(&env, None), Err(SignatureFailure::NoKey));
    }

    #[test]
    fn missing_sig_rejected() {
        let key = [7u8; 32];
        let env = base_envelope();
        assert_eq!(verify(&env, Some(&key)), Err(SignatureFailure::MissingSig));
    }

    #[test]
    fn field_order_does_not_affect_verification() {
        // Signature is computed over the canonical (key-sorted) form, so an
        // envelope built with different struct field insertion order still
        // verifies against the same signature.
        let key = [3u8; 32];
        let mut env = base_envelope();
        env.extra.insert("z_field".into(), serde_json::json!("x"));
        env.extra.insert("a_field".into(), serde_json::json!("y"));
        env.sig = sign(&env, &key);
        assert!(verify(&env, Some(&key)).is_ok());
    }
}
