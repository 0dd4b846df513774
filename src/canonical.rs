//! Canonicalizer — deterministic, key-sorted, whitespace-free encoding
//! of an envelope with `sig` removed.
//!
//! This is the byte string signatures are computed and verified over:
//! object keys are sorted recursively and the result is serialized with no
//! separators, so two envelopes with the same content always produce
//! identical bytes regardless of field insertion order.
//!
//! Optional fields (`value`, `unit`, `encrypted_data`) carry
//! `skip_serializing_if` on `RawEnvelope` so an absent field never
//! reappears here as an explicit `null` — a sensor that never wrote the
//! key never signed it, and this must not invent one underneath it.

use serde_json::{Map, Value};

use crate::error::{FogError, FogResult};
use crate::models::RawEnvelope;

/// Sorts object keys at every nesting level and writes compact JSON.
fn sort_value(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut sorted = Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for k in keys {
                sorted.insert(k.clone(), sort_value(&map[k]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_value).collect()),
        other => other.clone(),
    }
}

/// Produces the canonical signed byte string for an envelope, with `sig`
/// removed. Pure and side-effect free.
pub fn canonicalize(envelope: &RawEnvelope) -> FogResult<Vec<u8>> {
    let mut value = serde_json::to_value(envelope).map_err(|e| FogError::Canon(e.to_string()))?;
    if let Value::Object(map) = &mut value {
        map.remove("sig");
    }
    let canonical = sort_value(&value);
    serde_json::to_vec(&canonical).map_err(|e| FogError::Canon(e.to_string()))
}
