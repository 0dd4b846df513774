//! AEAD Decryptor — AES-256-GCM over the optional ciphertext envelope.
//!
//! When an envelope carries `encrypted_data`, the decrypted plaintext
//! object's fields (`value`, `type`, `unit`) take priority over the
//! corresponding cleartext fields in the envelope.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use serde_json::Value;

use crate::models::EncryptedData;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptFailure {
    MissingCiphertext,
    BadBase64,
    AuthTagFailure,
    PlaintextNotObject,
}

/// Decrypts `encrypted_data` and returns the plaintext mapping (which must
/// contain at least `value` and `type`).
pub fn decrypt(encrypted: &EncryptedData, key: &[u8; 32]) -> Result<Value, DecryptFailure> {
    let ciphertext = base64::engine::general_purpose::STANDARD
        .decode(&encrypted.ciphertext)
        .map_err(|_| DecryptFailure::BadBase64)?;
    let nonce_bytes = base64::engine::general_purpose::STANDARD
        .decode(&encrypted.nonce)
        .map_err(|_| DecryptFailure::BadBase64)?;
    if nonce_bytes.len() != 12 {
        return Err(DecryptFailure::BadBase64);
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(&nonce_bytes);
    let plaintext = cipher
        .decrypt(nonce, ciphertext.as_ref())
        .map_err(|_| DecryptFailure::AuthTagFailure)?;

    let value: Value = serde_json::from_slice(&plaintext).map_err(|_| DecryptFailure::PlaintextNotObject)?;
    if !value.is_object() {
        return Err(DecryptFailure::PlaintextNotObject);
    }
    Ok(value)
}

pub fn encrypt(plaintext: &Value, key: &[u8; 32], nonce_bytes: &[u8; 12]) -> EncryptedData {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(nonce_bytes);
    let bytes = serde_json::to_vec(plaintext).expect("plaintext serializes");
    let ciphertext = cipher.encrypt(nonce, bytes.as_ref()).expect("encryption cannot fail here");
    EncryptedData {
        ciphertext: base64::engine::general_purpose::STANDARD.encode(ciphertext),
        nonce: base64::engine::general_purpose::STANDARD.encode(nonce_bytes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trip() {
        let key = [9u8; 32];
        let nonce = [1u8; 12];
        let plaintext = json!({"value": 19.0, "type": "temperature"});
        let enc = encrypt(&plaintext, &key, &nonce);
        let dec = decrypt(&enc, &key).unwrap();
        assert_eq!(dec["value"], 19.0);
        assert_eq!(dec["type"], "temperature");
    }

    #[test]
    fn wrong_key_fails_auth_tag() {
        let key = [9u8; 32];
        let other = [8u8; 32];
        let nonce = [1u8; 12];
        let enc = encrypt(&json!({"value": 1.0, "type": "x"}), &key, &nonce);
        assert_eq!(decrypt(&enc, &other), Err(DecryptFailure::AuthTagFailure));
    }

    #[test]
    fn bad_base64_rejected() {
        let enc = EncryptedData { ciphertext: "not-base64-!!".into(), nonce: "AAAAAAAAAAAAAAAA".into() };
        assert_eq!(decrypt(&enc, &[0u8; 32]), Err(DecryptFailure::BadBase64));
    }

    #[test]
    fn non_object_plaintext_rejected() {
        let key = [2u8; 32];
        let nonce = [3u8; 12];
        let enc = encrypt(&json!(42), &key, &nonce);
        assert_eq!(decrypt(&enc, &key), Err(DecryptFailure::PlaintextNotObject));
    }
}
