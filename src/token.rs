//! Service Token Minter — HS256 JWT for fog→cloud authentication.
//!
//! Minting is not free, so `TokenMinter` memoizes the current token across
//! calls instead of minting one on every forward.

use std::sync::Mutex;

use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use crate::error::{FogError, FogResult};

const EXPIRE_SECONDS: i64 = 60 * 60;
/// Re-mint once fewer than this many seconds of validity remain.
const RENEW_SKEW_SECONDS: i64 = 60;

#[derive(Debug, Serialize, Deserialize)]
struct ServiceClaims {
    sub: String,
    iat: i64,
    exp: i64,
    #[serde(rename = "type")]
    token_type: String,
}

struct CachedToken {
    token: String,
    exp: i64,
}

pub struct TokenMinter {
    secret: String,
    service_name: String,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenMinter {
    pub fn new(secret: String, service_name: impl Into<String>) -> Self {
        Self { secret, service_name: service_name.into(), cached: Mutex::new(None) }
    }

    /// Returns a cached token until it has fewer than [`RENEW_SKEW_SECONDS`]
    /// left to live, then mints a fresh one.
    pub fn current_token(&self) -> FogResult<String> {
        let now = Utc::now().timestamp();
        let mut cached = self.cached.lock().expect("token cache mutex poisoned");
        if let Some(existing) = cached.as_ref() {
            if existing.exp - now > RENEW_SKEW_SECONDS {
                return Ok(existing.token.clone());
            }
        }

        let claims = ServiceClaims {
            sub: self.service_name.clone(),
            iat: now,
            exp: now + EXPIRE_SECONDS,
            token_type: "service".into(),
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(self.secret.as_bytes()))
            .map_err(|e| FogError::Config(format!("failed to mint service token: {e}")))?;

        *cached = Some(CachedToken { token: token.clone(), exp: claims.exp });
        Ok(token)
    }

    /// Drops the cached token so the next [`Self::current_token`] call mints
    /// a fresh one regardless of remaining validity. Used when the cloud
    /// rejects a token as unauthorized even though it has not expired.
    pub fn invalidate(&self) {
        *self.cached.lock().expect("token cache mutex poisoned") = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{decode, DecodingKey, Validation};

    #[test]
    fn mints_valid_service_token() {
        let minter = TokenMinter::new("top-secret".into(), "fog");
        let token = minter.current_token().unwrap();
        let decoded = decode::<ServiceClaims>(
            &token,
            &DecodingKey::from_secret(b"top-secret"),
            &Validation::default(),
        )
        .unwrap();
        assert_eq!(decoded.claims.sub, "fog");
        assert_eq!(decoded.claims.token_type, "service");
    }

    #[test]
    fn reuses_cached_token_within_validity_window() {
        let minter = TokenMinter::new("s".into(), "fog");
        let a = minter.current_token().unwrap();
        let b = minter.current_token().unwrap();
        assert_eq!(a, b, "token should be cached until near expiry");
    }

    #[test]
    fn invalidate_forces_a_fresh_mint() {
        let minter = TokenMinter::new("s".into(), "fog");
        let a = minter.current_token().unwrap();
        minter.invalidate();
        // claims are second-granularity; cross a second boundary so a fresh
        // mint is actually observable as a different token.
        std::thread::sleep(std::time::Duration::from_millis(1100));
        let b = minter.current_token().unwrap();
        assert_ne!(a, b, "invalidate must force a new token even if the old one had not expired");
    }
}
