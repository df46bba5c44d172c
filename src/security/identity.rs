//! Caller identity.
//!
//! Callers are keyed by a short SHA-256 prefix of their API key so raw keys never reach
//! counter stores or logs. The prefix is only a label: anything that isolates one tenant's
//! data from another's, such as cache keys, uses [`credential_digest`] instead.

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};

pub const X_API_KEY: &str = "x-api-key";

/// Identity attached to each admitted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    /// Hashed key, or the peer IP for anonymous callers.
    pub key_id: String,
    /// The caller's own downstream key, forwarded per request.
    pub credential: Option<String>,
}

impl CallerIdentity {
    pub fn from_headers(headers: &HeaderMap, peer: Option<std::net::IpAddr>) -> Self {
        match extract_key(headers) {
            Some(key) => Self {
                key_id: hash_identity(&key),
                credential: Some(key),
            },
            None => Self {
                key_id: peer
                    .map(|ip| ip.to_string())
                    .unwrap_or_else(|| "anonymous".to_string()),
                credential: None,
            },
        }
    }
}

/// First 8 hex chars of the SHA-256 of `raw`.
pub fn hash_identity(raw: &str) -> String {
    let digest = Sha256::digest(raw.as_bytes());
    hex::encode(&digest[..4])
}

/// Full hex SHA-256 of a credential.
pub fn credential_digest(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// API key from `x-api-key`, else `Authorization` with an optional `Bearer ` prefix.
pub fn extract_key(headers: &HeaderMap) -> Option<String> {
    let from_header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    from_header(X_API_KEY).or_else(|| {
        from_header(axum::http::header::AUTHORIZATION.as_str()).and_then(|v| {
            let key = match v.strip_prefix("Bearer") {
                Some(rest) if rest.is_empty() || rest.starts_with(' ') => rest.trim(),
                _ => v.as_str(),
            };
            (!key.is_empty()).then(|| key.to_string())
        })
    })
}
