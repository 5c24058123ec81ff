//! Deterministic key identifier derivation.
//!
//! `key_id_for` is the single place this computation happens; every caller
//! (sync, refresh, probe) goes through it rather than re-deriving its own id.

use sha2::{Digest, Sha256};

/// Provider-specific prefixes stripped from an access token before hashing,
/// checked in order so the derivation is independent of which one (if any)
/// actually matched.
const KNOWN_PREFIXES: &[&str] = &["sk-ant-oat01-", "sk-ant-", "Bearer "];

const KEY_ID_HEX_LEN: usize = 16;

/// Derive the stable `key_id` for an access token: SHA-256 of the token with
/// known prefixes stripped, hex-encoded, truncated to 16 chars.
#[must_use]
pub fn key_id_for(access_token: &str) -> String {
    let stripped = strip_known_prefix(access_token);
    let digest = Sha256::digest(stripped.as_bytes());
    let hex = hex::encode(digest);
    hex[..KEY_ID_HEX_LEN].to_string()
}

fn strip_known_prefix(token: &str) -> &str {
    for prefix in KNOWN_PREFIXES {
        if let Some(rest) = token.strip_prefix(prefix) {
            return rest;
        }
    }
    token
}
