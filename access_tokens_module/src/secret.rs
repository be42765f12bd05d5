//! Credential material helpers: random secrets, hashing, display prefixes.

use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Prefix for programmatic API keys.
pub const API_KEY_PREFIX: &str = "hdk_";
/// Prefix for customer portal tokens.
pub const PORTAL_TOKEN_PREFIX: &str = "hpt_";

/// Random characters appended after the type prefix.
pub const SECRET_BODY_LEN: usize = 40;
/// Leading characters of the raw secret kept unhashed for display and lookup.
pub const DISPLAY_PREFIX_LEN: usize = 12;

/// Generate a new raw secret with the given type prefix.
pub fn generate_secret(type_prefix: &str) -> String {
    let body: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_BODY_LEN)
        .map(char::from)
        .collect();
    format!("{type_prefix}{body}")
}

/// One-way hash of a raw secret. Only this value is ever persisted.
pub fn sha256_hex(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

/// Short unhashed prefix of the raw secret, safe to store and show.
pub fn display_prefix(secret: &str) -> String {
    secret.chars().take(DISPLAY_PREFIX_LEN).collect()
}

/// Masked form for log lines. Never log the raw secret itself.
pub fn mask(secret: &str) -> String {
    let head: String = secret.chars().take(4).collect();
    format!("{head}***")
}
