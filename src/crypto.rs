//! Hashing and secret generation for claim tokens and signed URLs.
//!
//! Claim tokens follow the store-hash-only rule: the raw secret is returned
//! to the caller exactly once and only its salted SHA-256 hash is persisted.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Bytes of entropy in a claim token secret.
const CLAIM_TOKEN_BYTES: usize = 32;

/// Hash a secret for database lookups (claim tokens).
/// Uses SHA-256 with application salt, returns lowercase hex string.
pub fn hash_secret(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"teller-v1:");
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate a URL-safe random claim token secret (256 bits of entropy).
pub fn generate_claim_token() -> String {
    use rand::rngs::OsRng;
    use rand::RngCore;
    let mut bytes = [0u8; CLAIM_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// HMAC-SHA256 of `message` under `key`, hex encoded.
/// Shared by webhook signature verification and download URL signing.
pub fn hmac_sha256_hex(key: &[u8], message: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}
