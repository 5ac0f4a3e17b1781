use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of `payload` under `secret`.
pub fn hmac_sha256_hex(secret: &[u8], payload: &[u8]) -> String {
    // HMAC accepts keys of any length, so this cannot fail.
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time comparison of an expected and a provided hex signature.
///
/// The length check leaks only the length, which is public (64 hex chars for
/// SHA-256).
pub fn signatures_match(expected: &str, provided: &str) -> bool {
    let expected = expected.as_bytes();
    let provided = provided.trim().as_bytes();
    if expected.is_empty() || expected.len() != provided.len() {
        return false;
    }
    expected.ct_eq(provided).into()
}

pub fn verify_hmac_sha256(secret: &[u8], payload: &[u8], provided: &str) -> bool {
    signatures_match(&hmac_sha256_hex(secret, payload), provided)
}
