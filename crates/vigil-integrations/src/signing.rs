//! Report signing
//!
//! Outbound reports can carry an `X-Vigil-Signature` header so the backend
//! can check they came from this service.

/// Header carrying the hex HMAC-SHA256 of the request body
pub const SIGNATURE_HEADER: &str = "X-Vigil-Signature";

/// Sign a payload using HMAC-SHA256
///
/// # Returns
/// Lowercase hex digest (64 chars)
#[must_use]
pub fn sign_payload(payload: &[u8], secret: &str) -> String {
    use std::fmt::Write;

    let mac = hmac_sha256::HMAC::mac(payload, secret.as_bytes());

    let mut signature = String::with_capacity(64);
    for byte in mac {
        let _ = write!(signature, "{byte:02x}");
    }
    signature
}

/// Verify a report signature using HMAC-SHA256
///
/// # Arguments
/// * `payload` - Raw request body
/// * `signature` - Signature from the `X-Vigil-Signature` header
/// * `secret` - Shared signing secret
#[must_use]
pub fn verify_signature(payload: &[u8], signature: &str, secret: &str) -> bool {
    constant_time_compare(&sign_payload(payload, secret), signature)
}

/// Constant-time string comparison
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}
