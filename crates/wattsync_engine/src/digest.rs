//! SHA-256 helpers for version tags and response fingerprints.

use sha2::{Digest, Sha256};

/// Hex-encodes the SHA-256 of the concatenated parts.
pub(crate) fn sha256_hex(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

/// Short fingerprint used to correlate a rejected exchange in logs.
pub fn fingerprint(request: &[u8], response: &[u8]) -> String {
    let mut hex = sha256_hex(&[request, response]);
    hex.truncate(8);
    hex
}
