//! Hashing utilities for RansomEye

use sha2::{Digest, Sha256};

/// Compute SHA-256 hash of data
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute SHA-256 hash and return as hex string
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Whether a string looks like a SHA-256 hex digest
pub fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_is_64_chars() {
        let hash = sha256_hex(b"ransomeye");
        assert_eq!(hash.len(), 64);
        assert!(is_sha256_hex(&hash));
    }

    #[test]
    fn sha256_is_deterministic() {
        assert_eq!(sha256_hex(b"a"), sha256_hex(b"a"));
        assert_ne!(sha256_hex(b"a"), sha256_hex(b"b"));
    }

    #[test]
    fn rejects_non_digest_strings() {
        assert!(!is_sha256_hex("zz"));
        assert!(!is_sha256_hex(&"g".repeat(64)));
    }
}
