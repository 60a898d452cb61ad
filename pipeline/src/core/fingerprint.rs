//! Short content fingerprints for step outputs.

use sha2::{Digest, Sha256};

/// Number of digest bytes kept in a fingerprint (16 hex chars).
const FINGERPRINT_BYTES: usize = 8;

/// Compute a short, stable fingerprint of `content`.
pub fn fingerprint(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let digest = hasher.finalize();
    hex::encode(&digest[..FINGERPRINT_BYTES])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_short_and_stable() {
        let a = fingerprint(b"hello");
        assert_eq!(a.len(), FINGERPRINT_BYTES * 2);
        assert_eq!(a, fingerprint(b"hello"));
        assert_eq!(a, "2cf24dba5fb0a30e");
    }

    #[test]
    fn fingerprint_changes_with_content() {
        assert_ne!(fingerprint(b"hello"), fingerprint(b"hello!"));
    }
}
