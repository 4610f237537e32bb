//! Stable SHA-256 digests over stored encodings, used in diagnostics.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Prefix for rendered digests (e.g. `sha256:deadbeef...`).
pub const DIGEST_PREFIX: &str = "sha256:";

/// Render the SHA-256 digest of `bytes` as a prefixed hex string.
pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{DIGEST_PREFIX}{}", hex::encode(hasher.finalize()))
}

/// Digest of the compact JSON encoding of `value`.
///
/// The encoding is the same one written to the store, so two values with the
/// same digest were persisted byte-for-byte identically.
pub fn digest_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(value)?;
    Ok(digest_bytes(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_prefixed_and_stable() {
        let a = digest_bytes(b"checkpoint");
        let b = digest_bytes(b"checkpoint");
        assert!(a.starts_with(DIGEST_PREFIX));
        assert_eq!(a.len(), DIGEST_PREFIX.len() + 64);
        assert_eq!(a, b);
        assert_ne!(a, digest_bytes(b"checkpoinT"));
    }

    #[test]
    fn json_digest_follows_field_order() {
        let first = digest_json(&(1u64, vec!["a"], Vec::<u8>::new())).unwrap();
        let second = digest_json(&(1u64, vec!["a"], Vec::<u8>::new())).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, digest_bytes(br#"[1,["a"],[]]"#));
    }
}
