//! Canonical JSON serialisation and content-addressed fingerprints (spec §4.1).
//!
//! `serde_json::Value::Object` is backed by a `BTreeMap` as long as the
//! `preserve_order` feature is never enabled anywhere in the dependency
//! graph; that gives us alphabetic key sorting for free. Combined with
//! `serde_json`'s compact writer (no insignificant whitespace) and its
//! shortest-round-trip float formatting, `serde_json::to_vec` on a
//! `Value` already satisfies the "stable bytes for semantically equal
//! input" contract this module is built on.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::BvError;

/// Serialise `x` into canonical JSON bytes: sorted keys, compact
/// separators, UTF-8, no insignificant whitespace.
pub fn canonical_bytes<T: Serialize>(x: &T) -> Result<Vec<u8>, BvError> {
    let value = serde_json::to_value(x).map_err(BvError::serialization)?;
    serde_json::to_vec(&value).map_err(BvError::serialization)
}

/// Convenience wrapper returning canonical JSON as a `String`.
pub fn canonical_json<T: Serialize>(x: &T) -> Result<String, BvError> {
    let bytes = canonical_bytes(x)?;
    String::from_utf8(bytes).map_err(|e| BvError::Internal(e.to_string()))
}

/// Lower-case hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Normalise a hex digest into the `sha256:<64hex>` fingerprint form. Idempotent:
/// already-prefixed input is returned unchanged.
pub fn ensure_prefix(hex_digest: impl AsRef<str>) -> String {
    let s = hex_digest.as_ref();
    if let Some(rest) = s.strip_prefix("sha256:") {
        format!("sha256:{rest}")
    } else {
        format!("sha256:{s}")
    }
}

/// Fingerprint `x` as `sha256:<64hex>` over its canonical JSON bytes (I4).
pub fn fingerprint<T: Serialize>(x: &T) -> Result<String, BvError> {
    let bytes = canonical_bytes(x)?;
    Ok(ensure_prefix(sha256_hex(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_bytes_sorts_keys() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonical_bytes(&a).unwrap(), canonical_bytes(&b).unwrap());
        assert_eq!(canonical_bytes(&a).unwrap(), br#"{"a":2,"b":1}"#.to_vec());
    }

    #[test]
    fn fingerprint_is_stable_and_prefixed() {
        let a = json!({"x": [1, 2, 3], "y": "z"});
        let fp1 = fingerprint(&a).unwrap();
        let fp2 = fingerprint(&a).unwrap();
        assert_eq!(fp1, fp2);
        assert!(fp1.starts_with("sha256:"));
        assert_eq!(fp1.len(), "sha256:".len() + 64);
    }

    #[test]
    fn ensure_prefix_idempotent() {
        let raw = sha256_hex(b"abc");
        let once = ensure_prefix(&raw);
        let twice = ensure_prefix(&once);
        assert_eq!(once, twice);
    }
}
