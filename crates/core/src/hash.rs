//! SHA-256 and hex/canonical-JSON primitives shared by every other module.
//!
//! Hash inputs are always raw byte concatenation, never length-framed: every
//! caller in this crate relies on that so two different inputs can never be
//! made to collide by shifting a length prefix around.

use serde_json::Value;
use sha2::{Digest, Sha256};

pub type Hash = [u8; 32];

/// SHA-256 over the concatenation of all `parts`.
pub fn sha256_concat(parts: &[&[u8]]) -> Hash {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

pub fn sha256(data: &[u8]) -> Hash {
    sha256_concat(&[data])
}

pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

pub fn from_hex_32(s: &str) -> Option<Hash> {
    let bytes = hex::decode(s).ok()?;
    bytes.try_into().ok()
}

/// Render a JSON object with keys in exactly the order given, no whitespace
/// outside string values.
///
/// `serde_json::Map`'s default iteration order is insertion order (the
/// `preserve_order` feature is not enabled here), but relying on a caller's
/// struct-field order to survive through `serde_json::to_value` is fragile.
/// This helper takes the key order explicitly so anchor payload rendering
/// stays byte-identical regardless of how the value was constructed.
pub fn canonical_json(fields: &[(&str, Value)]) -> String {
    let mut out = String::from("{");
    for (i, (key, value)) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&serde_json::to_string(key).expect("string keys always serialize"));
        out.push(':');
        out.push_str(&serde_json::to_string(value).expect("values are plain JSON"));
    }
    out.push('}');
    out
}

/// SHA-256 of the UTF-8 bytes of a canonical JSON rendering.
pub fn canonical_json_hash(fields: &[(&str, Value)]) -> Hash {
    sha256(canonical_json(fields).as_bytes())
}

/// A ledger leaf's hash: `SHA256(commitment ++ nullifier ++ timestamp_be64)`.
/// The timestamp is folded in so two ballots with the same commitment and
/// nullifier (impossible in practice since the nullifier already prevents
/// replay, but not something the hash function itself should assume) still
/// produce distinct leaves if they somehow land at different times.
pub fn leaf_hash(commitment: &Hash, nullifier: &Hash, timestamp_unix: u64) -> Hash {
    sha256_concat(&[commitment, nullifier, &timestamp_unix.to_be_bytes()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hex_roundtrip() {
        let h = sha256(b"hello");
        let s = to_hex(&h);
        assert_eq!(s.len(), 64);
        assert_eq!(from_hex_32(&s).unwrap(), h);
    }

    #[test]
    fn from_hex_32_rejects_wrong_length() {
        assert!(from_hex_32("aabb").is_none());
        assert!(from_hex_32("zz").is_none());
    }

    #[test]
    fn canonical_json_has_no_whitespace_and_preserves_order() {
        let rendered = canonical_json(&[("b", json!(1)), ("a", json!("x"))]);
        assert_eq!(rendered, r#"{"b":1,"a":"x"}"#);
    }

    #[test]
    fn canonical_json_hash_is_deterministic() {
        let fields = [("type", json!("tvs-election-start")), ("version", json!(1))];
        let h1 = canonical_json_hash(&fields);
        let h2 = canonical_json_hash(&fields);
        assert_eq!(h1, h2);
    }

    #[test]
    fn leaf_hash_differs_by_timestamp() {
        let c = sha256(b"commitment");
        let n = sha256(b"nullifier");
        assert_ne!(leaf_hash(&c, &n, 1), leaf_hash(&c, &n, 2));
    }

    #[test]
    fn concat_is_not_length_framed() {
        // sha256_concat(["a","bc"]) must equal sha256_concat(["ab","c"])
        // since there is no length prefix between parts.
        assert_eq!(sha256_concat(&[b"a", b"bc"]), sha256_concat(&[b"ab", b"c"]));
    }
}
