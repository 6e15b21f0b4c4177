//! Canonical content hashing for raw payloads.
//!
//! Two payloads with the same fields in a different key order must hash
//! identically, so objects are serialized with sorted keys before digesting.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// SHA-256 hex digest over the canonicalized payload.
#[must_use]
pub fn payload_hash(payload: &Value) -> String {
    let canonical = canonicalize(payload);
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Rebuilds the value with all object keys sorted, recursively.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(map.len());
            for key in keys {
                // Insertion order is serialization order for serde_json maps.
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hash_is_key_order_independent() {
        let a: Value = serde_json::from_str(r#"{"id":"btc","price":100,"name":"Bitcoin"}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"name":"Bitcoin","id":"btc","price":100}"#).unwrap();
        assert_eq!(payload_hash(&a), payload_hash(&b));
    }

    #[test]
    fn test_hash_sorts_nested_objects() {
        let a: Value =
            serde_json::from_str(r#"{"quotes":{"USD":{"price":1,"volume":2}},"id":"x"}"#).unwrap();
        let b: Value =
            serde_json::from_str(r#"{"id":"x","quotes":{"USD":{"volume":2,"price":1}}}"#).unwrap();
        assert_eq!(payload_hash(&a), payload_hash(&b));
    }

    #[test]
    fn test_different_content_differs() {
        let a = json!({"id": "btc", "price": 100});
        let b = json!({"id": "btc", "price": 101});
        assert_ne!(payload_hash(&a), payload_hash(&b));
    }

    #[test]
    fn test_same_content_different_id_differs() {
        let a = json!({"id": "btc", "price": 100});
        let b = json!({"id": "wbtc", "price": 100});
        assert_ne!(payload_hash(&a), payload_hash(&b));
    }

    #[test]
    fn test_hash_is_stable() {
        let payload = json!({"id": "btc"});
        assert_eq!(payload_hash(&payload), payload_hash(&payload));
        assert_eq!(payload_hash(&payload).len(), 64);
    }

    #[test]
    fn test_arrays_preserve_order() {
        let a = json!({"tags": [1, 2, 3]});
        let b = json!({"tags": [3, 2, 1]});
        assert_ne!(payload_hash(&a), payload_hash(&b));
    }
}
