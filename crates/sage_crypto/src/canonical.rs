//! Deterministic JSON serialisation.
//!
//! Signature bases and AEAD plaintexts are produced from this form, so
//! both peers must agree on it bit for bit: object keys in lexicographic
//! order, no insignificant whitespace, serde_json's shortest-round-trip
//! number encoding. Any divergence here breaks interop.

use serde::Serialize;
use serde_json::Value;

use crate::error::CryptoError;

/// Serialise `value` to canonical JSON bytes.
pub fn to_canonical_vec<T: Serialize>(value: &T) -> Result<Vec<u8>, CryptoError> {
    let value = serde_json::to_value(value)?;
    let mut out = Vec::new();
    write_value(&value, &mut out)?;
    Ok(out)
}

fn write_value(value: &Value, out: &mut Vec<u8>) -> Result<(), CryptoError> {
    match value {
        Value::Object(map) => {
            out.push(b'{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                serde_json::to_writer(&mut *out, key)?;
                out.push(b':');
                write_value(&map[key.as_str()], out)?;
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, out)?;
            }
            out.push(b']');
        }
        scalar => serde_json::to_writer(&mut *out, scalar)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_sorted_recursively() {
        let value = json!({
            "zulu": 1,
            "alpha": { "nested_z": true, "nested_a": [3, 2, 1] },
            "mike": "m",
        });
        let bytes = to_canonical_vec(&value).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"alpha":{"nested_a":[3,2,1],"nested_z":true},"mike":"m","zulu":1}"#
        );
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(to_canonical_vec(&a).unwrap(), to_canonical_vec(&b).unwrap());
    }

    #[test]
    fn arrays_keep_their_order() {
        let value = json!(["c", "a", "b"]);
        let bytes = to_canonical_vec(&value).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), r#"["c","a","b"]"#);
    }
}
