//! Canonical JSON serialization.
//!
//! Payload hashes and envelope signatures must be stable across nodes, so
//! everything that gets hashed or signed goes through this module: object
//! keys sorted lexicographically, UTF-8, no insignificant whitespace.

use canswarm_core::error::SwarmError;
use serde::Serialize;
use serde_json::Value;

/// Serialize `value` to canonical JSON bytes.
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>, SwarmError> {
    let tree =
        serde_json::to_value(value).map_err(|e| SwarmError::Canonicalization(e.to_string()))?;
    let mut out = Vec::new();
    write_value(&tree, &mut out)?;
    Ok(out)
}

fn write_value(value: &Value, out: &mut Vec<u8>) -> Result<(), SwarmError> {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if n.as_i64().is_none() && n.as_u64().is_none() && !f.is_finite() {
                    return Err(SwarmError::Canonicalization(
                        "non-finite number has no canonical form".into(),
                    ));
                }
            }
            out.extend_from_slice(n.to_string().as_bytes());
        }
        Value::String(s) => {
            let escaped = serde_json::to_string(s)
                .map_err(|e| SwarmError::Canonicalization(e.to_string()))?;
            out.extend_from_slice(escaped.as_bytes());
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
        Value::Object(map) => {
            // serde_json's default map is ordered, but sort explicitly so the
            // guarantee does not depend on a feature flag.
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push(b'{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                let escaped = serde_json::to_string(key)
                    .map_err(|e| SwarmError::Canonicalization(e.to_string()))?;
                out.extend_from_slice(escaped.as_bytes());
                out.push(b':');
                write_value(&map[key.as_str()], out)?;
            }
            out.push(b'}');
        }
    }
    Ok(())
}
