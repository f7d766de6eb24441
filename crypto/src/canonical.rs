//! Canonical JSON encoding
//!
//! The unique pre-image for every hash and signature in the system: keys
//! sorted ascending, no insignificant whitespace, strings UTF-8 escaped as
//! by `serde_json`, big integers rendered as decimal strings by their own
//! serializers. Proposer, validator and coordinator must all hash through
//! this encoder; any divergence halts consensus.

use meridian_core::{Hash, MeridianError, MeridianResult};
use serde::Serialize;
use serde_json::Value;

use crate::hashing::sha256;

/// Render a JSON value in canonical form
pub fn canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => {
            // serde_json performs the escaping; a String never fails to encode
            out.push_str(&serde_json::to_string(s).unwrap_or_default());
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).unwrap_or_default());
                out.push(':');
                write_value(out, &map[*key]);
            }
            out.push('}');
        }
    }
}

/// Canonical JSON bytes of any serializable value
pub fn canonical_bytes<T: Serialize>(value: &T) -> MeridianResult<Vec<u8>> {
    let json = serde_json::to_value(value)
        .map_err(|e| MeridianError::SerializationError(e.to_string()))?;
    Ok(canonical_string(&json).into_bytes())
}

/// SHA-256 over the canonical JSON encoding of a value
pub fn canonical_hash<T: Serialize>(value: &T) -> MeridianResult<Hash> {
    Ok(sha256(&canonical_bytes(value)?))
}
