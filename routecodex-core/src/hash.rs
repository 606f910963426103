use serde_json::Value;
use sha2::{Digest, Sha256};

/// Serialize a JSON value with recursively sorted object keys.
///
/// The output is byte-stable across key insertion order, which makes it a
/// valid hashing input: two configs that differ only in key order hash
/// identically.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).expect("string serializes"));
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        // Scalars already have a single serde_json rendering.
        other => out.push_str(&serde_json::to_string(other).expect("scalar serializes")),
    }
}

/// Stable hash over a normalized config value, hex-encoded.
pub fn config_hash(value: &Value) -> String {
    let canonical = canonical_json(value);
    let digest = Sha256::digest(canonical.as_bytes());
    let mut hex = String::with_capacity(16);
    // 8 bytes of digest is plenty for pool keying; collisions within one
    // route table's worth of configs are not a realistic concern.
    for byte in digest.iter().take(8) {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}
