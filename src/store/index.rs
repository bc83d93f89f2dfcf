// Inverted index key scheme
// Version 2 keys carry the field value as canonical JSON (object keys sorted, numbers
// normalized), so equal values always land under the same key.

use std::fmt::Write;

use serde_json::Value;

pub(crate) const INDEX_VERSION: f64 = 2.0;
pub(crate) const VERSION_KEY: &str = "__index_version__";
pub(crate) const ALL_IDS_KEY: &str = "ids:all";
pub(crate) const META_PREFIX: &str = "meta:v2:";

/// Serialize `value` deterministically
///
/// Object keys are emitted in sorted order regardless of how the map was built, and
/// integral floats are written as integers so `3` and `3.0` agree.
#[inline]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(value, out);
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
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 9.0e15 => {
                let _ = write!(out, "{}", f as i64);
            }
            _ => out.push_str(&n.to_string()),
        },
        other => out.push_str(&other.to_string()),
    }
}

#[inline]
pub(crate) fn meta_key(field: &str, value: &Value) -> String {
    format!("{META_PREFIX}{field}={}", canonical_json(value))
}

/// Keys written by the first index format: `meta:<field>:<value coerced to a string>`
#[inline]
pub(crate) fn is_legacy_key(key: &str) -> bool {
    key.starts_with("meta:") && !key.starts_with(META_PREFIX)
}
