//! # Schema Canonicalization
//!
//! A signature covers bytes, not meaning. Two schemas that differ only in
//! key order or whitespace must produce the same signed payload, and fields
//! that change on every publish (`timestamp`, `version`) must not invalidate
//! a signature at all.
//!
//! The payload is produced in two steps:
//!
//! 1. Top-level volatile fields are removed ([`VOLATILE_FIELDS`]).
//! 2. The remainder is serialized following RFC 8785 (JCS): object keys
//!    sorted by UTF-16 code units, no insignificant whitespace, minimal
//!    string escaping.
//!
//! ## Example
//!
//! ```rust
//! use toolpin_core::canonicalize::canonical_schema;
//! use serde_json::json;
//!
//! let published = json!({"name": "db_query", "version": "1.2.0", "type": "object"});
//! let republished = json!({"type": "object", "name": "db_query", "version": "1.3.0"});
//!
//! assert_eq!(canonical_schema(&published), canonical_schema(&republished));
//! assert_eq!(canonical_schema(&published), r#"{"name":"db_query","type":"object"}"#);
//! ```
//!
//! ## References
//!
//! - RFC 8785, "JSON Canonicalization Scheme (JCS)"
//!   <https://www.rfc-editor.org/rfc/rfc8785>

use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fmt::Write;

/// Top-level fields excluded from the signed payload.
pub const VOLATILE_FIELDS: [&str; 2] = ["timestamp", "version"];

/// Canonical signed payload for `schema`.
///
/// Only top-level volatile fields are stripped; a nested `version` is part
/// of the schema's meaning and stays.
pub fn canonical_schema(schema: &Value) -> String {
    match schema {
        Value::Object(fields) => {
            let kept: Map<String, Value> = fields
                .iter()
                .filter(|(key, _)| !VOLATILE_FIELDS.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            canonicalize(&Value::Object(kept))
        }
        other => canonicalize(other),
    }
}

/// SHA-256 of [`canonical_schema`].
pub fn schema_digest(schema: &Value) -> [u8; 32] {
    Sha256::digest(canonical_schema(schema).as_bytes()).into()
}

/// Serializes any JSON value per RFC 8785.
pub fn canonicalize(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => write_number(out, n),
        Value::String(s) => write_string(out, s),
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
        Value::Object(fields) => {
            let mut entries: Vec<(&String, &Value)> = fields.iter().collect();
            entries.sort_by(|(a, _), (b, _)| utf16_order(a, b));

            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_value(out, item);
            }
            out.push('}');
        }
    }
}

/// Integers verbatim; floats without a fractional part as integers.
fn write_number(out: &mut String, n: &Number) {
    if let Some(i) = n.as_i64() {
        let _ = write!(out, "{}", i);
    } else if let Some(u) = n.as_u64() {
        let _ = write!(out, "{}", u);
    } else {
        match n.as_f64() {
            Some(f) if !f.is_finite() => out.push_str("null"),
            // Negative zero serializes as plain 0.
            Some(f) if f == 0.0 => out.push('0'),
            Some(f) if f.fract() == 0.0 && f.abs() < 1e21 => {
                let _ = write!(out, "{:.0}", f);
            }
            Some(f) => {
                let _ = write!(out, "{}", f);
            }
            None => {
                let _ = write!(out, "{}", n);
            }
        }
    }
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0C}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c < '\u{20}' => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn utf16_order(a: &str, b: &str) -> Ordering {
    a.encode_utf16().cmp(b.encode_utf16())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalars() {
        assert_eq!(canonicalize(&json!(null)), "null");
        assert_eq!(canonicalize(&json!(true)), "true");
        assert_eq!(canonicalize(&json!(-17)), "-17");
        assert_eq!(canonicalize(&json!(2.0)), "2");
        assert_eq!(canonicalize(&json!(2.5)), "2.5");
    }

    #[test]
    fn test_negative_zero() {
        assert_eq!(canonicalize(&json!(-0.0)), "0");
        let parsed: serde_json::Value = serde_json::from_str(r#"{"x":-0.0}"#).unwrap();
        assert_eq!(canonicalize(&parsed), r#"{"x":0}"#);
        assert_eq!(canonicalize(&json!(-3.0)), "-3");
    }

    #[test]
    fn test_string_escaping() {
        assert_eq!(canonicalize(&json!("he\"llo")), r#""he\"llo""#);
        assert_eq!(canonicalize(&json!("a\\b")), r#""a\\b""#);
        assert_eq!(canonicalize(&json!("line\nbreak")), r#""line\nbreak""#);
        assert_eq!(canonicalize(&json!("\u{01}")), r#""\u0001""#);
        assert_eq!(canonicalize(&json!("a/b é")), "\"a/b é\"");
    }

    #[test]
    fn test_key_order_independent() {
        let a = json!({"b": 1, "a": {"z": [3, 1], "y": null}});
        let b = json!({"a": {"y": null, "z": [3, 1]}, "b": 1});
        assert_eq!(canonicalize(&a), canonicalize(&b));
        assert_eq!(canonicalize(&a), r#"{"a":{"y":null,"z":[3,1]},"b":1}"#);
    }

    #[test]
    fn test_utf16_key_order() {
        // Surrogate pairs sort below U+FF61 even though the code point is higher.
        let value = json!({"\u{FF61}": 2, "\u{1F600}": 1});
        assert_eq!(canonicalize(&value), "{\"\u{1F600}\":1,\"\u{FF61}\":2}");
    }

    #[test]
    fn test_volatile_fields_stripped_at_top_level_only() {
        let schema = json!({
            "name": "tool",
            "timestamp": "2024-01-01T00:00:00Z",
            "version": "1.0",
            "parameters": {"version": {"type": "string"}}
        });
        assert_eq!(
            canonical_schema(&schema),
            r#"{"name":"tool","parameters":{"version":{"type":"string"}}}"#
        );
    }

    #[test]
    fn test_digest_changes_with_content() {
        let a = json!({"name": "read_file"});
        let b = json!({"name": "write_file"});
        assert_eq!(schema_digest(&a), schema_digest(&json!({"name": "read_file", "version": "9"})));
        assert_ne!(schema_digest(&a), schema_digest(&b));
    }

    #[test]
    fn test_non_object_schema() {
        assert_eq!(canonical_schema(&json!(["version"])), r#"["version"]"#);
    }
}
