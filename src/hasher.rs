//! Content fingerprints for source records
//!
//! A record is rendered to a canonical JSON text and digested with SHA-256.
//! The text follows Python's `json.dumps(obj, sort_keys=True)`: keys sorted at
//! every level, `", "` and `": "` separators, non-ASCII escaped as `\uXXXX`
//! and floats in `repr` notation (`1e-07`, `1e+16`, `100.0`). Two records
//! that differ only in key order share a fingerprint.
//!
//! Integers beyond the 64-bit range are parsed as floats, so their text can
//! differ from Python's arbitrary-precision output.

use serde::Serialize;
use serde_json::ser::{Formatter, Serializer};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::io;

/// Fingerprint a record as a 64-character lowercase hex string
pub fn fingerprint(record: &Map<String, Value>) -> serde_json::Result<String> {
    let canonical = canonical_bytes(&sorted_object(record))?;
    Ok(format!("{:x}", Sha256::digest(&canonical)))
}

/// Render any JSON value in canonical form
pub fn canonical_json(value: &Value) -> serde_json::Result<String> {
    let canonical = canonical_bytes(&sorted(value))?;
    // Every non-ASCII character is escaped, so the output is always ASCII
    Ok(String::from_utf8_lossy(&canonical).into_owned())
}

fn canonical_bytes<T: Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    let mut out = Vec::new();
    value.serialize(&mut Serializer::with_formatter(&mut out, PythonFormatter))?;
    Ok(out)
}

fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(sorted_object(map)),
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

fn sorted_object(map: &Map<String, Value>) -> Map<String, Value> {
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
        .into_iter()
        .map(|(key, value)| (key.clone(), sorted(value)))
        .collect()
}

/// Separators, string escaping and float notation of Python's `json` module
struct PythonFormatter;

impl Formatter for PythonFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }

    fn write_f64<W>(&mut self, writer: &mut W, value: f64) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(float_repr(value).as_bytes())
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let mut start = 0;
        for (i, c) in fragment.char_indices() {
            if c.is_ascii() {
                continue;
            }
            writer.write_all(fragment[start..i].as_bytes())?;
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                write!(writer, "\\u{:04x}", unit)?;
            }
            start = i + c.len_utf8();
        }
        writer.write_all(fragment[start..].as_bytes())
    }
}

/// Shortest round-trip digits, laid out the way Python's `float.__repr__` does.
///
/// Decimal exponents from -4 through 15 print positionally with at least one
/// fractional digit; the rest use a signed exponent of at least two digits.
fn float_repr(value: f64) -> String {
    let scientific = format!("{:e}", value);
    let (mantissa, exponent) = match scientific.split_once('e') {
        Some((mantissa, exponent)) => (mantissa, exponent.parse::<i32>().unwrap_or(0)),
        None => (scientific.as_str(), 0),
    };

    if (-4..16).contains(&exponent) {
        let positional = value.to_string();
        if positional.contains('.') {
            positional
        } else {
            positional + ".0"
        }
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exponent.abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("fixture must be an object"),
        }
    }

    #[test]
    fn test_canonical_form_sorts_recursively() {
        let value = json!({"b": 1, "a": {"d": "x", "c": true}});
        assert_eq!(
            canonical_json(&value).unwrap(),
            r#"{"a": {"c": true, "d": "x"}, "b": 1}"#
        );
    }

    #[test]
    fn test_canonical_form_escapes_non_ascii() {
        let value = json!({"name": "Zürich \"LSZH\"\n"});
        assert_eq!(
            canonical_json(&value).unwrap(),
            r#"{"name": "Z\u00fcrich \"LSZH\"\n"}"#
        );
        assert_eq!(canonical_json(&json!("✈")).unwrap(), r#""\u2708""#);
        assert_eq!(canonical_json(&json!("😀")).unwrap(), r#""\ud83d\ude00""#);
    }

    #[test]
    fn test_canonical_form_uses_python_float_notation() {
        let value = json!({
            "small": 1e-7,
            "large": 1e16,
            "mantissa": 1.5e16,
            "negative": -2.5e-5,
            "boundary": 0.0001,
            "whole": 100.0,
            "big_whole": 1e15,
            "count": 3
        });
        assert_eq!(
            canonical_json(&value).unwrap(),
            r#"{"big_whole": 1000000000000000.0, "boundary": 0.0001, "count": 3, "large": 1e+16, "mantissa": 1.5e+16, "negative": -2.5e-05, "small": 1e-07, "whole": 100.0}"#
        );
    }

    #[test]
    fn test_canonical_form_arrays_and_controls() {
        let value = json!({"legs": [{"to": "KLAX", "from": "KSFO"}, null, "\u{1f}"]});
        assert_eq!(
            canonical_json(&value).unwrap(),
            r#"{"legs": [{"from": "KSFO", "to": "KLAX"}, null, "\u001f"]}"#
        );
    }

    #[test]
    fn test_fingerprint_ignores_key_order() {
        let a = object(json!({
            "table": "flights",
            "date": "2024-01-01",
            "remarks": {"weather": "VFR", "notes": "ok"}
        }));
        let b = object(json!({
            "remarks": {"notes": "ok", "weather": "VFR"},
            "date": "2024-01-01",
            "table": "flights"
        }));

        assert_eq!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }

    #[test]
    fn test_fingerprint_differs_on_value() {
        let a = object(json!({"table": "flights", "date": "2024-01-01"}));
        let b = object(json!({"table": "flights", "date": "2024-01-02"}));
        let c = object(json!({"table": "flights", "date": "2024-01-01", "remarks": {"notes": "x"}}));
        let d = object(json!({"table": "flights", "date": "2024-01-01", "remarks": {"notes": "y"}}));

        assert_ne!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
        assert_ne!(fingerprint(&c).unwrap(), fingerprint(&d).unwrap());
        assert_ne!(fingerprint(&a).unwrap(), fingerprint(&c).unwrap());
    }

    #[test]
    fn test_fingerprint_known_value() {
        let record = object(json!({
            "table": "flights",
            "date": "2024-01-01",
            "remarks": {"weather": "VFR", "notes": "ok"}
        }));
        assert_eq!(
            fingerprint(&record).unwrap(),
            "5386f50e1aceb8a28aa603bf60abe7db11ce73b1dcb2d55218e83d4108bfee26"
        );
    }

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        let hash = fingerprint(&object(json!({"table": "aircraft"}))).unwrap();
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
