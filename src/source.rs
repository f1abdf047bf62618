//! Source loading and record flattening
//!
//! Reads a JSON array of records, lower-cases each table name, fingerprints
//! the record and splits its fields into scalars and one-level nested objects.

use crate::error::{PilotlogError, Result};
use crate::hasher::fingerprint;
use crate::types::{FieldValue, ImportConfig, SourceRecord};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::debug;

/// Load and flatten every record of a JSON source file
pub fn load_source<P: AsRef<Path>>(path: P, config: &ImportConfig) -> Result<Vec<SourceRecord>> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(PilotlogError::InputNotFound(path.to_path_buf()));
    }

    let text = std::fs::read_to_string(path)?;
    let records = parse_source(&text, config)?;
    debug!(path = %path.display(), records = records.len(), "loaded source");
    Ok(records)
}

/// Parse and flatten a JSON source document
pub fn parse_source(text: &str, config: &ImportConfig) -> Result<Vec<SourceRecord>> {
    // Some producers emit every quote as \" in the raw file
    let text = if config.unescape_quotes {
        text.replace("\\\"", "\"")
    } else {
        text.to_string()
    };

    let mut bytes = text.as_bytes().to_vec();
    let document: Value = match simd_json::serde::from_slice(&mut bytes) {
        Ok(value) => value,
        // Re-parse with serde_json for a positioned error message
        Err(_) => serde_json::from_str(&text)
            .map_err(|e| PilotlogError::MalformedInput(e.to_string()))?,
    };

    let Value::Array(items) = document else {
        return Err(PilotlogError::MalformedInput(
            "expected a JSON array of records".to_string(),
        ));
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Object(record) => flatten_record(index, record),
            _ => Err(PilotlogError::MalformedInput(format!(
                "record {index} is not an object"
            ))),
        })
        .collect()
}

/// Validate one record, normalize its table name and split its fields
pub fn flatten_record(index: usize, mut record: Map<String, Value>) -> Result<SourceRecord> {
    let table = match record.get("table") {
        Some(Value::String(name)) => name.to_lowercase(),
        Some(_) => {
            return Err(PilotlogError::MalformedInput(format!(
                "record {index}: 'table' must be a string"
            )))
        }
        None => return Err(PilotlogError::MissingTable { index }),
    };
    record.insert("table".to_string(), Value::String(table.clone()));

    let hash = fingerprint(&record)
        .map_err(|e| PilotlogError::MalformedInput(format!("record {index}: {e}")))?;

    let mut fields = Vec::with_capacity(record.len().saturating_sub(1));
    for (name, value) in record.into_iter() {
        if name == "table" {
            continue;
        }
        let field = match value {
            Value::Object(children) => FieldValue::Nested(flatten_children(index, &name, children)?),
            Value::Array(_) => return Err(PilotlogError::UnsupportedValue { index, field: name }),
            scalar => FieldValue::Scalar(scalar_to_string(&scalar)),
        };
        fields.push((name, field));
    }

    Ok(SourceRecord { table, hash, fields })
}

fn flatten_children(
    index: usize,
    parent: &str,
    children: Map<String, Value>,
) -> Result<Vec<(String, String)>> {
    children
        .into_iter()
        .map(|(name, value)| match value {
            Value::Object(_) => Err(PilotlogError::NestingTooDeep {
                index,
                field: format!("{parent}.{name}"),
            }),
            Value::Array(_) => Err(PilotlogError::UnsupportedValue {
                index,
                field: format!("{parent}.{name}"),
            }),
            scalar => Ok((name, scalar_to_string(&scalar))),
        })
        .collect()
}

/// Coerce a scalar to its stored string form
pub fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<Vec<SourceRecord>> {
        parse_source(text, &ImportConfig::default())
    }

    #[test]
    fn test_flatten_scalar_and_nested() {
        let records = parse(
            r#"[{"table":"Flights","date":"2024-01-01","remarks":{"weather":"VFR","notes":"ok"}}]"#,
        )
        .unwrap();

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.table, "flights");
        assert_eq!(record.hash.len(), 64);
        assert_eq!(
            record.fields,
            vec![
                ("date".to_string(), FieldValue::Scalar("2024-01-01".to_string())),
                (
                    "remarks".to_string(),
                    FieldValue::Nested(vec![
                        ("weather".to_string(), "VFR".to_string()),
                        ("notes".to_string(), "ok".to_string()),
                    ])
                ),
            ]
        );
    }

    #[test]
    fn test_hash_covers_lowercased_table() {
        let upper = parse(r#"[{"table":"FLIGHTS","date":"2024-01-01"}]"#).unwrap();
        let lower = parse(r#"[{"date":"2024-01-01","table":"flights"}]"#).unwrap();
        assert_eq!(upper[0].hash, lower[0].hash);
    }

    #[test]
    fn test_scalar_coercion() {
        let records =
            parse(r#"[{"table":"aircraft","seats":4,"complex":true,"weight":1.5,"notes":null}]"#)
                .unwrap();
        let values: Vec<_> = records[0]
            .fields
            .iter()
            .map(|(_, v)| v.clone())
            .collect();
        assert_eq!(
            values,
            vec![
                FieldValue::Scalar("4".to_string()),
                FieldValue::Scalar("true".to_string()),
                FieldValue::Scalar("1.5".to_string()),
                FieldValue::Scalar(String::new()),
            ]
        );
    }

    #[test]
    fn test_unescapes_quoted_source() {
        let records = parse(r#"[{\"table\":\"Aircraft\",\"reg\":\"N123\"}]"#).unwrap();
        assert_eq!(records[0].table, "aircraft");
        assert_eq!(
            records[0].fields,
            vec![("reg".to_string(), FieldValue::Scalar("N123".to_string()))]
        );
    }

    #[test]
    fn test_missing_table_is_rejected() {
        let err = parse(r#"[{"table":"flights"},{"date":"2024-01-01"}]"#).unwrap_err();
        assert!(matches!(err, PilotlogError::MissingTable { index: 1 }));
    }

    #[test]
    fn test_non_string_table_is_malformed() {
        let err = parse(r#"[{"table":7}]"#).unwrap_err();
        assert!(matches!(err, PilotlogError::MalformedInput(_)));
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let err = parse(r#"[{"table":"flights","remarks":{"wx":{"wind":"calm"}}}]"#).unwrap_err();
        match err {
            PilotlogError::NestingTooDeep { index, field } => {
                assert_eq!(index, 0);
                assert_eq!(field, "remarks.wx");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_arrays_are_rejected() {
        let err = parse(r#"[{"table":"flights","crew":["a","b"]}]"#).unwrap_err();
        assert!(matches!(err, PilotlogError::UnsupportedValue { .. }));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            parse(r#"[{"table":"flights""#).unwrap_err(),
            PilotlogError::MalformedInput(_)
        ));
        assert!(matches!(
            parse(r#"{"table":"flights"}"#).unwrap_err(),
            PilotlogError::MalformedInput(_)
        ));
        assert!(matches!(
            parse(r#"["flights"]"#).unwrap_err(),
            PilotlogError::MalformedInput(_)
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = load_source("/nonexistent/pilotlog.json", &ImportConfig::default()).unwrap_err();
        assert!(matches!(err, PilotlogError::InputNotFound(_)));
    }
}
