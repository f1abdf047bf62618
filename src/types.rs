use serde::{Deserialize, Serialize};

/// Identifier of a stored [`Row`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowId(pub u64);

/// Identifier of a stored [`Attribute`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttributeId(pub u64);

/// Identifier of a stored [`ChildAttribute`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChildAttributeId(pub u64);

/// Identifier of a stored [`AttributeValue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueId(pub u64);

impl std::fmt::Display for RowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "row#{}", self.0)
    }
}

/// One imported record, identified by its content fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub id: RowId,

    /// SHA-256 fingerprint of the record, hex encoded
    pub hash: String,

    /// Lower-cased source table name, e.g. "flights"
    pub table: String,
}

/// A top-level field of a row. Nested fields get one too, as the parent of their children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub id: AttributeId,
    pub row: RowId,
    pub name: String,
}

/// A field one level inside an object-valued attribute.
///
/// Only the owning row is recorded; the parent attribute is recovered by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildAttribute {
    pub id: ChildAttributeId,
    pub row: RowId,
    pub name: String,
}

/// A leaf value, string-serialized.
///
/// Scalar fields set only `attribute`. Nested fields set `child_attribute`
/// and keep `attribute` pointing at the parent field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeValue {
    pub id: ValueId,
    pub row: RowId,
    pub attribute: Option<AttributeId>,
    pub child_attribute: Option<ChildAttributeId>,
    pub value: String,
}

/// Row payload for bulk insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRow {
    pub hash: String,
    pub table: String,
}

/// Attribute payload for bulk insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttribute {
    pub row: RowId,
    pub name: String,
}

/// ChildAttribute payload for bulk insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChildAttribute {
    pub row: RowId,
    pub name: String,
}

/// AttributeValue payload for bulk insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttributeValue {
    pub row: RowId,
    pub attribute: Option<AttributeId>,
    pub child_attribute: Option<ChildAttributeId>,
    pub value: String,
}

impl NewAttributeValue {
    pub fn scalar(row: RowId, attribute: AttributeId, value: impl Into<String>) -> Self {
        NewAttributeValue {
            row,
            attribute: Some(attribute),
            child_attribute: None,
            value: value.into(),
        }
    }

    pub fn nested(
        row: RowId,
        parent: AttributeId,
        child: ChildAttributeId,
        value: impl Into<String>,
    ) -> Self {
        NewAttributeValue {
            row,
            attribute: Some(parent),
            child_attribute: Some(child),
            value: value.into(),
        }
    }
}

/// The shape of one field of a source record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// A scalar, already coerced to its stored string form
    Scalar(String),

    /// A one-level nested object of scalars, in source key order
    Nested(Vec<(String, String)>),
}

/// A validated, fingerprinted source record ready for import
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    /// Lower-cased table name
    pub table: String,

    /// Content fingerprint, computed after the table name is lower-cased
    pub hash: String,

    /// Every field except `table`, in source order
    pub fields: Vec<(String, FieldValue)>,
}

impl SourceRecord {
    pub fn nested_fields(&self) -> impl Iterator<Item = (&str, &[(String, String)])> {
        self.fields.iter().filter_map(|(name, value)| match value {
            FieldValue::Nested(children) => Some((name.as_str(), children.as_slice())),
            FieldValue::Scalar(_) => None,
        })
    }
}

/// An attribute value joined with its row hash and resolved names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueRecord {
    pub row_hash: String,
    pub attribute_name: Option<String>,
    pub child_attribute_name: Option<String>,
    pub value: String,
}

/// Configuration for the import run
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Maximum number of records per bulk insert
    pub batch_size: usize,

    /// Collapse records with identical fingerprints instead of failing on the unique hash
    pub skip_duplicates: bool,

    /// Replace literal `\"` sequences in the raw source before parsing
    pub unescape_quotes: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        ImportConfig {
            batch_size: 1000,
            skip_duplicates: false,
            unescape_quotes: true,
        }
    }
}

/// Configuration for the CSV export
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Single-column marker line opening the document
    pub marker: String,

    /// Appended to the capitalized table name in each section header
    pub section_suffix: String,

    /// Attribute names never rendered as columns
    pub dropped_columns: Vec<String>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        ExportConfig {
            marker: String::from("ForeFlight Logbook Import"),
            section_suffix: String::from(" Table"),
            dropped_columns: vec![String::from("row_hash"), String::from("table")],
        }
    }
}
