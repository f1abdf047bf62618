//! EAV record storage
//!
//! [`RecordStore`] is the contract the importer writes through and the
//! exporter reads from. [`MemoryStore`] implements it in-process and can be
//! persisted as a JSON snapshot between runs.

use crate::error::StoreError;
use crate::types::{
    Attribute, AttributeId, AttributeValue, ChildAttribute, ChildAttributeId, NewAttribute,
    NewAttributeValue, NewChildAttribute, NewRow, Row, RowId, ValueId, ValueRecord,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Number of stored records per entity kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub rows: usize,
    pub attributes: usize,
    pub child_attributes: usize,
    pub values: usize,
}

/// Durable EAV persistence used by the importer and exporter
pub trait RecordStore {
    /// Delete every row, attribute, child attribute and value
    fn clear(&mut self) -> Result<(), StoreError>;

    /// Insert rows; the returned records are in input order
    fn insert_rows(&mut self, rows: Vec<NewRow>) -> Result<Vec<Row>, StoreError>;

    fn insert_attributes(
        &mut self,
        attributes: Vec<NewAttribute>,
    ) -> Result<Vec<Attribute>, StoreError>;

    fn insert_child_attributes(
        &mut self,
        children: Vec<NewChildAttribute>,
    ) -> Result<Vec<ChildAttribute>, StoreError>;

    fn insert_values(
        &mut self,
        values: Vec<NewAttributeValue>,
    ) -> Result<Vec<AttributeValue>, StoreError>;

    fn row_by_hash(&self, hash: &str) -> Option<Row>;

    fn attribute_by_name(&self, row: RowId, name: &str) -> Option<Attribute>;

    fn child_attribute_by_name(&self, row: RowId, name: &str) -> Option<ChildAttribute>;

    /// All attributes owned by the given rows
    fn attributes_of_rows(&self, rows: &HashSet<RowId>) -> Vec<Attribute>;

    /// All child attributes owned by the given rows
    fn child_attributes_of_rows(&self, rows: &HashSet<RowId>) -> Vec<ChildAttribute>;

    /// Distinct table names in first-seen order
    fn distinct_tables(&self) -> Vec<String>;

    /// Values of every row in `table`, joined with row hash and resolved names
    fn values_for_table(&self, table: &str) -> Vec<ValueRecord>;

    /// Delete a row and everything it owns
    fn delete_row(&mut self, id: RowId) -> bool;

    /// Delete an attribute and the values attached to it
    fn delete_attribute(&mut self, id: AttributeId) -> bool;

    /// Delete a child attribute and the values attached to it
    fn delete_child_attribute(&mut self, id: ChildAttributeId) -> bool;

    fn counts(&self) -> StoreCounts;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Sequences {
    row: u64,
    attribute: u64,
    child_attribute: u64,
    value: u64,
}

/// In-process record store with JSON snapshot persistence
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStore {
    rows: Vec<Row>,
    attributes: Vec<Attribute>,
    child_attributes: Vec<ChildAttribute>,
    values: Vec<AttributeValue>,
    sequences: Sequences,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot, or start empty when the file does not exist yet
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let snapshot_error = |message: String| StoreError::Snapshot {
            path: path.to_path_buf(),
            message,
        };
        let bytes = std::fs::read(path).map_err(|e| snapshot_error(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| snapshot_error(e.to_string()))
    }

    /// Write the whole store as a JSON snapshot
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), StoreError> {
        let path = path.as_ref();
        let snapshot_error = |message: String| StoreError::Snapshot {
            path: path.to_path_buf(),
            message,
        };
        let bytes = serde_json::to_vec(self).map_err(|e| snapshot_error(e.to_string()))?;
        std::fs::write(path, bytes).map_err(|e| snapshot_error(e.to_string()))
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn child_attributes(&self) -> &[ChildAttribute] {
        &self.child_attributes
    }

    pub fn values(&self) -> &[AttributeValue] {
        &self.values
    }

    fn row_ids(&self) -> HashSet<RowId> {
        self.rows.iter().map(|r| r.id).collect()
    }
}

fn dangling_row(id: RowId) -> StoreError {
    StoreError::DanglingReference {
        kind: "row",
        id: id.0,
    }
}

impl RecordStore for MemoryStore {
    fn clear(&mut self) -> Result<(), StoreError> {
        self.rows.clear();
        self.attributes.clear();
        self.child_attributes.clear();
        self.values.clear();
        Ok(())
    }

    fn insert_rows(&mut self, rows: Vec<NewRow>) -> Result<Vec<Row>, StoreError> {
        // Validate the whole batch before writing any of it
        let mut hashes: HashSet<&str> = self.rows.iter().map(|r| r.hash.as_str()).collect();
        for row in &rows {
            if !hashes.insert(row.hash.as_str()) {
                return Err(StoreError::DuplicateRowHash(row.hash.clone()));
            }
        }

        let created: Vec<Row> = rows
            .into_iter()
            .map(|row| {
                self.sequences.row += 1;
                Row {
                    id: RowId(self.sequences.row),
                    hash: row.hash,
                    table: row.table,
                }
            })
            .collect();
        self.rows.extend(created.iter().cloned());
        Ok(created)
    }

    fn insert_attributes(
        &mut self,
        attributes: Vec<NewAttribute>,
    ) -> Result<Vec<Attribute>, StoreError> {
        let row_ids = self.row_ids();
        let mut keys: HashSet<(RowId, &str)> = self
            .attributes
            .iter()
            .map(|a| (a.row, a.name.as_str()))
            .collect();
        for attribute in &attributes {
            if !row_ids.contains(&attribute.row) {
                return Err(dangling_row(attribute.row));
            }
            if !keys.insert((attribute.row, attribute.name.as_str())) {
                return Err(StoreError::DuplicateAttribute {
                    row: attribute.row,
                    name: attribute.name.clone(),
                });
            }
        }

        let created: Vec<Attribute> = attributes
            .into_iter()
            .map(|attribute| {
                self.sequences.attribute += 1;
                Attribute {
                    id: AttributeId(self.sequences.attribute),
                    row: attribute.row,
                    name: attribute.name,
                }
            })
            .collect();
        self.attributes.extend(created.iter().cloned());
        Ok(created)
    }

    fn insert_child_attributes(
        &mut self,
        children: Vec<NewChildAttribute>,
    ) -> Result<Vec<ChildAttribute>, StoreError> {
        let row_ids = self.row_ids();
        let mut keys: HashSet<(RowId, &str)> = self
            .child_attributes
            .iter()
            .map(|c| (c.row, c.name.as_str()))
            .collect();
        for child in &children {
            if !row_ids.contains(&child.row) {
                return Err(dangling_row(child.row));
            }
            if !keys.insert((child.row, child.name.as_str())) {
                return Err(StoreError::DuplicateChildAttribute {
                    row: child.row,
                    name: child.name.clone(),
                });
            }
        }

        let created: Vec<ChildAttribute> = children
            .into_iter()
            .map(|child| {
                self.sequences.child_attribute += 1;
                ChildAttribute {
                    id: ChildAttributeId(self.sequences.child_attribute),
                    row: child.row,
                    name: child.name,
                }
            })
            .collect();
        self.child_attributes.extend(created.iter().cloned());
        Ok(created)
    }

    fn insert_values(
        &mut self,
        values: Vec<NewAttributeValue>,
    ) -> Result<Vec<AttributeValue>, StoreError> {
        let attribute_ids: HashSet<AttributeId> = self.attributes.iter().map(|a| a.id).collect();
        let child_ids: HashSet<ChildAttributeId> =
            self.child_attributes.iter().map(|c| c.id).collect();
        let row_ids = self.row_ids();
        for value in &values {
            if !row_ids.contains(&value.row) {
                return Err(dangling_row(value.row));
            }
            if let Some(id) = value.attribute.filter(|id| !attribute_ids.contains(id)) {
                return Err(StoreError::DanglingReference {
                    kind: "attribute",
                    id: id.0,
                });
            }
            if let Some(id) = value.child_attribute.filter(|id| !child_ids.contains(id)) {
                return Err(StoreError::DanglingReference {
                    kind: "child attribute",
                    id: id.0,
                });
            }
        }

        let created: Vec<AttributeValue> = values
            .into_iter()
            .map(|value| {
                self.sequences.value += 1;
                AttributeValue {
                    id: ValueId(self.sequences.value),
                    row: value.row,
                    attribute: value.attribute,
                    child_attribute: value.child_attribute,
                    value: value.value,
                }
            })
            .collect();
        self.values.extend(created.iter().cloned());
        Ok(created)
    }

    fn row_by_hash(&self, hash: &str) -> Option<Row> {
        self.rows.iter().find(|r| r.hash == hash).cloned()
    }

    fn attribute_by_name(&self, row: RowId, name: &str) -> Option<Attribute> {
        self.attributes
            .iter()
            .find(|a| a.row == row && a.name == name)
            .cloned()
    }

    fn child_attribute_by_name(&self, row: RowId, name: &str) -> Option<ChildAttribute> {
        self.child_attributes
            .iter()
            .find(|c| c.row == row && c.name == name)
            .cloned()
    }

    fn attributes_of_rows(&self, rows: &HashSet<RowId>) -> Vec<Attribute> {
        self.attributes
            .iter()
            .filter(|a| rows.contains(&a.row))
            .cloned()
            .collect()
    }

    fn child_attributes_of_rows(&self, rows: &HashSet<RowId>) -> Vec<ChildAttribute> {
        self.child_attributes
            .iter()
            .filter(|c| rows.contains(&c.row))
            .cloned()
            .collect()
    }

    fn distinct_tables(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.rows
            .iter()
            .filter(|r| seen.insert(r.table.as_str()))
            .map(|r| r.table.clone())
            .collect()
    }

    fn values_for_table(&self, table: &str) -> Vec<ValueRecord> {
        let hashes: HashMap<RowId, &str> = self
            .rows
            .iter()
            .filter(|r| r.table == table)
            .map(|r| (r.id, r.hash.as_str()))
            .collect();
        let attribute_names: HashMap<AttributeId, &str> = self
            .attributes
            .iter()
            .map(|a| (a.id, a.name.as_str()))
            .collect();
        let child_names: HashMap<ChildAttributeId, &str> = self
            .child_attributes
            .iter()
            .map(|c| (c.id, c.name.as_str()))
            .collect();

        self.values
            .iter()
            .filter_map(|value| {
                let row_hash = hashes.get(&value.row)?;
                Some(ValueRecord {
                    row_hash: row_hash.to_string(),
                    attribute_name: value
                        .attribute
                        .and_then(|id| attribute_names.get(&id))
                        .map(|name| name.to_string()),
                    child_attribute_name: value
                        .child_attribute
                        .and_then(|id| child_names.get(&id))
                        .map(|name| name.to_string()),
                    value: value.value.clone(),
                })
            })
            .collect()
    }

    fn delete_row(&mut self, id: RowId) -> bool {
        let before = self.rows.len();
        self.rows.retain(|r| r.id != id);
        if self.rows.len() == before {
            return false;
        }
        self.attributes.retain(|a| a.row != id);
        self.child_attributes.retain(|c| c.row != id);
        self.values.retain(|v| v.row != id);
        true
    }

    fn delete_attribute(&mut self, id: AttributeId) -> bool {
        let before = self.attributes.len();
        self.attributes.retain(|a| a.id != id);
        if self.attributes.len() == before {
            return false;
        }
        self.values.retain(|v| v.attribute != Some(id));
        true
    }

    fn delete_child_attribute(&mut self, id: ChildAttributeId) -> bool {
        let before = self.child_attributes.len();
        self.child_attributes.retain(|c| c.id != id);
        if self.child_attributes.len() == before {
            return false;
        }
        self.values.retain(|v| v.child_attribute != Some(id));
        true
    }

    fn counts(&self) -> StoreCounts {
        StoreCounts {
            rows: self.rows.len(),
            attributes: self.attributes.len(),
            child_attributes: self.child_attributes.len(),
            values: self.values.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_row(hash: &str, table: &str) -> NewRow {
        NewRow {
            hash: hash.to_string(),
            table: table.to_string(),
        }
    }

    fn seeded() -> (MemoryStore, Row, Attribute) {
        let mut store = MemoryStore::new();
        let row = store.insert_rows(vec![new_row("h1", "flights")]).unwrap().remove(0);
        let attribute = store
            .insert_attributes(vec![NewAttribute {
                row: row.id,
                name: "date".to_string(),
            }])
            .unwrap()
            .remove(0);
        store
            .insert_values(vec![NewAttributeValue::scalar(row.id, attribute.id, "2024-01-01")])
            .unwrap();
        (store, row, attribute)
    }

    #[test]
    fn test_row_hash_is_unique() {
        let mut store = MemoryStore::new();
        store.insert_rows(vec![new_row("h1", "flights")]).unwrap();

        let err = store
            .insert_rows(vec![new_row("h2", "flights"), new_row("h1", "aircraft")])
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateRowHash(ref h) if h == "h1"));
        // Failed batch leaves nothing behind
        assert_eq!(store.counts().rows, 1);
    }

    #[test]
    fn test_attribute_name_unique_per_row() {
        let (mut store, row, _) = seeded();
        let err = store
            .insert_attributes(vec![NewAttribute {
                row: row.id,
                name: "date".to_string(),
            }])
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateAttribute { .. }));
    }

    #[test]
    fn test_dangling_references_are_rejected() {
        let (mut store, row, _) = seeded();
        let err = store
            .insert_attributes(vec![NewAttribute {
                row: RowId(99),
                name: "date".to_string(),
            }])
            .unwrap_err();
        assert!(matches!(err, StoreError::DanglingReference { kind: "row", id: 99 }));

        let err = store
            .insert_values(vec![NewAttributeValue::scalar(row.id, AttributeId(42), "x")])
            .unwrap_err();
        assert!(matches!(err, StoreError::DanglingReference { kind: "attribute", .. }));
    }

    #[test]
    fn test_lookups() {
        let (store, row, attribute) = seeded();
        assert_eq!(store.row_by_hash("h1"), Some(row.clone()));
        assert_eq!(store.row_by_hash("missing"), None);
        assert_eq!(store.attribute_by_name(row.id, "date"), Some(attribute));
        assert_eq!(store.attribute_by_name(row.id, "remarks"), None);
        assert_eq!(store.child_attribute_by_name(row.id, "date"), None);
    }

    #[test]
    fn test_values_for_table_resolves_names() {
        let (mut store, row, _) = seeded();
        let parent = store
            .insert_attributes(vec![NewAttribute {
                row: row.id,
                name: "remarks".to_string(),
            }])
            .unwrap()
            .remove(0);
        let child = store
            .insert_child_attributes(vec![NewChildAttribute {
                row: row.id,
                name: "weather".to_string(),
            }])
            .unwrap()
            .remove(0);
        store
            .insert_values(vec![NewAttributeValue::nested(row.id, parent.id, child.id, "VFR")])
            .unwrap();
        store.insert_rows(vec![new_row("h2", "aircraft")]).unwrap();

        let values = store.values_for_table("flights");
        assert_eq!(
            values,
            vec![
                ValueRecord {
                    row_hash: "h1".to_string(),
                    attribute_name: Some("date".to_string()),
                    child_attribute_name: None,
                    value: "2024-01-01".to_string(),
                },
                ValueRecord {
                    row_hash: "h1".to_string(),
                    attribute_name: Some("remarks".to_string()),
                    child_attribute_name: Some("weather".to_string()),
                    value: "VFR".to_string(),
                },
            ]
        );
        assert!(store.values_for_table("aircraft").is_empty());
        assert_eq!(store.distinct_tables(), vec!["flights", "aircraft"]);
    }

    #[test]
    fn test_delete_cascades() {
        let (mut store, row, attribute) = seeded();
        assert!(store.delete_attribute(attribute.id));
        assert_eq!(store.counts().values, 0);
        assert!(!store.delete_attribute(attribute.id));

        let (mut store, row2, _) = seeded();
        assert!(store.delete_row(row2.id));
        assert_eq!(store.counts(), StoreCounts::default());
        assert!(!store.delete_row(row.id));
    }

    #[test]
    fn test_clear_keeps_sequences_moving() {
        let (mut store, row, _) = seeded();
        store.clear().unwrap();
        assert_eq!(store.counts(), StoreCounts::default());

        let again = store.insert_rows(vec![new_row("h1", "flights")]).unwrap();
        assert!(again[0].id > row.id);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        assert_eq!(MemoryStore::open(&path).unwrap().counts(), StoreCounts::default());

        let (store, _, _) = seeded();
        store.save(&path).unwrap();
        let reopened = MemoryStore::open(&path).unwrap();
        assert_eq!(reopened.counts(), store.counts());
        assert_eq!(reopened.values_for_table("flights"), store.values_for_table("flights"));
    }

    #[test]
    fn test_corrupt_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            MemoryStore::open(&path).unwrap_err(),
            StoreError::Snapshot { .. }
        ));
    }
}
