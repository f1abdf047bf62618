//! Full-reload import of source records into a [`RecordStore`]
//!
//! An import walks a fixed sequence of steps:
//!
//! `Idle → Cleared → RowsCreated → AttributesCreated → ChildAttributesCreated → ChildValuesCreated → Done`
//!
//! Each step is a public method so callers can drive the run one step at a
//! time; [`Importer::run`] performs all of them. There is no resume: a failed
//! bulk insert aborts the run and leaves the store partially populated.
//! Missing parents during the nested-field steps are logged and skipped.

use crate::error::{PilotlogError, Result, StoreError};
use crate::source::load_source;
use crate::store::RecordStore;
use crate::types::{
    AttributeId, ChildAttributeId, FieldValue, ImportConfig, NewAttribute, NewAttributeValue,
    NewChildAttribute, NewRow, RowId, SourceRecord,
};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Progress of one import run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportState {
    Idle,
    Cleared,
    RowsCreated,
    AttributesCreated,
    ChildAttributesCreated,
    ChildValuesCreated,
    Done,
}

/// What an import run wrote
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub rows: usize,
    pub attributes: usize,
    pub child_attributes: usize,
    pub values: usize,
    pub lookup_misses: usize,
    pub duplicates_skipped: usize,
    pub elapsed: Duration,
}

/// `(row, name)` → id index over a snapshot of the store
#[derive(Debug, Clone)]
pub struct NameIndex<Id> {
    entries: HashMap<RowId, HashMap<String, Id>>,
}

impl<Id: Copy> NameIndex<Id> {
    /// Build the index, rejecting a second entry for the same key
    pub fn build<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (RowId, String, Id)>,
    {
        let mut index: HashMap<RowId, HashMap<String, Id>> = HashMap::new();
        for (row, name, id) in entries {
            let names = index.entry(row).or_default();
            if names.contains_key(&name) {
                return Err(PilotlogError::IndexConflict { row, name });
            }
            names.insert(name, id);
        }
        Ok(NameIndex { entries: index })
    }

    pub fn get(&self, row: RowId, name: &str) -> Option<Id> {
        self.entries.get(&row)?.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Drives one full-reload import against a store handle
pub struct Importer<'s, S: RecordStore> {
    store: &'s mut S,
    config: ImportConfig,
    state: ImportState,
    rows: HashMap<String, RowId>,
    report: ImportReport,
}

impl<'s, S: RecordStore> Importer<'s, S> {
    pub fn new(store: &'s mut S, config: ImportConfig) -> Self {
        Importer {
            store,
            config,
            state: ImportState::Idle,
            rows: HashMap::new(),
            report: ImportReport::default(),
        }
    }

    pub fn state(&self) -> ImportState {
        self.state
    }

    pub fn report(&self) -> &ImportReport {
        &self.report
    }

    #[cfg(test)]
    fn store_mut(&mut self) -> &mut S {
        self.store
    }

    /// Load a source file and import it. Nothing is cleared if loading fails.
    pub fn import_path<P: AsRef<Path>>(&mut self, path: P) -> Result<ImportReport> {
        let records = load_source(path, &self.config)?;
        self.run(&records)
    }

    /// Run every step in order
    pub fn run(&mut self, records: &[SourceRecord]) -> Result<ImportReport> {
        let started = Instant::now();

        let deduped;
        let records = if self.config.skip_duplicates {
            deduped = self.dedupe(records);
            deduped.as_slice()
        } else {
            records
        };

        self.clear()?;
        self.create_rows(records)?;
        self.create_attributes(records)?;
        self.create_child_attributes(records)?;
        self.create_child_values(records)?;
        self.finish(started)
    }

    fn dedupe(&mut self, records: &[SourceRecord]) -> Vec<SourceRecord> {
        let mut seen = HashSet::new();
        let mut kept = Vec::with_capacity(records.len());
        for record in records {
            if seen.insert(record.hash.as_str()) {
                kept.push(record.clone());
            } else {
                warn!(row = %record.hash, table = %record.table, "skipping duplicate record");
                self.report.duplicates_skipped += 1;
            }
        }
        kept
    }

    fn expect_state(&self, expected: ImportState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(PilotlogError::OutOfOrder {
                expected,
                actual: self.state,
            })
        }
    }

    fn row_id(&self, record: &SourceRecord) -> Result<RowId> {
        self.rows
            .get(&record.hash)
            .copied()
            .ok_or_else(|| PilotlogError::MissingRow(record.hash.clone()))
    }

    fn row_ids(&self) -> HashSet<RowId> {
        self.rows.values().copied().collect()
    }

    /// Index the attributes the store currently holds for this run's rows
    fn attribute_index(&self, rows: &HashSet<RowId>) -> Result<NameIndex<AttributeId>> {
        NameIndex::build(
            self.store
                .attributes_of_rows(rows)
                .into_iter()
                .map(|a| (a.row, a.name, a.id)),
        )
    }

    fn child_index(&self, rows: &HashSet<RowId>) -> Result<NameIndex<ChildAttributeId>> {
        NameIndex::build(
            self.store
                .child_attributes_of_rows(rows)
                .into_iter()
                .map(|c| (c.row, c.name, c.id)),
        )
    }

    /// Delete everything in the store
    pub fn clear(&mut self) -> Result<()> {
        self.expect_state(ImportState::Idle)?;
        let started = Instant::now();
        info!("cleaning up store");

        self.store.clear()?;

        info!(elapsed_ms = started.elapsed().as_millis() as u64, "store cleared");
        self.state = ImportState::Cleared;
        Ok(())
    }

    /// One row per record
    pub fn create_rows(&mut self, records: &[SourceRecord]) -> Result<()> {
        self.expect_state(ImportState::Cleared)?;
        let started = Instant::now();

        let new_rows: Vec<NewRow> = records
            .iter()
            .map(|record| NewRow {
                hash: record.hash.clone(),
                table: record.table.clone(),
            })
            .collect();
        let batch_size = self.config.batch_size;
        let store = &mut *self.store;
        let created = insert_chunked(new_rows, batch_size, |chunk| store.insert_rows(chunk))?;

        self.rows = created.iter().map(|row| (row.hash.clone(), row.id)).collect();
        self.report.rows = created.len();

        info!(
            rows = created.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "created rows"
        );
        self.state = ImportState::RowsCreated;
        Ok(())
    }

    /// One attribute per field, plus a value for every scalar field
    pub fn create_attributes(&mut self, records: &[SourceRecord]) -> Result<()> {
        self.expect_state(ImportState::RowsCreated)?;
        let started = Instant::now();
        info!("populating attributes");

        let mut new_attributes = Vec::new();
        let mut scalars: Vec<Option<String>> = Vec::new();
        for record in records {
            let row = self.row_id(record)?;
            for (name, value) in &record.fields {
                new_attributes.push(NewAttribute {
                    row,
                    name: name.clone(),
                });
                scalars.push(match value {
                    FieldValue::Scalar(v) => Some(v.clone()),
                    FieldValue::Nested(_) => None,
                });
            }
        }

        let batch_size = self.config.batch_size;
        let store = &mut *self.store;
        let attributes =
            insert_chunked(new_attributes, batch_size, |chunk| store.insert_attributes(chunk))?;

        let new_values: Vec<NewAttributeValue> = attributes
            .iter()
            .zip(scalars)
            .filter_map(|(attribute, scalar)| {
                scalar.map(|value| NewAttributeValue::scalar(attribute.row, attribute.id, value))
            })
            .collect();
        let values = insert_chunked(new_values, batch_size, |chunk| store.insert_values(chunk))?;

        self.report.attributes = attributes.len();
        self.report.values += values.len();

        info!(
            attributes = attributes.len(),
            values = values.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "created attributes and scalar values"
        );
        self.state = ImportState::AttributesCreated;
        Ok(())
    }

    /// One child attribute per key of every nested field
    pub fn create_child_attributes(&mut self, records: &[SourceRecord]) -> Result<()> {
        self.expect_state(ImportState::AttributesCreated)?;
        let started = Instant::now();
        info!("populating child attributes");

        let attribute_index = self.attribute_index(&self.row_ids())?;

        let mut new_children = Vec::new();
        let mut seen: HashSet<(RowId, &str)> = HashSet::new();
        for record in records {
            let row = self.row_id(record)?;
            for (field, children) in record.nested_fields() {
                if attribute_index.get(row, field).is_none() {
                    self.lookup_miss("attribute", row, field);
                    continue;
                }
                for (name, _) in children {
                    if !seen.insert((row, name.as_str())) {
                        warn!(row = %record.hash, field, child = %name, "child attribute name reused within row");
                        continue;
                    }
                    new_children.push(NewChildAttribute {
                        row,
                        name: name.clone(),
                    });
                }
            }
        }

        let batch_size = self.config.batch_size;
        let store = &mut *self.store;
        let created = insert_chunked(new_children, batch_size, |chunk| {
            store.insert_child_attributes(chunk)
        })?;

        self.report.child_attributes = created.len();

        info!(
            child_attributes = created.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "created child attributes"
        );
        self.state = ImportState::ChildAttributesCreated;
        Ok(())
    }

    /// One value per nested key, linked to both parent and child attribute
    pub fn create_child_values(&mut self, records: &[SourceRecord]) -> Result<()> {
        self.expect_state(ImportState::ChildAttributesCreated)?;
        let started = Instant::now();
        info!("populating child attribute values");

        // Re-read both indexes: ids held from step 4 may have been deleted since
        let row_ids = self.row_ids();
        let attribute_index = self.attribute_index(&row_ids)?;
        let child_index = self.child_index(&row_ids)?;

        let mut new_values = Vec::new();
        for record in records {
            let row = self.row_id(record)?;
            for (field, children) in record.nested_fields() {
                let Some(parent) = attribute_index.get(row, field) else {
                    self.lookup_miss("attribute", row, field);
                    continue;
                };
                for (name, value) in children {
                    let Some(child) = child_index.get(row, name) else {
                        self.lookup_miss("child attribute", row, name);
                        continue;
                    };
                    new_values.push(NewAttributeValue::nested(row, parent, child, value.clone()));
                }
            }
        }

        let batch_size = self.config.batch_size;
        let store = &mut *self.store;
        let created = insert_chunked(new_values, batch_size, |chunk| store.insert_values(chunk))?;
        self.report.values += created.len();

        info!(
            values = created.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "created child attribute values"
        );
        self.state = ImportState::ChildValuesCreated;
        Ok(())
    }

    fn finish(&mut self, started: Instant) -> Result<ImportReport> {
        self.expect_state(ImportState::ChildValuesCreated)?;
        self.report.elapsed = started.elapsed();
        self.state = ImportState::Done;

        info!(
            rows = self.report.rows,
            attributes = self.report.attributes,
            child_attributes = self.report.child_attributes,
            values = self.report.values,
            lookup_misses = self.report.lookup_misses,
            elapsed_ms = self.report.elapsed.as_millis() as u64,
            "import finished"
        );
        Ok(self.report.clone())
    }

    fn lookup_miss(&mut self, kind: &'static str, row: RowId, name: &str) {
        let miss = PilotlogError::LookupMiss {
            kind,
            row,
            name: name.to_string(),
        };
        error!("{miss}, skipping");
        self.report.lookup_misses += 1;
    }
}

/// Bulk insert in chunks of at most `batch_size`, keeping input order
fn insert_chunked<T, R, F>(items: Vec<T>, batch_size: usize, mut insert: F) -> Result<Vec<R>>
where
    F: FnMut(Vec<T>) -> std::result::Result<Vec<R>, StoreError>,
{
    let batch_size = batch_size.max(1);
    let mut created = Vec::with_capacity(items.len());
    let mut items = items.into_iter().peekable();
    while items.peek().is_some() {
        let chunk: Vec<T> = items.by_ref().take(batch_size).collect();
        created.extend(insert(chunk)?);
    }
    Ok(created)
}
