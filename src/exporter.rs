//! Wide-table CSV export from the EAV store
//!
//! Each distinct table becomes one section: a single-column title line,
//! a header row and one line per original record. Sections do not share a
//! column layout, so consumers must read the document section by section.

use crate::error::Result;
use crate::store::RecordStore;
use crate::types::{ExportConfig, ValueRecord};
use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// One pivoted table, ready to render
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSection {
    /// Stored (lower-cased) table name
    pub table: String,

    /// Section header line, e.g. "Flights Table"
    pub title: String,

    /// Union of column keys across rows, in first-seen order
    pub columns: Vec<String>,

    /// One entry per record; missing cells are empty strings
    pub rows: Vec<Vec<String>>,
}

/// What an export run wrote
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportReport {
    pub sections: usize,
    pub rows: usize,
    pub elapsed: Duration,
}

/// Cells of one record, keyed by column, in first-write order
#[derive(Debug, Default)]
struct PivotRow {
    cells: Vec<(String, String)>,
}

impl PivotRow {
    /// Later writes to an existing key replace the value in place
    fn set(&mut self, key: &str, value: &str) {
        match self.cells.iter_mut().find(|(k, _)| k == key) {
            Some(cell) => cell.1 = value.to_string(),
            None => self.cells.push((key.to_string(), value.to_string())),
        }
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Pivot joined values into one wide table.
///
/// A value's column is its child attribute name when present, otherwise its
/// attribute name, so nested parents never appear as columns. On a name
/// collision within a record the last value wins.
pub fn pivot(table: &str, values: &[ValueRecord], config: &ExportConfig) -> TableSection {
    let mut order: Vec<&str> = Vec::new();
    let mut grouped: HashMap<&str, PivotRow> = HashMap::new();

    for record in values {
        let key = match (&record.child_attribute_name, &record.attribute_name) {
            (Some(child), _) => child.as_str(),
            (None, Some(attribute)) => attribute.as_str(),
            (None, None) => {
                debug!(row = %record.row_hash, "value without attribute name, skipping");
                continue;
            }
        };
        let row = grouped.entry(record.row_hash.as_str()).or_insert_with(|| {
            order.push(record.row_hash.as_str());
            PivotRow::default()
        });
        row.set(key, &record.value);
    }

    let mut columns: Vec<String> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    for hash in &order {
        for (key, _) in &grouped[hash].cells {
            if config.dropped_columns.iter().any(|c| c == key) {
                continue;
            }
            if seen.insert(key.as_str()) {
                columns.push(key.clone());
            }
        }
    }

    let rows = order
        .iter()
        .map(|hash| {
            let row = &grouped[hash];
            columns
                .iter()
                .map(|column| row.get(column).unwrap_or_default().to_string())
                .collect()
        })
        .collect();

    TableSection {
        table: table.to_string(),
        title: format!("{}{}", capitalize(table), config.section_suffix),
        columns,
        rows,
    }
}

/// Upper-case the first character and lower-case the rest
pub fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Reads a store and renders its tables as CSV sections
pub struct Exporter<'s, S: RecordStore> {
    store: &'s S,
    config: ExportConfig,
}

impl<'s, S: RecordStore> Exporter<'s, S> {
    pub fn new(store: &'s S, config: ExportConfig) -> Self {
        Exporter { store, config }
    }

    /// Pivot every table in the store, in the order the store lists them
    pub fn sections(&self) -> Vec<TableSection> {
        self.store
            .distinct_tables()
            .into_iter()
            .map(|table| {
                let values = self.store.values_for_table(&table);
                pivot(&table, &values, &self.config)
            })
            .collect()
    }

    /// Append the export to `path`, creating the file if needed
    pub fn export_path<P: AsRef<Path>>(&self, path: P) -> Result<ExportReport> {
        let path = path.as_ref();
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        info!(path = %path.display(), "exporting data");
        self.write_to(file)
    }

    /// Write the marker, the blank section and one section per table
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<ExportReport> {
        let started = Instant::now();

        write_records(&mut writer, [[self.config.marker.as_str()]])?;
        writer.write_all(b"\n")?;

        let mut report = ExportReport::default();
        for section in self.sections() {
            write_records(&mut writer, [[section.title.as_str()]])?;
            if section.columns.is_empty() {
                // No cells to render: blank header, one blank line per record
                for _ in 0..=section.rows.len() {
                    writer.write_all(b"\n")?;
                }
            } else {
                write_records(
                    &mut writer,
                    std::iter::once(&section.columns).chain(section.rows.iter()),
                )?;
            }
            writer.flush()?;

            debug!(table = %section.table, rows = section.rows.len(), "wrote section");
            report.sections += 1;
            report.rows += section.rows.len();
        }

        report.elapsed = started.elapsed();
        info!(
            sections = report.sections,
            rows = report.rows,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "data export finished"
        );
        Ok(report)
    }
}

/// Write CSV records through a short-lived writer, flushed before returning
fn write_records<W, I, R, F>(writer: &mut W, records: I) -> Result<()>
where
    W: Write,
    I: IntoIterator<Item = R>,
    R: IntoIterator<Item = F>,
    F: AsRef<[u8]>,
{
    let mut csv_writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(writer);
    for record in records {
        csv_writer.write_record(record)?;
    }
    csv_writer.flush()?;
    Ok(())
}
