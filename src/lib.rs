//! # Pilotlog - EAV Logbook Store
//!
//! Imports heterogeneous JSON records (logbook entries, aircraft, ...) into a
//! generic entity-attribute-value store and exports them back as wide CSV
//! tables, one section per source table.
//!
//! ## Modules
//!
//! - **hasher**: content fingerprints that ignore key order
//! - **source**: load, validate and flatten the JSON source
//! - **store**: the record store contract and an in-process implementation
//! - **importer**: full-reload import state machine
//! - **exporter**: pivot the EAV store into CSV sections
//!
//! ## Quick Start
//!
//! ```rust
//! use pilotlog::{parse_source, ExportConfig, Exporter, ImportConfig, Importer, MemoryStore};
//!
//! # fn main() -> anyhow::Result<()> {
//! let source = r#"[
//!     {"table": "Flights", "date": "2024-01-01", "remarks": {"weather": "VFR", "notes": "ok"}}
//! ]"#;
//!
//! let mut store = MemoryStore::new();
//! let records = parse_source(source, &ImportConfig::default())?;
//! Importer::new(&mut store, ImportConfig::default()).run(&records)?;
//!
//! let mut csv = Vec::new();
//! Exporter::new(&store, ExportConfig::default()).write_to(&mut csv)?;
//! let csv = String::from_utf8(csv)?;
//!
//! assert!(csv.contains("Flights Table\ndate,weather,notes\n2024-01-01,VFR,ok\n"));
//! # Ok(())
//! # }
//! ```

use std::path::Path;

pub mod error;
pub mod exporter;
pub mod hasher;
pub mod importer;
pub mod source;
pub mod store;
pub mod types;

pub use error::{PilotlogError, Result, StoreError};
pub use exporter::{ExportReport, Exporter, TableSection};
pub use hasher::fingerprint;
pub use importer::{ImportReport, ImportState, Importer};
pub use source::{load_source, parse_source};
pub use store::{MemoryStore, RecordStore, StoreCounts};
pub use types::{
    Attribute, AttributeValue, ChildAttribute, ExportConfig, FieldValue, ImportConfig, Row,
    SourceRecord,
};

/// Main entry point: replace the store contents with the records in `path`
pub fn import_file<S: RecordStore, P: AsRef<Path>>(
    store: &mut S,
    path: P,
    config: ImportConfig,
) -> Result<ImportReport> {
    Importer::new(store, config).import_path(path)
}

/// Append the wide-table CSV export of `store` to `path`
pub fn export_file<S: RecordStore, P: AsRef<Path>>(
    store: &S,
    path: P,
    config: ExportConfig,
) -> Result<ExportReport> {
    Exporter::new(store, config).export_path(path)
}
