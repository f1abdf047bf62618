use crate::importer::ImportState;
use crate::types::RowId;
use std::path::PathBuf;
use thiserror::Error;

/// Constraint and storage failures raised by a record store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("row hash {0} already exists")]
    DuplicateRowHash(String),

    #[error("attribute '{name}' already exists for {row}")]
    DuplicateAttribute { row: RowId, name: String },

    #[error("child attribute '{name}' already exists for {row}")]
    DuplicateChildAttribute { row: RowId, name: String },

    #[error("{kind} {id} referenced by a new record does not exist")]
    DanglingReference { kind: &'static str, id: u64 },

    #[error("store snapshot {path}: {message}")]
    Snapshot { path: PathBuf, message: String },
}

/// Errors raised while importing or exporting
#[derive(Debug, Error)]
pub enum PilotlogError {
    #[error("file {0} does not exist")]
    InputNotFound(PathBuf),

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("record {index} has no 'table' field")]
    MissingTable { index: usize },

    #[error("record {index}: field '{field}' nests objects deeper than one level")]
    NestingTooDeep { index: usize, field: String },

    #[error("record {index}: field '{field}' holds an array")]
    UnsupportedValue { index: usize, field: String },

    #[error("no {kind} '{name}' for {row}")]
    LookupMiss {
        kind: &'static str,
        row: RowId,
        name: String,
    },

    #[error("no row stored for hash {0}")]
    MissingRow(String),

    #[error("duplicate index key ({row}, '{name}')")]
    IndexConflict { row: RowId, name: String },

    #[error("import step expects state {expected:?}, importer is in {actual:?}")]
    OutOfOrder {
        expected: ImportState,
        actual: ImportState,
    },

    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, PilotlogError>;
