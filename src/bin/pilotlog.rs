//! pilotlog: Import JSON logbooks into the EAV store and export them as CSV
//!
//! Usage:
//!   # Replace the store contents with a JSON source
//!   pilotlog import logbook.json
//!
//!   # Append a sectioned CSV export of the store
//!   pilotlog export logbook.csv
//!
//!   # Use a different store snapshot and verbose logging
//!   pilotlog --store /var/lib/pilotlog.json --log-level debug import logbook.json

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use pilotlog::{export_file, import_file, ExportConfig, ImportConfig, MemoryStore};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pilotlog")]
#[command(about = "Import JSON logbooks into an EAV store and export them as CSV", long_about = None)]
struct Cli {
    /// Store snapshot file, created on first import
    #[arg(long, global = true, default_value = "pilotlog-store.json")]
    store: PathBuf,

    /// Log filter, e.g. "info" or "pilotlog=debug" (RUST_LOG takes precedence)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import data from a JSON file, replacing everything in the store
    Import(ImportArgs),

    /// Export data to a CSV file, appending if it exists
    Export(ExportArgs),
}

#[derive(Args, Debug)]
struct ImportArgs {
    /// The path to the JSON file to import
    #[arg(value_name = "FILE")]
    filename: PathBuf,

    /// Records per bulk insert (default: 1000)
    #[arg(long)]
    batch_size: Option<usize>,

    /// Collapse identical records instead of failing on them
    #[arg(long)]
    skip_duplicates: bool,

    /// Parse the source as-is, without the \" unescape pass
    #[arg(long)]
    keep_escapes: bool,
}

#[derive(Args, Debug)]
struct ExportArgs {
    /// The path to the CSV file to export
    #[arg(value_name = "FILE")]
    filename: PathBuf,

    /// Marker line written at the top of the export
    #[arg(long)]
    marker: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let started = Instant::now();
    let (name, outcome) = match cli.command {
        Command::Import(args) => ("import", run_import(&cli.store, args)),
        Command::Export(args) => ("export", run_export(&cli.store, args)),
    };
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(()) => {
            info!(command = name, elapsed_ms, "{name} finished");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(command = name, elapsed_ms, "{name} was unsuccessful: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_import(store_path: &Path, args: ImportArgs) -> Result<()> {
    let mut config = ImportConfig::default();
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    config.skip_duplicates = args.skip_duplicates;
    config.unescape_quotes = !args.keep_escapes;

    info!(source = %args.filename.display(), "starting import");
    let mut store = MemoryStore::open(store_path)
        .with_context(|| format!("Failed to open store {}", store_path.display()))?;
    let report = import_file(&mut store, &args.filename, config)
        .with_context(|| format!("Failed to import {}", args.filename.display()))?;
    store
        .save(store_path)
        .with_context(|| format!("Failed to save store {}", store_path.display()))?;

    info!(
        rows = report.rows,
        attributes = report.attributes,
        child_attributes = report.child_attributes,
        values = report.values,
        lookup_misses = report.lookup_misses,
        "import stored"
    );
    Ok(())
}

fn run_export(store_path: &Path, args: ExportArgs) -> Result<()> {
    let mut config = ExportConfig::default();
    if let Some(marker) = args.marker {
        config.marker = marker;
    }

    info!(destination = %args.filename.display(), "starting export");
    let store = MemoryStore::open(store_path)
        .with_context(|| format!("Failed to open store {}", store_path.display()))?;
    let report = export_file(&store, &args.filename, config)
        .with_context(|| format!("Failed to export {}", args.filename.display()))?;

    info!(sections = report.sections, rows = report.rows, "export written");
    Ok(())
}
