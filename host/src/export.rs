//! ==============================================================================
//! export.rs - spreadsheet export
//! ==============================================================================
//!
//! purpose:
//!     turns the ordered reading list into a two-column table
//!     (`Timestamp`, `Lux Value`) and writes it as a csv spreadsheet.
//!     one-shot, no retained state.
//!
//! relationships:
//!     - used by: poll.rs (auto-stop and manual-stop export via ExportSink)
//!     - used by: server.rs (download endpoint, export-now endpoint)
//!     - used by: main.rs (`export` subcommand)
//!
//! ==============================================================================

use crate::domain::Reading;

use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const HEADER: [&str; 2] = ["Timestamp", "Lux Value"];

/// write the table to any writer, one row per reading, order preserved
pub fn write_table<'a, W, I>(readings: I, writer: W) -> Result<()>
where
    W: Write,
    I: IntoIterator<Item = &'a Reading>,
{
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(HEADER)?;
    for reading in readings {
        let value = reading.lux_value.to_string();
        wtr.write_record([reading.timestamp.as_str(), value.as_str()])?;
    }
    wtr.flush()?;
    Ok(())
}

/// the table as csv bytes
pub fn to_csv_bytes<'a, I>(readings: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = &'a Reading>,
{
    let mut buf = Vec::new();
    write_table(readings, &mut buf)?;
    Ok(buf)
}

/// `lux-readings-2026-10-17T10-00-00.123Z.csv` (colons are not portable in filenames)
pub fn export_file_name() -> String {
    let stamp = chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S%.3fZ");
    format!("lux-readings-{}.csv", stamp)
}

/// write a new, uniquely named spreadsheet into `dir` and return its path
pub fn export_snapshot<'a, I>(readings: I, dir: &Path) -> Result<PathBuf>
where
    I: IntoIterator<Item = &'a Reading>,
{
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let name = export_file_name();
    let stem = name.trim_end_matches(".csv");
    let mut path = dir.join(&name);
    let mut n = 1;
    // create_new: two exports in the same millisecond each get their own file
    let file = loop {
        match std::fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => break file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                path = dir.join(format!("{}-{}.csv", stem, n));
                n += 1;
            }
            Err(e) => return Err(e).with_context(|| format!("failed to create {}", path.display())),
        }
    };
    write_table(readings, std::io::BufWriter::new(file))?;
    Ok(path)
}

// ==============================================================================
// export sink - what the poll controller calls when a session ends
// ==============================================================================

pub trait ExportSink: Send + Sync {
    /// best effort: failures are logged, never returned
    fn export(&self, readings: &[Reading]);
}

/// writes spreadsheets into a directory
pub struct SpreadsheetExporter {
    dir: PathBuf,
}

impl SpreadsheetExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ExportSink for SpreadsheetExporter {
    fn export(&self, readings: &[Reading]) {
        match export_snapshot(readings, &self.dir) {
            Ok(path) => tracing::info!("[EXPORT] {} readings -> {}", readings.len(), path.display()),
            Err(e) => tracing::warn!("[EXPORT] ⚠ export failed: {:#}", e),
        }
    }
}
