//! CSV Bar Storage
//!
//! Appends bars to `<output-dir>/<SYMBOL>.csv`, one file per symbol.
//!
//! # File Format
//!
//! ```text
//! timestamp,open,high,low,close,volume
//! 2024-01-02 14:30:00+00:00,187.15,187.25,187.10,187.20,1200
//! ```
//!
//! The header is written when the file is empty, so restarts keep appending
//! to the same file. Each row (and the header, when due) is encoded into one
//! buffer and written with a single append.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use serde::Serialize;

use crate::application::ports::{BarSink, WriteError};
use crate::domain::streaming::Bar;
use crate::domain::subscription::Symbol;

/// Timestamp layout for the `timestamp` column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%:z";

/// One CSV row. Field order is the column order.
#[derive(Debug, Serialize)]
struct BarRecord<'a> {
    timestamp: String,
    open: &'a Decimal,
    high: &'a Decimal,
    low: &'a Decimal,
    close: &'a Decimal,
    volume: i64,
}

impl<'a> From<&'a Bar> for BarRecord<'a> {
    fn from(bar: &'a Bar) -> Self {
        Self {
            timestamp: bar.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            open: &bar.open,
            high: &bar.high,
            low: &bar.low,
            close: &bar.close,
            volume: bar.volume,
        }
    }
}

/// Encode `bar` as one CSV line, preceded by the header line if requested.
fn encode_row(bar: &Bar, with_header: bool) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(with_header)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::with_capacity(128));
    writer.serialize(BarRecord::from(bar))?;
    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}

/// Open `path` for appending, creating `dir` first.
fn open_append(dir: &Path, path: &Path) -> Result<File, WriteError> {
    fs::create_dir_all(dir).map_err(|source| WriteError::Io {
        op: "create directory",
        path: dir.to_path_buf(),
        source,
    })?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| WriteError::Io {
            op: "open",
            path: path.to_path_buf(),
            source,
        })
}

/// [`BarSink`] writing per-symbol CSV files.
///
/// File handles are opened on first use and kept for the session. A handle
/// is dropped after a failed write and reopened on the next bar.
#[derive(Debug)]
pub struct CsvBarWriter {
    output_dir: PathBuf,
    files: HashMap<Symbol, File>,
}

impl CsvBarWriter {
    /// Create a writer rooted at `output_dir`. Nothing is created on disk
    /// until the first bar arrives.
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            files: HashMap::new(),
        }
    }

    /// Number of open file handles.
    #[must_use]
    pub fn open_file_count(&self) -> usize {
        self.files.len()
    }

    fn write_row(file: &mut File, path: &Path, bar: &Bar) -> Result<(), WriteError> {
        let io_err = |op| {
            let path = path.to_path_buf();
            move |source| WriteError::Io { op, path, source }
        };

        let empty = file.metadata().map_err(io_err("stat"))?.len() == 0;
        let row = encode_row(bar, empty).map_err(|e| WriteError::Encode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        file.write_all(&row).map_err(io_err("append"))?;
        file.flush().map_err(io_err("flush"))
    }
}

impl BarSink for CsvBarWriter {
    fn append(&mut self, symbol: &Symbol, bar: &Bar) -> Result<(), WriteError> {
        let path = symbol.csv_path(&self.output_dir);

        let file = match self.files.entry(symbol.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let file = open_append(&self.output_dir, &path)?;
                tracing::debug!(symbol = %symbol, path = %path.display(), "Opened output file");
                entry.insert(file)
            }
        };

        let result = Self::write_row(file, &path, bar);
        if result.is_err() {
            self.files.remove(symbol);
        }
        result
    }

    fn close(&mut self) -> Result<(), WriteError> {
        let mut first_error = None;
        for (symbol, file) in self.files.drain() {
            if let Err(source) = file.sync_all() {
                let path = symbol.csv_path(&self.output_dir);
                tracing::warn!(symbol = %symbol, error = %source, "Failed to sync output file");
                first_error.get_or_insert(WriteError::Io {
                    op: "sync",
                    path,
                    source,
                });
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
