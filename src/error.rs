//! Error handling for instrument file parsing.
//!
//! Hard failures stop processing of a single file and are returned to the
//! caller. Soft diagnostics live in [`crate::models::ParseWarning`] and are
//! attached to the returned dataset instead.

use crate::models::InstrumentFormat;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OceanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    /// The file does not carry the signature of the requested format.
    #[error("File {path} is not a valid {format} file: {reason}")]
    FormatMismatch {
        path: PathBuf,
        format: InstrumentFormat,
        reason: String,
    },

    #[error("Could not detect the instrument format of {path}")]
    UnknownFormat { path: PathBuf },

    #[error("Required header field '{field}' missing in file: {path}")]
    HeaderFieldMissing { path: PathBuf, field: String },

    #[error("Invalid header line {line} in file: {path} - {reason}")]
    InvalidHeader {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// Raised only for formats that require an exact declared row count.
    #[error("Row count mismatch in file: {path} - header declares {expected} rows, found {found}")]
    RowCountMismatch {
        path: PathBuf,
        expected: usize,
        found: usize,
    },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Processing failed for file: {path} - {reason}")]
    ProcessingFailed { path: PathBuf, reason: String },
}

impl OceanError {
    /// True when another parser (or skipping the file) is a sensible reaction.
    pub fn is_format_mismatch(&self) -> bool {
        matches!(
            self,
            OceanError::FormatMismatch { .. } | OceanError::UnknownFormat { .. }
        )
    }

    pub fn header_field_missing(path: impl Into<PathBuf>, field: impl Into<String>) -> Self {
        OceanError::HeaderFieldMissing {
            path: path.into(),
            field: field.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, OceanError>;
