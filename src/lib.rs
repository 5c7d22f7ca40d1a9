//! Oceanographic instrument file parsing and normalization.
//!
//! Reads raw files written by logging instruments (Onset HOBO CSV exports,
//! PME MiniDOT txt and concatenated files, RBR R-Text, Van Essen MON,
//! Sea-Bird CNV and BTL) and turns each into a [`NormalizedDataset`]: a
//! polars `DataFrame` indexed by a UTC `time` column, canonical variable
//! names and units, and a metadata record with instrument identity,
//! processing history and parse warnings.
//!
//! ```no_run
//! use ocean_processor::{ParseOptions, ParserConfig, parse_file};
//! use std::path::Path;
//!
//! let dataset = parse_file(
//!     Path::new("ctd/cast_001.cnv"),
//!     &ParseOptions::default(),
//!     ParserConfig::builtin(),
//! )?;
//! println!("{} rows", dataset.row_count());
//! # Ok::<(), ocean_processor::OceanError>(())
//! ```

pub mod body;
pub mod classify;
pub mod cli;
pub mod config;
pub mod constants;
pub mod error;
pub mod formats;
pub mod header;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod processor;
pub mod schema;
pub mod units;

pub use config::{ParserConfig, ProcessorConfig, UnitAction, UnitPolicy};
pub use error::{OceanError, Result};
pub use formats::{detect_format, probe};
pub use models::{
    ColumnDescriptor, InstrumentFormat, InstrumentType, MetaValue, Metadata, NormalizedDataset,
    ParseWarning, ProcessingStats, TimeReference,
};
pub use pipeline::{ParseOptions, parse_file, parse_reader};
pub use processor::merge::merge_minidot_files;
