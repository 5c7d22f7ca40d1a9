//! Configuration management and validation.
//!
//! [`ParserConfig`] holds the immutable lookup data shared by every parse
//! call (canonical variable tables, instrument signatures, time layouts and
//! the unit conversion policy). [`ProcessorConfig`] adds the batch and
//! output settings used by the command line front end.

use crate::constants::{
    IGNORED_VARIABLES, INSTRUMENT_SIGNATURES, ONSET_VARIABLES, PME_VARIABLES, RBR_VARIABLES,
    SEABIRD_VARIABLES, TIME_FORMATS, VAN_ESSEN_VARIABLES,
};
use crate::error::{OceanError, Result};
use crate::models::{FormatFamily, InstrumentType};
use polars::prelude::ParquetCompression;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;

/// What to do when a variable is recorded in a non-SI unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitAction {
    /// Convert the values and record it in the history
    Convert,
    /// Keep the values and attach a warning
    Warn,
    /// Keep the values silently
    Ignore,
}

impl std::str::FromStr for UnitAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "convert" => Ok(UnitAction::Convert),
            "warn" => Ok(UnitAction::Warn),
            "ignore" => Ok(UnitAction::Ignore),
            other => Err(format!(
                "unknown unit action '{}', expected convert, warn or ignore",
                other
            )),
        }
    }
}

/// Unit conversion policy per unit family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitPolicy {
    /// Fahrenheit temperatures
    pub temperature: UnitAction,
    /// Conductivity recorded in µS/cm
    pub conductivity: UnitAction,
}

impl Default for UnitPolicy {
    fn default() -> Self {
        Self {
            temperature: UnitAction::Convert,
            conductivity: UnitAction::Warn,
        }
    }
}

/// One entry of the instrument signature catalogue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSignature {
    pub instrument_type: InstrumentType,
    pub variables: BTreeSet<String>,
}

/// Immutable lookup data passed into every parse call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParserConfig {
    /// Raw column name to canonical name, per vendor family
    pub variable_maps: BTreeMap<FormatFamily, BTreeMap<String, String>>,

    /// Variables excluded from instrument classification
    pub ignored_variables: BTreeSet<String>,

    /// Ordered signature catalogue, first exact match wins
    pub signatures: Vec<InstrumentSignature>,

    /// Text timestamp layouts tried in order
    pub time_formats: Vec<String>,

    pub unit_policy: UnitPolicy,
}

static BUILTIN: LazyLock<ParserConfig> = LazyLock::new(ParserConfig::default);

impl Default for ParserConfig {
    fn default() -> Self {
        let table = |entries: &[(&str, &str)]| -> BTreeMap<String, String> {
            entries
                .iter()
                .map(|(raw, canonical)| (raw.to_string(), canonical.to_string()))
                .collect()
        };

        let mut variable_maps = BTreeMap::new();
        variable_maps.insert(FormatFamily::Onset, table(ONSET_VARIABLES));
        variable_maps.insert(FormatFamily::Pme, table(PME_VARIABLES));
        variable_maps.insert(FormatFamily::Rbr, table(RBR_VARIABLES));
        variable_maps.insert(FormatFamily::VanEssen, table(VAN_ESSEN_VARIABLES));
        variable_maps.insert(FormatFamily::Seabird, table(SEABIRD_VARIABLES));

        let signatures = INSTRUMENT_SIGNATURES
            .iter()
            .filter_map(|(label, variables)| {
                InstrumentType::from_label(label).map(|instrument_type| InstrumentSignature {
                    instrument_type,
                    variables: variables.iter().map(|v| v.to_string()).collect(),
                })
            })
            .collect();

        Self {
            variable_maps,
            ignored_variables: IGNORED_VARIABLES.iter().map(|v| v.to_string()).collect(),
            signatures,
            time_formats: TIME_FORMATS.iter().map(|f| f.to_string()).collect(),
            unit_policy: UnitPolicy::default(),
        }
    }
}

impl ParserConfig {
    /// Built-in configuration, constructed once per process
    pub fn builtin() -> &'static ParserConfig {
        &BUILTIN
    }

    /// Load a configuration from a JSON file and validate it
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ParserConfig = serde_json::from_str(&content)?;
        config.validate()?;
        debug!("Loaded parser configuration from {}", path.display());
        Ok(config)
    }

    /// Canonical table for a vendor family (empty when not configured)
    pub fn variable_map(&self, family: FormatFamily) -> &BTreeMap<String, String> {
        static EMPTY: BTreeMap<String, String> = BTreeMap::new();
        self.variable_maps.get(&family).unwrap_or(&EMPTY)
    }

    pub fn with_unit_policy(mut self, unit_policy: UnitPolicy) -> Self {
        self.unit_policy = unit_policy;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.time_formats.is_empty() {
            return Err(OceanError::Configuration {
                message: "at least one time format is required".to_string(),
            });
        }

        for signature in &self.signatures {
            if signature.variables.is_empty() {
                return Err(OceanError::Configuration {
                    message: format!(
                        "signature for {} has no variables",
                        signature.instrument_type
                    ),
                });
            }
            if let Some(ignored) = signature
                .variables
                .iter()
                .find(|variable| self.ignored_variables.contains(*variable))
            {
                return Err(OceanError::Configuration {
                    message: format!(
                        "signature for {} uses ignored variable '{}'",
                        signature.instrument_type, ignored
                    ),
                });
            }
        }

        Ok(())
    }
}

/// Output table format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Parquet,
    Csv,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Parquet => "parquet",
            OutputFormat::Csv => "csv",
        }
    }
}

/// Supported compression algorithms for parquet files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CompressionAlgorithm {
    /// Snappy compression - good balance of speed and compression
    Snappy,
    /// ZSTD compression - better compression ratio, slower
    Zstd,
    /// LZ4 compression - fastest, lower compression ratio
    Lz4,
    /// No compression
    Uncompressed,
}

impl CompressionAlgorithm {
    /// Convert to polars ParquetCompression type
    pub fn to_polars_compression(&self) -> ParquetCompression {
        match self {
            CompressionAlgorithm::Snappy => ParquetCompression::Snappy,
            CompressionAlgorithm::Zstd => ParquetCompression::Zstd(None),
            CompressionAlgorithm::Lz4 => ParquetCompression::Lz4Raw,
            CompressionAlgorithm::Uncompressed => ParquetCompression::Uncompressed,
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "snappy" => Ok(CompressionAlgorithm::Snappy),
            "zstd" => Ok(CompressionAlgorithm::Zstd),
            "lz4" => Ok(CompressionAlgorithm::Lz4),
            "none" | "uncompressed" => Ok(CompressionAlgorithm::Uncompressed),
            other => Err(OceanError::Configuration {
                message: format!("unknown compression algorithm '{}'", other),
            }),
        }
    }
}

/// Batch processing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Number of files parsed concurrently
    pub workers: usize,

    pub output_format: OutputFormat,

    pub compression: CompressionAlgorithm,

    /// Write `<stem>.metadata.json` next to each table
    pub write_metadata: bool,

    /// Re-parse files whose output already exists
    pub force_reprocess: bool,

    pub parser: ParserConfig,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get().max(1),
            output_format: OutputFormat::Parquet,
            compression: CompressionAlgorithm::Snappy,
            write_metadata: true,
            force_reprocess: false,
            parser: ParserConfig::builtin().clone(),
        }
    }
}

impl ProcessorConfig {
    /// Create configuration with custom worker count
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_output_format(mut self, output_format: OutputFormat) -> Self {
        self.output_format = output_format;
        self
    }

    pub fn with_compression(mut self, compression: CompressionAlgorithm) -> Self {
        self.compression = compression;
        self
    }

    /// Enable force reprocessing
    pub fn with_force_reprocess(mut self) -> Self {
        self.force_reprocess = true;
        self
    }

    pub fn without_metadata(mut self) -> Self {
        self.write_metadata = false;
        self
    }

    pub fn with_parser(mut self, parser: ParserConfig) -> Self {
        self.parser = parser;
        self
    }
}
