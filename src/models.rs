//! Core data structures and types for instrument file processing.
//!
//! Defines the supported file formats, the metadata record, column
//! descriptors, soft parse warnings, the normalized dataset and the
//! batch processing statistics used throughout the library.

use chrono::{FixedOffset, Utc};
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Raw file formats supported by the parsers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstrumentFormat {
    /// Onset HOBOware CSV export
    Onset,
    /// PME MiniDOT single-file txt
    MiniDot,
    /// PME MiniDOT concatenated (CAT) txt
    MiniDotCat,
    /// RBR Ruskin R-Text export
    RbrRText,
    /// Van Essen Diver-Office MON file
    VanEssenMon,
    /// Sea-Bird converted profile (cnv)
    SeabirdCnv,
    /// Sea-Bird bottle summary (btl)
    SeabirdBtl,
}

/// Vendor family, used to select the canonical variable table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatFamily {
    Onset,
    Pme,
    Rbr,
    VanEssen,
    Seabird,
}

impl InstrumentFormat {
    pub const ALL: [InstrumentFormat; 7] = [
        InstrumentFormat::Onset,
        InstrumentFormat::MiniDotCat,
        InstrumentFormat::MiniDot,
        InstrumentFormat::RbrRText,
        InstrumentFormat::VanEssenMon,
        InstrumentFormat::SeabirdCnv,
        InstrumentFormat::SeabirdBtl,
    ];

    /// Guess the format from extension and directory naming conventions.
    ///
    /// This is only a hint: [`crate::formats::detect_format`] confirms it by
    /// probing the file content.
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase());
        let path_str = path.to_string_lossy().to_lowercase();
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        match extension.as_deref() {
            Some("cnv") => Some(InstrumentFormat::SeabirdCnv),
            Some("btl") => Some(InstrumentFormat::SeabirdBtl),
            Some("mon") => Some(InstrumentFormat::VanEssenMon),
            Some("csv") => Some(InstrumentFormat::Onset),
            Some("txt") if path_str.contains("rbr") => Some(InstrumentFormat::RbrRText),
            Some("txt") if file_name.starts_with("cat") => Some(InstrumentFormat::MiniDotCat),
            Some("txt") if path_str.contains("pme") || path_str.contains("minidot") => {
                Some(InstrumentFormat::MiniDot)
            }
            _ => None,
        }
    }

    pub fn family(&self) -> FormatFamily {
        match self {
            InstrumentFormat::Onset => FormatFamily::Onset,
            InstrumentFormat::MiniDot | InstrumentFormat::MiniDotCat => FormatFamily::Pme,
            InstrumentFormat::RbrRText => FormatFamily::Rbr,
            InstrumentFormat::VanEssenMon => FormatFamily::VanEssen,
            InstrumentFormat::SeabirdCnv | InstrumentFormat::SeabirdBtl => FormatFamily::Seabird,
        }
    }

    /// Short name used on the command line
    pub fn cli_name(&self) -> &'static str {
        match self {
            InstrumentFormat::Onset => "onset",
            InstrumentFormat::MiniDot => "minidot",
            InstrumentFormat::MiniDotCat => "minidot-cat",
            InstrumentFormat::RbrRText => "rtext",
            InstrumentFormat::VanEssenMon => "mon",
            InstrumentFormat::SeabirdCnv => "cnv",
            InstrumentFormat::SeabirdBtl => "btl",
        }
    }
}

impl fmt::Display for InstrumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstrumentFormat::Onset => "Onset CSV",
            InstrumentFormat::MiniDot => "PME MiniDOT txt",
            InstrumentFormat::MiniDotCat => "PME MiniDOT CAT",
            InstrumentFormat::RbrRText => "RBR R-Text",
            InstrumentFormat::VanEssenMon => "Van Essen MON",
            InstrumentFormat::SeabirdCnv => "Sea-Bird CNV",
            InstrumentFormat::SeabirdBtl => "Sea-Bird BTL",
        };
        f.write_str(name)
    }
}

impl FromStr for InstrumentFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InstrumentFormat::ALL
            .into_iter()
            .find(|format| format.cli_name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                let known: Vec<&str> = InstrumentFormat::ALL.iter().map(|f| f.cli_name()).collect();
                format!("unknown format '{}', expected one of: {}", s, known.join(", "))
            })
    }
}

/// Instrument sub-model inferred from the set of canonical variables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstrumentType {
    Pendant,
    #[serde(rename = "CT")]
    Ct,
    Tidbit,
    #[serde(rename = "PT")]
    Pt,
    #[serde(rename = "WL")]
    Wl,
    #[serde(rename = "airPT")]
    AirPt,
    #[serde(rename = "airP")]
    AirP,
    Turbidity,
    Unknown,
}

impl InstrumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentType::Pendant => "Pendant",
            InstrumentType::Ct => "CT",
            InstrumentType::Tidbit => "Tidbit",
            InstrumentType::Pt => "PT",
            InstrumentType::Wl => "WL",
            InstrumentType::AirPt => "airPT",
            InstrumentType::AirP => "airP",
            InstrumentType::Turbidity => "Turbidity",
            InstrumentType::Unknown => "Unknown",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        [
            InstrumentType::Pendant,
            InstrumentType::Ct,
            InstrumentType::Tidbit,
            InstrumentType::Pt,
            InstrumentType::Wl,
            InstrumentType::AirPt,
            InstrumentType::AirP,
            InstrumentType::Turbidity,
            InstrumentType::Unknown,
        ]
        .into_iter()
        .find(|kind| kind.as_str() == label)
    }
}

impl fmt::Display for InstrumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single metadata value: scalar, list or nested mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Integer(i64),
    Float(f64),
    Text(String),
    List(Vec<MetaValue>),
    Map(Metadata),
}

impl MetaValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MetaValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Metadata> {
        match self {
            MetaValue::Map(map) => Some(map),
            _ => None,
        }
    }

    fn find_text(&self, key: &str) -> Option<&str> {
        match self {
            MetaValue::Map(map) => map.find_text(key),
            MetaValue::List(values) => values.iter().find_map(|value| value.find_text(key)),
            _ => None,
        }
    }
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        MetaValue::Text(value.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        MetaValue::Text(value)
    }
}

impl From<i64> for MetaValue {
    fn from(value: i64) -> Self {
        MetaValue::Integer(value)
    }
}

impl From<f64> for MetaValue {
    fn from(value: f64) -> Self {
        MetaValue::Float(value)
    }
}

impl From<Metadata> for MetaValue {
    fn from(value: Metadata) -> Self {
        MetaValue::Map(value)
    }
}

impl From<Vec<String>> for MetaValue {
    fn from(values: Vec<String>) -> Self {
        MetaValue::List(values.into_iter().map(MetaValue::Text).collect())
    }
}

/// Attribute name to value mapping, nested for indexed/channel attributes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, MetaValue>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a parsed value. Used by the header parsers only.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<MetaValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Insert a value derived after parsing.
    ///
    /// Parsed values are never overwritten; returns false if the key exists.
    pub fn insert_derived(&mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> bool {
        match self.0.entry(key.into()) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(entry) => {
                entry.insert(value.into());
                true
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.0.get(key)
    }

    pub fn get_text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(MetaValue::as_text)
    }

    /// Walk nested maps, e.g. `["Series settings", "Instrument number"]`
    pub fn get_path(&self, path: &[&str]) -> Option<&MetaValue> {
        let (last, parents) = path.split_last()?;
        let mut current = self;
        for key in parents {
            current = current.get(key)?.as_map()?;
        }
        current.get(last)
    }

    /// Nested map stored under `key`, created when absent.
    ///
    /// A scalar already stored under `key` is replaced by an empty map.
    pub fn map_mut(&mut self, key: &str) -> &mut Metadata {
        let entry = self
            .0
            .entry(key.to_string())
            .or_insert_with(|| MetaValue::Map(Metadata::new()));
        if !matches!(entry, MetaValue::Map(_)) {
            *entry = MetaValue::Map(Metadata::new());
        }
        match entry {
            MetaValue::Map(map) => map,
            _ => unreachable!("entry was just set to a map"),
        }
    }

    /// Insert, turning a repeated key into a list of values
    pub fn push_value(&mut self, key: impl Into<String>, value: impl Into<MetaValue>) {
        let value = value.into();
        match self.0.entry(key.into()) {
            std::collections::btree_map::Entry::Vacant(entry) => {
                entry.insert(value);
            }
            std::collections::btree_map::Entry::Occupied(mut entry) => match entry.get_mut() {
                MetaValue::List(values) => values.push(value),
                existing => {
                    let first = std::mem::replace(existing, MetaValue::List(Vec::new()));
                    *existing = MetaValue::List(vec![first, value]);
                }
            },
        }
    }

    /// Copy all entries of `other`, replacing existing keys
    pub fn merge(&mut self, other: Metadata) {
        self.0.extend(other.0);
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// First text value stored under `key` at any depth, searching maps and
    /// lists depth first in key order
    pub fn find_text(&self, key: &str) -> Option<&str> {
        if let Some(text) = self.get_text(key) {
            return Some(text);
        }
        self.0.values().find_map(|value| value.find_text(key))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetaValue)> {
        self.0.iter()
    }
}

impl FromIterator<(String, MetaValue)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (String, MetaValue)>>(iter: I) -> Self {
        Metadata(iter.into_iter().collect())
    }
}

/// One column of the source file and its normalized identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name exactly as found in the file
    pub original_name: String,
    pub unit: Option<String>,
    /// Empty until the variable normalizer runs
    pub canonical_name: String,
    /// Housekeeping/event column excluded from instrument classification
    pub ignored: bool,
    /// Format specific attributes (long name, value bounds, ...)
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub attributes: Metadata,
}

impl ColumnDescriptor {
    pub fn raw(original_name: impl Into<String>) -> Self {
        Self {
            original_name: original_name.into(),
            unit: None,
            canonical_name: String::new(),
            ignored: false,
            attributes: Metadata::new(),
        }
    }

    pub fn with_unit(mut self, unit: Option<String>) -> Self {
        self.unit = unit.filter(|unit| !unit.trim().is_empty());
        self
    }
}

/// Soft diagnostics collected while parsing a file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParseWarning {
    /// The txt file is not a MiniDOT file; an empty dataset is returned
    NotMiniDot { reason: String },
    RowCountMismatch { expected: usize, found: usize },
    UnknownInstrumentSignature { variables: Vec<String> },
    UnresolvedTimezone,
    UnparsedTimestamps { column: String, count: usize },
    UnitNotConverted { variable: String, unit: String },
    UnknownTemperatureUnit { variable: String, unit: String },
    DuplicateVariable { name: String, renamed: String },
    SerialNumberConflict { logger: Vec<String>, sensor: Vec<String> },
    InvalidXml { section: String, reason: String },
    InvalidProcessingDate { step: String, value: String },
    MissingTime,
    MissingSerialNumber,
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseWarning::NotMiniDot { reason } => write!(f, "Not a MiniDOT txt file: {}", reason),
            ParseWarning::RowCountMismatch { expected, found } => write!(
                f,
                "Header declares {} records but {} were read",
                expected, found
            ),
            ParseWarning::UnknownInstrumentSignature { variables } => write!(
                f,
                "Unknown instrument type for variables: {}",
                variables.join(", ")
            ),
            ParseWarning::UnresolvedTimezone => {
                write!(f, "No timezone information found, time assumed to be UTC")
            }
            ParseWarning::UnparsedTimestamps { column, count } => {
                write!(f, "{} values of '{}' could not be parsed as time", count, column)
            }
            ParseWarning::UnitNotConverted { variable, unit } => {
                write!(f, "Variable '{}' kept in non-SI unit '{}'", variable, unit)
            }
            ParseWarning::UnknownTemperatureUnit { variable, unit } => {
                write!(f, "Unrecognized temperature unit '{}' for '{}'", unit, variable)
            }
            ParseWarning::DuplicateVariable { name, renamed } => {
                write!(f, "Duplicate variable '{}' renamed to '{}'", name, renamed)
            }
            ParseWarning::SerialNumberConflict { logger, sensor } => write!(
                f,
                "Logger serials [{}] and sensor serials [{}] disagree",
                logger.join(", "),
                sensor.join(", ")
            ),
            ParseWarning::InvalidXml { section, reason } => {
                write!(f, "Could not parse XML block {}: {}", section, reason)
            }
            ParseWarning::InvalidProcessingDate { step, value } => {
                write!(f, "Could not parse {} processing date '{}'", step, value)
            }
            ParseWarning::MissingTime => write!(f, "No time variable available"),
            ParseWarning::MissingSerialNumber => {
                write!(f, "No instrument serial number found in the header")
            }
        }
    }
}

/// Timezone evidence recovered from a header
#[derive(Debug, Clone, PartialEq)]
pub struct TimezoneHint {
    pub offset: FixedOffset,
    /// Text the offset was read from, e.g. `GMT-07:00`
    pub source_text: String,
}

/// State of the time column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeReference {
    /// Wall-clock values in an offset not yet applied
    Local,
    Utc,
    /// The dataset has no time column
    Absent,
}

/// Normalized, time-indexed dataset produced from one source file
#[derive(Debug, Clone)]
pub struct NormalizedDataset {
    pub source: PathBuf,
    pub format: InstrumentFormat,
    /// One column per canonical variable, `time` first when present
    pub data: DataFrame,
    /// Descriptors aligned with `data` columns (unit and provenance)
    pub columns: Vec<ColumnDescriptor>,
    pub metadata: Metadata,
    pub history: Vec<String>,
    pub warnings: Vec<ParseWarning>,
    pub time_reference: TimeReference,
}

impl NormalizedDataset {
    /// Dataset without rows, returned for soft format failures
    pub fn empty(
        source: PathBuf,
        format: InstrumentFormat,
        metadata: Metadata,
        warnings: Vec<ParseWarning>,
    ) -> Self {
        Self {
            source,
            format,
            data: DataFrame::empty(),
            columns: Vec::new(),
            metadata,
            history: Vec::new(),
            warnings,
            time_reference: TimeReference::Absent,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.height() == 0
    }

    pub fn row_count(&self) -> usize {
        self.data.height()
    }

    pub fn column(&self, canonical_name: &str) -> Option<&ColumnDescriptor> {
        self.columns
            .iter()
            .find(|column| column.canonical_name == canonical_name)
    }

    pub fn canonical_names(&self) -> Vec<&str> {
        self.columns
            .iter()
            .map(|column| column.canonical_name.as_str())
            .collect()
    }

    /// Append a timestamped entry to the history attribute
    pub fn add_history(&mut self, entry: impl AsRef<str>) {
        let now = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
        self.history.push(format!("{} - {}", now, entry.as_ref()));
    }

    /// Record a warning once; repeated passes do not duplicate it
    pub fn warn(&mut self, warning: ParseWarning) {
        if self.warnings.contains(&warning) {
            return;
        }
        tracing::warn!("{}: {}", self.source.display(), warning);
        self.warnings.push(warning);
    }

    /// Global metadata record including the rendered history and warnings
    pub fn metadata_record(&self) -> Metadata {
        let mut record = self.metadata.clone();
        record.insert("history", self.history.join("\n"));
        if !self.warnings.is_empty() {
            let warnings: Vec<String> = self.warnings.iter().map(|w| w.to_string()).collect();
            record.insert("warnings", warnings);
        }
        record
    }
}

/// Batch processing statistics
#[derive(Debug, Default)]
pub struct ProcessingStats {
    pub files_processed: usize,
    pub files_failed: usize,
    /// Files that parsed to an empty dataset (soft format mismatch)
    pub files_empty: usize,
    pub total_rows: usize,
    pub total_warnings: usize,
    pub output_path: Option<PathBuf>,
    pub processing_time_ms: u128,
}
