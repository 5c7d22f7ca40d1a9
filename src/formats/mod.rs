//! Format-specific header parsers and signature probing.
//!
//! Each vendor module exposes a side-effect-free `probe` over the first
//! lines of a file and a `parse_header` walking the header with its own
//! grammar table. Dispatch is a plain match on [`InstrumentFormat`].

pub mod onset;
pub mod pme;
pub mod rbr;
pub mod seabird;
pub mod van_essen;

use crate::body::{BodySpec, Row};
use crate::constants::{PROBE_LINES, manufacturers};
use crate::error::{OceanError, Result};
use crate::header::{LineReader, read_head};
use crate::models::{ColumnDescriptor, InstrumentFormat, Metadata, ParseWarning, TimezoneHint};
use crate::schema::TimeSource;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::debug;

/// Result of a cheap format signature check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    Match,
    NoMatch(String),
}

impl Probe {
    pub fn is_match(&self) -> bool {
        matches!(self, Probe::Match)
    }

    pub(crate) fn no_match(reason: impl Into<String>) -> Self {
        Probe::NoMatch(reason.into())
    }
}

/// Everything a header parser recovers before the body
#[derive(Debug, Clone)]
pub struct ParsedHeader {
    pub metadata: Metadata,
    /// Raw column descriptors in body order
    pub columns: Vec<ColumnDescriptor>,
    pub body: BodySpec,
    pub time: TimeSource,
    pub timezone: Option<TimezoneHint>,
    /// Value marking missing data in the body
    pub bad_flag: Option<f64>,
    /// Dated history entries recovered from the header
    pub history: Vec<String>,
    pub warnings: Vec<ParseWarning>,
}

impl ParsedHeader {
    pub fn new(body: BodySpec) -> Self {
        Self {
            metadata: Metadata::new(),
            columns: Vec::new(),
            body,
            time: TimeSource::None,
            timezone: None,
            bad_flag: None,
            history: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

/// Header parse outcome
#[derive(Debug)]
pub enum HeaderParse {
    Parsed(Box<ParsedHeader>),
    /// Not this format after all; an empty dataset is returned with the warning
    NotApplicable(ParseWarning),
}

/// Check whether the first lines of a file look like `format`
pub fn probe(format: InstrumentFormat, head: &[String]) -> Probe {
    match format {
        InstrumentFormat::Onset => onset::probe(head),
        InstrumentFormat::MiniDot => pme::probe_txt(head),
        InstrumentFormat::MiniDotCat => pme::probe_cat(head),
        InstrumentFormat::RbrRText => rbr::probe(head),
        InstrumentFormat::VanEssenMon => van_essen::probe(head),
        InstrumentFormat::SeabirdCnv => seabird::probe_cnv(head),
        InstrumentFormat::SeabirdBtl => seabird::probe_btl(head),
    }
}

/// First format whose probe accepts `head`, trying `hint` before the
/// others in [`InstrumentFormat::ALL`] order
pub fn detect_in_head(head: &[String], hint: Option<InstrumentFormat>) -> Option<InstrumentFormat> {
    let candidates = hint
        .into_iter()
        .chain(InstrumentFormat::ALL.into_iter().filter(|f| Some(*f) != hint));

    for format in candidates {
        match probe(format, head) {
            Probe::Match => return Some(format),
            Probe::NoMatch(reason) => debug!("Not {}: {}", format, reason),
        }
    }
    None
}

/// Detect the format of a file by probing its first lines.
///
/// The extension/directory hint is probed first.
pub fn detect_format(path: &Path) -> Result<InstrumentFormat> {
    if !path.exists() {
        return Err(OceanError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let head = read_head(BufReader::new(File::open(path)?), PROBE_LINES)?;
    match detect_in_head(&head, InstrumentFormat::from_path(path)) {
        Some(format) => {
            debug!("Detected {} for {}", format, path.display());
            Ok(format)
        }
        None => Err(OceanError::UnknownFormat {
            path: path.to_path_buf(),
        }),
    }
}

/// Parse the header of `format`, leaving the reader at the first data line
pub fn parse_header<R: BufRead>(
    format: InstrumentFormat,
    lines: &mut LineReader<R>,
    path: &Path,
) -> Result<HeaderParse> {
    match format {
        InstrumentFormat::Onset => onset::parse_header(lines, path),
        InstrumentFormat::MiniDot => pme::parse_txt_header(lines, path),
        InstrumentFormat::MiniDotCat => pme::parse_cat_header(lines, path),
        InstrumentFormat::RbrRText => rbr::parse_header(lines, path),
        InstrumentFormat::VanEssenMon => van_essen::parse_header(lines, path),
        InstrumentFormat::SeabirdCnv => seabird::parse_cnv_header(lines, path),
        InstrumentFormat::SeabirdBtl => seabird::parse_btl_header(lines, path),
    }
}

/// Reshape raw rows where the body layout differs from the variable layout
pub fn finish_table(
    format: InstrumentFormat,
    columns: Vec<ColumnDescriptor>,
    rows: Vec<Row>,
    metadata: &Metadata,
) -> (Vec<ColumnDescriptor>, Vec<Row>) {
    match format {
        InstrumentFormat::SeabirdBtl => {
            let scans = seabird::btl::scans_per_bottle(metadata);
            seabird::btl::regroup_statistics(columns, rows, scans)
        }
        _ => (columns, rows),
    }
}

pub fn manufacturer(format: InstrumentFormat) -> &'static str {
    match format {
        InstrumentFormat::Onset => manufacturers::ONSET,
        InstrumentFormat::MiniDot | InstrumentFormat::MiniDotCat => manufacturers::PME,
        InstrumentFormat::RbrRText => manufacturers::RBR,
        InstrumentFormat::VanEssenMon => manufacturers::VAN_ESSEN,
        InstrumentFormat::SeabirdCnv | InstrumentFormat::SeabirdBtl => manufacturers::SEABIRD,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    fn head(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    fn write_temp(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    #[test]
    fn test_probes_are_exclusive() {
        let samples = [
            (
                InstrumentFormat::Onset,
                "\"Plot Title: 10251325\"\n\"#\",\"Date Time, GMT-07:00\",\"Temp, °C (LGR S/N: 10251325, SEN S/N: 10251325)\"\n",
            ),
            (
                InstrumentFormat::MiniDot,
                "7450-617000\nOS REV: 2.31 Sensor Cal: 617000\nTime (sec),  T (deg C)\n",
            ),
            (
                InstrumentFormat::MiniDotCat,
                "MiniDOT Logger Concatenated Data File\nSensor:  7450-224208\n",
            ),
            (
                InstrumentFormat::RbrRText,
                "Model=RBRsolo\nSerial=077014\nNumberOfSamples=3\n",
            ),
            (
                InstrumentFormat::VanEssenMon,
                "Data file for DataLogger.\n[Logger settings]\n  Instrument type    =CTD-Diver\n[Data]\n",
            ),
            (
                InstrumentFormat::SeabirdCnv,
                "* Sea-Bird SBE 9 Data File:\n# nquan = 2\n# name 0 = prdM: Pressure [db]\n*END*\n",
            ),
            (
                InstrumentFormat::SeabirdBtl,
                "* Sea-Bird SBE 9 Data File:\n# bottlesum_date = Jun 23 2016 14:00:00\n*END*\n    Bottle        Date\n",
            ),
        ];

        for (expected, text) in samples {
            let lines = head(text);
            for format in InstrumentFormat::ALL {
                assert_eq!(
                    probe(format, &lines).is_match(),
                    format == expected,
                    "{} probe on {} sample",
                    format,
                    expected
                );
            }
        }
    }

    #[test]
    fn test_detect_format_ignores_misleading_extension() {
        let file = write_temp(
            ".csv",
            "* Sea-Bird SBE 9 Data File:\n# name 0 = prdM: Pressure [db]\n*END*\n 1.0\n",
        );
        assert_eq!(
            detect_format(file.path()).unwrap(),
            InstrumentFormat::SeabirdCnv
        );
    }

    #[test]
    fn test_detect_format_unknown() {
        let file = write_temp(".txt", "just some notes\nnothing else\n");
        match detect_format(file.path()).unwrap_err() {
            OceanError::UnknownFormat { .. } => {}
            other => panic!("Expected UnknownFormat error, got {:?}", other),
        }
    }

    #[test]
    fn test_detect_format_missing_file() {
        let result = detect_format(Path::new("/nonexistent/file.cnv"));
        assert!(matches!(result, Err(OceanError::FileNotFound { .. })));
    }
}
