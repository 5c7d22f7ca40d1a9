//! PME MiniDOT dissolved oxygen loggers.
//!
//! Single-file txt exports carry a two line header:
//!
//! ```text
//! 7450-617000
//! OS REV: 2.31 Sensor Cal: 617000
//! Time (sec),  BV (Volts),  T (deg C),  DO (mg/l),  Q ()
//! ```
//!
//! A txt file whose second line does not match is simply not a MiniDOT
//! file: the parse yields an empty dataset with a warning. Concatenated
//! (CAT) files start with a fixed signature line, and a mismatch there is
//! a hard [`OceanError::FormatMismatch`].

use super::{HeaderParse, ParsedHeader, Probe};
use crate::body::{BodySpec, Layout};
use crate::constants::{MINIDOT_CAT_HEADER_LINES, MINIDOT_CAT_SIGNATURE};
use crate::error::{OceanError, Result};
use crate::header::{LineKind, LineReader, TokenizerRules};
use crate::models::{ColumnDescriptor, InstrumentFormat, MetaValue, ParseWarning};
use crate::schema::TimeSource;
use regex::Regex;
use std::io::BufRead;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, warn};

static OS_REVISION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"OS REV:\s*(?P<version>\d+\.\d+)\s+Sensor Cal:\s*(?P<calibration>\d*)").unwrap()
});
static UNIT_PARENS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\((?P<unit>.*)\)$").unwrap());

const INSTRUMENT_MODEL: &str = "MiniDOT";

pub fn probe_txt(head: &[String]) -> Probe {
    match head.get(1) {
        Some(line) if OS_REVISION.is_match(line) => Probe::Match,
        Some(_) => Probe::no_match("second line is not 'OS REV: ... Sensor Cal: ...'"),
        None => Probe::no_match("fewer than two lines"),
    }
}

pub fn probe_cat(head: &[String]) -> Probe {
    match head.first() {
        Some(line) if line.trim() == MINIDOT_CAT_SIGNATURE => Probe::Match,
        _ => Probe::no_match(format!("first line is not '{}'", MINIDOT_CAT_SIGNATURE)),
    }
}

fn split_fields(line: &str) -> Vec<String> {
    line.split(',').map(|field| field.trim().to_string()).collect()
}

pub fn parse_txt_header<R: BufRead>(lines: &mut LineReader<R>, path: &Path) -> Result<HeaderParse> {
    let serial = lines.next_line()?.unwrap_or_default();
    let revision = lines.next_line()?.unwrap_or_default();

    let Some(caps) = OS_REVISION.captures(&revision) else {
        let reason = format!("line 2 '{}' does not match 'OS REV: ... Sensor Cal: ...'", revision.trim());
        warn!("{} is not a MiniDOT txt file: {}", path.display(), reason);
        return Ok(HeaderParse::NotApplicable(ParseWarning::NotMiniDot { reason }));
    };

    let mut header = ParsedHeader::new(BodySpec::new(Layout::Delimited(b',')));
    header.metadata.insert("instrument_sn", serial.trim());
    header.metadata.insert("software_version", &caps["version"]);
    header
        .metadata
        .insert("instrument_calibration", &caps["calibration"]);
    header.metadata.insert("instrument_model", INSTRUMENT_MODEL);

    let Some(column_line) = lines.next_line()? else {
        return Err(OceanError::header_field_missing(path, "column header"));
    };
    let names = split_fields(&column_line);
    if let Some(time) = names.iter().find(|name| name.starts_with("Time")) {
        header.time = TimeSource::EpochSeconds {
            column: time.clone(),
        };
    }

    debug!("MiniDOT txt header with {} columns", names.len());
    header.columns = names.into_iter().map(ColumnDescriptor::raw).collect();
    Ok(HeaderParse::Parsed(Box::new(header)))
}

pub fn parse_cat_header<R: BufRead>(lines: &mut LineReader<R>, path: &Path) -> Result<HeaderParse> {
    let first = lines.next_line()?.unwrap_or_default();
    if first.trim() != MINIDOT_CAT_SIGNATURE {
        return Err(OceanError::FormatMismatch {
            path: path.to_path_buf(),
            format: InstrumentFormat::MiniDotCat,
            reason: format!("first line '{}' is not '{}'", first.trim(), MINIDOT_CAT_SIGNATURE),
        });
    }

    let mut header = ParsedHeader::new(BodySpec::new(Layout::Delimited(b',')));
    header.metadata.insert("instrument_model", INSTRUMENT_MODEL);
    let mut comments = Vec::new();
    for _ in 0..MINIDOT_CAT_HEADER_LINES {
        let Some(line) = lines.next_classified(TokenizerRules::default())? else {
            return Err(OceanError::header_field_missing(path, "column header"));
        };
        match line.kind {
            LineKind::KeyValue { key, value } if key == "Sensor" => {
                header.metadata.insert("instrument_sn", value);
            }
            LineKind::KeyValue { key, value } => header.metadata.insert(key, value),
            LineKind::Comment => {}
            _ => comments.push(MetaValue::Text(line.text.trim().to_string())),
        }
    }
    if !comments.is_empty() {
        header.metadata.insert("comment", MetaValue::List(comments));
    }

    let (Some(name_line), Some(unit_line)) = (lines.next_line()?, lines.next_line()?) else {
        return Err(OceanError::header_field_missing(path, "column header"));
    };
    let names = split_fields(&name_line);
    let units = split_fields(&unit_line);
    if names.len() != units.len() {
        return Err(OceanError::InvalidHeader {
            path: path.to_path_buf(),
            line: lines.line_number(),
            reason: format!("{} column names but {} units", names.len(), units.len()),
        });
    }

    if let Some(time) = names.iter().find(|name| name.as_str() == "Unix Timestamp") {
        header.time = TimeSource::EpochSeconds {
            column: time.clone(),
        };
    }

    header.columns = names
        .into_iter()
        .zip(units)
        .map(|(name, unit)| {
            let unit = UNIT_PARENS
                .captures(&unit)
                .map(|caps| caps["unit"].trim().to_string())
                .unwrap_or(unit)
                .trim()
                .to_string();
            let unit = (!unit.eq_ignore_ascii_case("none")).then_some(unit);
            ColumnDescriptor::raw(name).with_unit(unit)
        })
        .collect();
    Ok(HeaderParse::Parsed(Box::new(header)))
}
