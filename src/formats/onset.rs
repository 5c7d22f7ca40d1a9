//! Onset HOBOware CSV exports.
//!
//! ```text
//! "Plot Title: 10251325"
//! "#","Date Time, GMT-07:00","Temp, °F (LGR S/N: 10251325, SEN S/N: 10251325, lbl: 1)"
//! 1,05/01/19 12:00:00 PM,68.0
//! ```
//!
//! Older exports start with a `Serial Number:` line instead of the plot
//! title. Serial numbers, label codes and the UTC offset live inside the
//! column names.

use super::{HeaderParse, ParsedHeader, Probe};
use crate::body::{BodySpec, Layout};
use crate::error::{OceanError, Result};
use crate::header::{
    LineReader, RawHeaderLine, Rule, TokenizerRules, classify_line, dispatch, is_key_value,
};
use crate::models::{ColumnDescriptor, MetaValue, Metadata, ParseWarning, TimezoneHint};
use crate::schema::TimeSource;
use crate::units::find_utc_offset;
use regex::Regex;
use std::collections::BTreeSet;
use std::io::BufRead;
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;

static PLOT_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*"?Plot Title:\s*(?P<title>.*?)"?\s*$"#).unwrap());
static LOGGER_SERIAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"LGR S/N:\s*(?P<sn>\d+)").unwrap());
static SENSOR_SERIAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"SEN S/N:\s*(?P<sn>\d+)").unwrap());
static LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)lbl:\s*(?P<lbl>[^,)\s]+)").unwrap());
static GMT_OFFSET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"GMT\s*[+-]\d{1,2}(:?\d{2})?").unwrap());

/// Lines searched for the column header
const MAX_PREAMBLE_LINES: usize = 20;

#[derive(Default)]
struct OnsetContext {
    metadata: Metadata,
}

const RULES: &[Rule<OnsetContext>] = &[
    Rule {
        label: "plot title",
        matches: |line| PLOT_TITLE.is_match(&line.text),
        handle: plot_title,
    },
    Rule {
        label: "key value",
        matches: is_key_value,
        handle: key_value,
    },
];

fn plot_title(ctx: &mut OnsetContext, line: &RawHeaderLine) -> Result<()> {
    if let Some(caps) = PLOT_TITLE.captures(&line.text) {
        ctx.metadata.insert("plot_title", caps["title"].trim());
    }
    Ok(())
}

fn key_value(ctx: &mut OnsetContext, line: &RawHeaderLine) -> Result<()> {
    if let Some((key, value)) = line.kind.key_value() {
        ctx.metadata
            .insert(key.trim_matches('"'), value.trim_matches('"'));
    }
    Ok(())
}

fn is_column_header(line: &str) -> bool {
    let trimmed = line.trim_start();
    (trimmed.starts_with("\"#\"") || trimmed.starts_with("#,")) && trimmed.contains("Date Time")
}

pub fn probe(head: &[String]) -> Probe {
    let Some(first) = head.first() else {
        return Probe::no_match("empty file");
    };
    let first = first.trim().trim_matches('"');
    if first.starts_with("Plot Title") || first.starts_with("Serial Number:") {
        return Probe::Match;
    }
    if head.iter().take(MAX_PREAMBLE_LINES).any(|line| is_column_header(line)) {
        return Probe::Match;
    }
    Probe::no_match("no plot title, serial number or '#,Date Time' column header")
}

fn unique(regex: &Regex, group: &str, text: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    regex
        .captures_iter(text)
        .map(|caps| caps[group].to_string())
        .filter(|value| seen.insert(value.clone()))
        .collect()
}

fn split_column_header(line: &str) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(line.as_bytes());
    let mut names = Vec::new();
    if let Some(record) = reader.records().next() {
        names = record?.iter().map(|field| field.trim().to_string()).collect();
    }
    Ok(names)
}

pub fn parse_header<R: BufRead>(lines: &mut LineReader<R>, path: &Path) -> Result<HeaderParse> {
    let mut ctx = OnsetContext::default();
    let rules = TokenizerRules::default();

    let column_line = loop {
        let Some(text) = lines.next_line()? else {
            return Err(OceanError::header_field_missing(path, "column header"));
        };
        if is_column_header(&text) {
            break text;
        }
        if lines.line_number() > MAX_PREAMBLE_LINES {
            return Err(OceanError::header_field_missing(path, "column header"));
        }
        let line = classify_line(lines.line_number(), &text, rules);
        dispatch(RULES, &mut ctx, &line)?;
    };

    let names = split_column_header(&column_line)?;
    let mut header = ParsedHeader::new(BodySpec::new(Layout::Delimited(b',')));
    header.metadata = ctx.metadata;

    let labels = unique(&LABEL, "lbl", &column_line);
    if !labels.is_empty() {
        header.metadata.insert("lbl", labels);
    }

    let loggers = unique(&LOGGER_SERIAL, "sn", &column_line);
    let sensors = unique(&SENSOR_SERIAL, "sn", &column_line);
    let logger_set: BTreeSet<&String> = loggers.iter().collect();
    let sensor_set: BTreeSet<&String> = sensors.iter().collect();
    if sensors.len() == 1 && logger_set == sensor_set {
        header.metadata.insert("instrument_sn", sensors[0].clone());
    } else if !loggers.is_empty() {
        let mut sorted = loggers.clone();
        sorted.sort();
        header.metadata.insert("instrument_sn", sorted.join(","));
        if !sensors.is_empty() {
            header.warnings.push(ParseWarning::SerialNumberConflict {
                logger: loggers.clone(),
                sensor: sensors.clone(),
            });
        }
    } else if let Some(serial) = header.metadata.get_text("Serial Number").map(str::to_string) {
        header.metadata.insert("instrument_sn", serial);
    }

    let time_column = names
        .iter()
        .find(|name| name.starts_with("Date Time"))
        .or_else(|| names.iter().find(|name| name.starts_with("Date")));

    if let Some(column) = time_column {
        if let Some(found) = GMT_OFFSET.find(column) {
            let source_text = found.as_str().to_string();
            header
                .metadata
                .insert("timezone", MetaValue::Text(source_text.clone()));
            if let Some(offset) = find_utc_offset(&source_text) {
                header.timezone = Some(TimezoneHint {
                    offset,
                    source_text,
                });
            }
        }
        header.time = TimeSource::Text {
            column: column.clone(),
        };
    }

    debug!("Onset header with {} columns in {}", names.len(), path.display());
    header.columns = names.into_iter().map(ColumnDescriptor::raw).collect();
    Ok(HeaderParse::Parsed(Box::new(header)))
}
