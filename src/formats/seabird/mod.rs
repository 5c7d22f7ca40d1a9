//! Sea-Bird SBE Data Processing outputs (CNV profiles and BTL bottle files).
//!
//! Both share a header of prefixed lines ending at `*END*`:
//!
//! ```text
//! * Sea-Bird SBE 9 Data File:
//! * FileName = C:\data\QU39_001.hex
//! * <ApplicationData>...</ApplicationData>
//! ** Station: QU39
//! # nquan = 3
//! # name 0 = prdM: Pressure, Strain Gauge [db]
//! # span 0 = 0.500, 100.000
//! # datcnv_date = Jun 23 2016 13:52:05, 7.26.7.107
//! *END*
//! ```
//!
//! `**` lines are user comments, `*` lines come from the instrument and
//! `#` lines from the processing software. Embedded XML is parsed into
//! nested metadata.

pub mod btl;
mod xml;

use super::{HeaderParse, ParsedHeader, Probe};
use crate::body::{BodySpec, Layout, RowCountPolicy};
use crate::constants::{SEABIRD_DATE_FORMAT, SEABIRD_HEADER_END, SEABIRD_PROCESSING_STEPS};
use crate::error::{OceanError, Result};
use crate::header::{
    LineKind, LineReader, Marker, RawHeaderLine, Rule, TokenizerRules, classify_line, dispatch,
};
use crate::models::{ColumnDescriptor, MetaValue, Metadata, ParseWarning};
use crate::schema::TimeSource;
use chrono::{Datelike, NaiveDateTime};
use regex::Regex;
use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, warn};

static XML_START: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[*#]\s*<").unwrap());
static INSTRUMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:Sea-Bird (?P<model>.*?) Data File:?|SBE (?P<sbe>.*))$").unwrap()
});
static SERIAL_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<model>.*?)\s*SERIAL NO\.\s*(?P<sn>[0-9A-Za-z-]+)").unwrap()
});
static SOFTWARE_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^Software version\s+(?P<version>.*)$").unwrap());
static COMMENT_KEY_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<key>[^:=]*[^:=\s])\s*[:=]\s*(?P<value>.*)$").unwrap()
});
static VARIABLE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^name\s+(?P<id>\d+)\s*=\s*(?P<variable>[^\s:]+):\s*(?P<long_name>[^\[]*?)\s*(?:\[(?P<units>[^\]]*)\](?P<comment>.*))?$",
    )
    .unwrap()
});
static VARIABLE_SPAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^span\s+(?P<id>\d+)\s*=\s*(?P<min>[^,]+),\s*(?P<max>.+)$").unwrap()
});
static SOFTWARE_BUILD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<software_version>[\d.]+)\s*(?P<date_extra>.*)$").unwrap()
});

const PREFIXED: TokenizerRules = TokenizerRules { prefixed: true };
const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

struct SeabirdContext {
    path: PathBuf,
    metadata: Metadata,
    /// Variables by `# name N` index
    variables: BTreeMap<usize, ColumnDescriptor>,
    warnings: Vec<ParseWarning>,
}

impl SeabirdContext {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            metadata: Metadata::new(),
            variables: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }
}

fn prefixed(line: &RawHeaderLine) -> Option<(Marker, &str)> {
    match &line.kind {
        LineKind::Prefixed { marker, content } => Some((*marker, content.as_str())),
        _ => None,
    }
}

fn is_user_comment(line: &RawHeaderLine) -> bool {
    matches!(prefixed(line), Some((Marker::DoubleStar, _)))
}

fn is_prompt(line: &RawHeaderLine) -> bool {
    matches!(prefixed(line), Some((Marker::Star, content)) if content.starts_with("S>"))
}

fn is_cast(line: &RawHeaderLine) -> bool {
    matches!(prefixed(line), Some((Marker::Star, content)) if content.starts_with("cast"))
}

fn is_star_key_value(line: &RawHeaderLine) -> bool {
    matches!(prefixed(line), Some((Marker::Star, content)) if content.contains(" = "))
}

fn is_serial_number(line: &RawHeaderLine) -> bool {
    matches!(prefixed(line), Some((Marker::Star, content)) if SERIAL_NUMBER.is_match(content))
}

fn is_instrument(line: &RawHeaderLine) -> bool {
    matches!(prefixed(line), Some((Marker::Star, content)) if INSTRUMENT.is_match(content))
}

fn is_software_version(line: &RawHeaderLine) -> bool {
    matches!(prefixed(line), Some((Marker::Star, content)) if SOFTWARE_VERSION.is_match(content))
}

fn is_variable_name(line: &RawHeaderLine) -> bool {
    matches!(prefixed(line), Some((Marker::Hash, content)) if content.starts_with("name "))
}

fn is_variable_span(line: &RawHeaderLine) -> bool {
    matches!(prefixed(line), Some((Marker::Hash, content)) if content.starts_with("span "))
}

fn is_hash_key_value(line: &RawHeaderLine) -> bool {
    matches!(prefixed(line), Some((Marker::Hash, content)) if content.contains('='))
}

const RULES: &[Rule<SeabirdContext>] = &[
    Rule {
        label: "user comment",
        matches: is_user_comment,
        handle: user_comment,
    },
    Rule {
        label: "prompt",
        matches: is_prompt,
        handle: |_, _| Ok(()),
    },
    Rule {
        label: "cast",
        matches: is_cast,
        handle: cast,
    },
    Rule {
        label: "instrument key value",
        matches: is_star_key_value,
        handle: key_value,
    },
    Rule {
        label: "serial number",
        matches: is_serial_number,
        handle: serial_number,
    },
    Rule {
        label: "instrument model",
        matches: is_instrument,
        handle: instrument_model,
    },
    Rule {
        label: "software version",
        matches: is_software_version,
        handle: software_version,
    },
    Rule {
        label: "variable name",
        matches: is_variable_name,
        handle: variable_name,
    },
    Rule {
        label: "variable span",
        matches: is_variable_span,
        handle: variable_span,
    },
    Rule {
        label: "processing key value",
        matches: is_hash_key_value,
        handle: key_value,
    },
];

fn add_comment(ctx: &mut SeabirdContext, content: &str) {
    match COMMENT_KEY_VALUE.captures(content) {
        Some(caps) => ctx.metadata.insert(&caps["key"], caps["value"].trim()),
        None if content.is_empty() => {}
        None => ctx.metadata.push_value("comments", content),
    }
}

fn user_comment(ctx: &mut SeabirdContext, line: &RawHeaderLine) -> Result<()> {
    if let Some((_, content)) = prefixed(line) {
        add_comment(ctx, content);
    }
    Ok(())
}

fn cast(ctx: &mut SeabirdContext, line: &RawHeaderLine) -> Result<()> {
    if let Some((_, content)) = prefixed(line) {
        ctx.metadata.insert("cast", content);
    }
    Ok(())
}

/// `Start Time` -> `start_time`
fn standardize_key(key: &str) -> String {
    key.trim().replace(' ', "_").to_lowercase()
}

fn key_value(ctx: &mut SeabirdContext, line: &RawHeaderLine) -> Result<()> {
    if let Some((key, value)) = prefixed(line).and_then(|(_, content)| content.split_once('=')) {
        ctx.metadata.insert(standardize_key(key), value.trim());
    }
    Ok(())
}

fn instrument_model(ctx: &mut SeabirdContext, line: &RawHeaderLine) -> Result<()> {
    let Some(caps) = prefixed(line).and_then(|(_, content)| INSTRUMENT.captures(content)) else {
        return Ok(());
    };
    let model = caps.name("model").or_else(|| caps.name("sbe"));
    if let Some(model) = model {
        if !ctx.metadata.contains_key("instrument_model") {
            ctx.metadata.insert("instrument_model", model.as_str().trim());
        }
    }
    Ok(())
}

/// `* SeacatPlus V 1.6b  SERIAL NO. 4829    05 Mar 2015  13:18:53`
fn serial_number(ctx: &mut SeabirdContext, line: &RawHeaderLine) -> Result<()> {
    let Some(caps) = prefixed(line).and_then(|(_, content)| SERIAL_NUMBER.captures(content)) else {
        return Ok(());
    };
    ctx.metadata.insert("instrument_sn", &caps["sn"]);
    let model = caps["model"].trim();
    if !model.is_empty() && !ctx.metadata.contains_key("instrument_model") {
        ctx.metadata.insert("instrument_model", model);
    }
    Ok(())
}

fn software_version(ctx: &mut SeabirdContext, line: &RawHeaderLine) -> Result<()> {
    if let Some(caps) = prefixed(line).and_then(|(_, content)| SOFTWARE_VERSION.captures(content)) {
        ctx.metadata
            .insert("software_version", caps["version"].trim());
    }
    Ok(())
}

fn variable_name(ctx: &mut SeabirdContext, line: &RawHeaderLine) -> Result<()> {
    let Some(caps) = prefixed(line).and_then(|(_, content)| VARIABLE_NAME.captures(content)) else {
        warn!("Malformed variable line {}: {}", line.number, line.text);
        return Ok(());
    };
    let index: usize = caps["id"].parse().map_err(|_| OceanError::InvalidHeader {
        path: ctx.path.clone(),
        line: line.number,
        reason: format!("invalid variable index '{}'", &caps["id"]),
    })?;

    let units = caps.name("units").map(|m| m.as_str().trim().to_string());
    let mut column = ColumnDescriptor::raw(&caps["variable"]).with_unit(units);
    column
        .attributes
        .insert("long_name", caps["long_name"].trim());
    if let Some(comment) = caps.name("comment").map(|m| m.as_str().trim()) {
        if !comment.is_empty() {
            column.attributes.insert("comment", comment);
        }
    }
    ctx.variables.insert(index, column);
    Ok(())
}

fn span_value(text: &str) -> MetaValue {
    let text = text.trim();
    if let Ok(value) = text.parse::<i64>() {
        MetaValue::Integer(value)
    } else if let Ok(value) = text.parse::<f64>() {
        MetaValue::Float(value)
    } else {
        MetaValue::Text(text.to_string())
    }
}

fn variable_span(ctx: &mut SeabirdContext, line: &RawHeaderLine) -> Result<()> {
    let invalid = |reason: String| OceanError::InvalidHeader {
        path: ctx.path.clone(),
        line: line.number,
        reason,
    };
    let Some(caps) = prefixed(line).and_then(|(_, content)| VARIABLE_SPAN.captures(content)) else {
        return Err(invalid(format!("malformed span line '{}'", line.text.trim())));
    };
    let index: usize = caps["id"]
        .parse()
        .map_err(|_| invalid(format!("invalid span index '{}'", &caps["id"])))?;
    let (min, max) = (span_value(&caps["min"]), span_value(&caps["max"]));

    let Some(column) = ctx.variables.get_mut(&index) else {
        return Err(invalid(format!("span {} refers to an undefined variable", index)));
    };
    column.attributes.insert("value_min", min);
    column.attributes.insert("value_max", max);
    Ok(())
}

/// Does `text` continue an XML block opened by a `sentinel` line
fn continues_xml(text: &str, sentinel: char) -> bool {
    let same_sentinel = text
        .strip_prefix(sentinel)
        .is_some_and(|rest| rest.trim_start().starts_with('<') || rest.trim().is_empty());
    same_sentinel
        || text.starts_with("** ")
        || text.starts_with("* cast")
        || text.trim_end().ends_with('>')
}

/// Greedily read an XML block starting at `first`; the first line not part
/// of the block is pushed back.
fn read_xml_block<R: BufRead>(
    lines: &mut LineReader<R>,
    first: String,
    ctx: &mut SeabirdContext,
) -> Result<()> {
    let sentinel = if first.starts_with('#') { '#' } else { '*' };
    let section = if sentinel == '#' {
        "instrument_xml"
    } else {
        "data_xml"
    };

    let mut block = String::new();
    let mut current = Some(first);
    while let Some(text) = current.take() {
        if text.contains(SEABIRD_HEADER_END) || !continues_xml(&text, sentinel) {
            lines.push_back(text);
            break;
        }
        if let Some(comment) = text.strip_prefix("**") {
            add_comment(ctx, comment.trim());
        } else if let Some(cast) = text.strip_prefix("* cast") {
            ctx.metadata.insert("cast", format!("cast{}", cast));
        } else {
            block.extend(text.chars().skip(1));
            block.push('\n');
        }
        current = lines.next_line()?;
    }

    match xml::parse_block(&block) {
        Ok(parsed) => {
            if let Some(MetaValue::Map(existing)) = ctx.metadata.get(section) {
                let mut merged = existing.clone();
                merged.merge(parsed);
                ctx.metadata.insert(section, merged);
            } else {
                ctx.metadata.insert(section, parsed);
            }
        }
        Err(reason) => {
            ctx.warnings.push(ParseWarning::InvalidXml {
                section: section.to_string(),
                reason,
            });
            ctx.metadata.push_value(section, block.trim());
        }
    }
    Ok(())
}

/// Walk the header up to `*END*`
fn read_header<R: BufRead>(lines: &mut LineReader<R>, path: &Path) -> Result<SeabirdContext> {
    let mut ctx = SeabirdContext::new(path);
    loop {
        let Some(text) = lines.next_line()? else {
            return Err(OceanError::header_field_missing(path, SEABIRD_HEADER_END));
        };
        if text.contains(SEABIRD_HEADER_END) {
            break;
        }
        if text.trim().is_empty() || text.trim() == "*" {
            continue;
        }
        if XML_START.is_match(&text) {
            read_xml_block(lines, text, &mut ctx)?;
            continue;
        }
        let line = classify_line(lines.line_number(), &text, PREFIXED);
        dispatch(RULES, &mut ctx, &line)?;
    }
    debug!(
        "Sea-Bird header with {} variables in {}",
        ctx.variables.len(),
        path.display()
    );
    Ok(ctx)
}

/// Render the processing step attributes as sorted dated history entries
fn processing_history(metadata: &Metadata, warnings: &mut Vec<ParseWarning>) -> Vec<String> {
    let mut history = Vec::new();
    for step in SEABIRD_PROCESSING_STEPS {
        let prefix = format!("{}_", step);
        let mut attributes: BTreeMap<String, String> = metadata
            .iter()
            .filter_map(|(key, value)| {
                let attribute = key.strip_prefix(&prefix)?;
                Some((attribute.to_string(), value.as_text()?.to_string()))
            })
            .collect();
        let Some(date_line) = attributes.remove("date") else {
            if !attributes.is_empty() {
                debug!("Processing step {} has no date", step);
            }
            continue;
        };

        let (date, extra) = date_line.split_once(',').unwrap_or((date_line.as_str(), ""));
        let Ok(date) = NaiveDateTime::parse_from_str(date.trim(), SEABIRD_DATE_FORMAT) else {
            warnings.push(ParseWarning::InvalidProcessingDate {
                step: step.to_string(),
                value: date_line.clone(),
            });
            continue;
        };
        if let Some(caps) = SOFTWARE_BUILD.captures(extra.trim()) {
            attributes.insert("software_version".to_string(), caps["software_version"].to_string());
            if !caps["date_extra"].is_empty() {
                attributes.insert("date_extra".to_string(), caps["date_extra"].to_string());
            }
        }

        let rendered: Vec<String> = attributes
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();
        history.push(format!(
            "{} - {}: {}",
            date.format(ISO_FORMAT),
            step,
            rendered.join(", ")
        ));
    }
    history.sort();
    history
}

/// Start of the cast, e.g. `Jun 23 2016 13:51:30 [Instrument's time stamp, header]`
fn start_time(metadata: &Metadata) -> Option<NaiveDateTime> {
    let text = metadata.get_text("start_time")?;
    let date = text.split('[').next().unwrap_or(text).trim();
    NaiveDateTime::parse_from_str(date, SEABIRD_DATE_FORMAT).ok()
}

fn cnv_time_source(columns: &[ColumnDescriptor], metadata: &Metadata) -> TimeSource {
    let find = |name: &str| {
        columns
            .iter()
            .find(|column| column.original_name == name)
            .map(|column| column.original_name.clone())
    };
    let start = start_time(metadata);

    if let Some(column) = find("timeY") {
        return TimeSource::EpochSeconds { column };
    }
    if let (Some(column), Some(start)) = (find("timeS"), start) {
        return TimeSource::ElapsedSeconds { column, start };
    }
    if let (Some(column), Some(start)) = (find("timeJ"), start) {
        return TimeSource::JulianDay {
            column,
            year: start.year(),
        };
    }
    TimeSource::None
}

/// Serial from the `SERIAL NO.` line, else `* Temperature SN = ...`, else
/// the first `SerialNumber` of the embedded configuration XML
fn instrument_serial(metadata: &Metadata) -> Option<String> {
    if metadata.contains_key("instrument_sn") {
        return None;
    }
    metadata
        .get_text("temperature_sn")
        .or_else(|| {
            ["instrument_xml", "data_xml"].iter().find_map(|section| {
                metadata
                    .get(section)
                    .and_then(MetaValue::as_map)
                    .and_then(|xml| xml.find_text("SerialNumber"))
            })
        })
        .map(|serial| serial.trim().to_string())
        .filter(|serial| !serial.is_empty())
}

fn finish(mut ctx: SeabirdContext, body: BodySpec) -> ParsedHeader {
    if let Some(serial) = instrument_serial(&ctx.metadata) {
        ctx.metadata.insert("instrument_sn", serial);
    }
    let mut header = ParsedHeader::new(body);
    header.history = processing_history(&ctx.metadata, &mut header.warnings);
    header.warnings.extend(ctx.warnings);
    header.bad_flag = ctx
        .metadata
        .get_text("bad_flag")
        .and_then(|flag| flag.trim().parse().ok());
    header.metadata = ctx.metadata;
    header
}

pub fn probe_cnv(head: &[String]) -> Probe {
    if !starts_with_star(head) {
        return Probe::no_match("first line does not start with '*'");
    }
    if is_bottle_file(head) {
        return Probe::no_match("bottle summary header");
    }
    let declares_variables = head.iter().any(|line| {
        line.starts_with("# name ") || line.starts_with("# nquan") || line.starts_with("# nvalues")
    });
    if declares_variables {
        Probe::Match
    } else {
        Probe::no_match("no '# name', '# nquan' or '# nvalues' line")
    }
}

pub fn probe_btl(head: &[String]) -> Probe {
    if !starts_with_star(head) {
        return Probe::no_match("first line does not start with '*'");
    }
    if is_bottle_file(head) {
        Probe::Match
    } else {
        Probe::no_match("no bottlesum step or Bottle column header")
    }
}

fn starts_with_star(head: &[String]) -> bool {
    head.first().is_some_and(|line| line.starts_with('*'))
}

fn is_bottle_file(head: &[String]) -> bool {
    head.iter()
        .any(|line| line.contains("bottlesum") || line.trim_start().starts_with("Bottle "))
}

pub fn parse_cnv_header<R: BufRead>(lines: &mut LineReader<R>, path: &Path) -> Result<HeaderParse> {
    let mut ctx = read_header(lines, path)?;
    if ctx.variables.is_empty() {
        return Err(OceanError::header_field_missing(path, "# name"));
    }

    let columns: Vec<ColumnDescriptor> = std::mem::take(&mut ctx.variables).into_values().collect();
    let mut body = BodySpec::new(Layout::Whitespace);
    if let Some(count) = ctx
        .metadata
        .get_text("nvalues")
        .and_then(|n| n.trim().parse::<usize>().ok())
    {
        body = body.with_declared_rows(count, RowCountPolicy::Tolerant);
    }

    let time = cnv_time_source(&columns, &ctx.metadata);
    let mut header = finish(ctx, body);
    header.time = time;
    header.columns = columns;
    Ok(HeaderParse::Parsed(Box::new(header)))
}

pub fn parse_btl_header<R: BufRead>(lines: &mut LineReader<R>, path: &Path) -> Result<HeaderParse> {
    let ctx = read_header(lines, path)?;
    let columns = btl::read_column_header(lines, path)?;
    let variables = columns.len().saturating_sub(btl::LAYOUT_COLUMNS);

    let mut header = finish(ctx, BodySpec::new(btl::body_layout(variables)));
    header.time = TimeSource::Text {
        column: crate::constants::TIME_VARIABLE.to_string(),
    };
    header.columns = columns;
    Ok(HeaderParse::Parsed(Box::new(header)))
}
