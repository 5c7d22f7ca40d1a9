//! Van Essen Diver-Office MON files.
//!
//! Bracketed sections of `key = value` lines up to `[Data]`, a bare record
//! count, whitespace aligned rows and an `END OF DATA FILE` trailer.
//! Channel sections (`[Channel 1]`, `[Channel 1 from data header]`) are
//! merged by channel number; the first value seen for a key is kept.

use super::{HeaderParse, ParsedHeader, Probe};
use crate::body::{BodySpec, Layout, RowCountPolicy};
use crate::constants::{MON_END_SENTINEL, MON_HEADER_END, TIME_VARIABLE};
use crate::error::{OceanError, Result};
use crate::header::{
    LineKind, LineReader, RawHeaderLine, Rule, TokenizerRules, classify_line, dispatch,
    is_key_value, is_section,
};
use crate::models::{ColumnDescriptor, MetaValue, Metadata, TimezoneHint};
use crate::schema::TimeSource;
use crate::units::find_utc_offset;
use regex::Regex;
use std::io::BufRead;
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;

static CHANNEL_SECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Channel\s+(?P<id>\d+)").unwrap());
static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?$").unwrap());

const CHANNEL: &str = "Channel";
/// Section holding the key/value lines found before the first section
const PREAMBLE: &str = "header_info";

/// Where the next key/value line is stored
#[derive(Debug, Clone, PartialEq)]
enum Target {
    Section(String),
    Channel(String),
}

struct MonContext {
    metadata: Metadata,
    target: Target,
}

impl Default for MonContext {
    fn default() -> Self {
        Self {
            metadata: Metadata::new(),
            target: Target::Section(PREAMBLE.to_string()),
        }
    }
}

const RULES: &[Rule<MonContext>] = &[
    Rule {
        label: "section",
        matches: is_section,
        handle: section,
    },
    Rule {
        label: "key value",
        matches: is_key_value,
        handle: key_value,
    },
];

fn section(ctx: &mut MonContext, line: &RawHeaderLine) -> Result<()> {
    if let LineKind::Section(name) = &line.kind {
        ctx.target = match CHANNEL_SECTION.captures(name) {
            Some(caps) => Target::Channel(caps["id"].to_string()),
            None => Target::Section(name.clone()),
        };
    }
    Ok(())
}

fn key_value(ctx: &mut MonContext, line: &RawHeaderLine) -> Result<()> {
    let Some((key, value)) = line.kind.key_value() else {
        return Ok(());
    };
    match &ctx.target {
        Target::Channel(id) => {
            let channel = ctx.metadata.map_mut(CHANNEL).map_mut(id);
            channel.insert_derived(key, value);
        }
        Target::Section(name) => ctx.metadata.map_mut(name).insert(key, value),
    }
    Ok(())
}

pub fn probe(head: &[String]) -> Probe {
    let has_section = |name: &str| head.iter().any(|line| line.trim() == name);
    if has_section(MON_HEADER_END) || has_section("[Logger settings]") || has_section("[Series settings]") {
        Probe::Match
    } else {
        Probe::no_match("no [Logger settings], [Series settings] or [Data] section")
    }
}

/// Unit token at the end of a `Range`/`Reference level` value, e.g. `1000 cmH2O`
fn trailing_unit(value: &str) -> Option<String> {
    value
        .split_whitespace()
        .rev()
        .find(|token| !NUMBER.is_match(token))
        .map(str::to_string)
}

fn channel_unit(channel: &Metadata) -> Option<String> {
    ["Range", "Reference level"]
        .into_iter()
        .filter_map(|key| channel.get_text(key))
        .find_map(trailing_unit)
}

fn logger_setting<'a>(metadata: &'a Metadata, key: &str) -> Option<&'a str> {
    metadata
        .get_path(&["Logger settings", key])
        .and_then(MetaValue::as_text)
}

pub fn parse_header<R: BufRead>(lines: &mut LineReader<R>, path: &Path) -> Result<HeaderParse> {
    let mut ctx = MonContext::default();
    let rules = TokenizerRules::default();

    loop {
        let Some(text) = lines.next_line()? else {
            return Err(OceanError::header_field_missing(path, MON_HEADER_END));
        };
        if text.trim() == MON_HEADER_END {
            break;
        }
        let line = classify_line(lines.line_number(), &text, rules);
        dispatch(RULES, &mut ctx, &line)?;
    }

    let n_records = loop {
        match lines.next_line()? {
            Some(text) if text.trim().is_empty() => continue,
            Some(text) => match text.trim().parse::<usize>() {
                Ok(count) => break count,
                Err(_) => return Err(OceanError::header_field_missing(path, "n_records")),
            },
            None => return Err(OceanError::header_field_missing(path, "n_records")),
        }
    };

    let mut columns = vec![ColumnDescriptor::raw(TIME_VARIABLE)];
    if let Some(channels) = ctx.metadata.get(CHANNEL).and_then(MetaValue::as_map) {
        let mut ordered: Vec<(&String, &MetaValue)> = channels.iter().collect();
        ordered.sort_by_key(|(id, _)| id.parse::<u32>().unwrap_or(u32::MAX));
        for (id, channel) in ordered {
            let channel = channel.as_map().cloned().unwrap_or_default();
            let Some(identification) = channel.get_text("Identification") else {
                return Err(OceanError::header_field_missing(
                    path,
                    format!("Channel {} Identification", id),
                ));
            };
            columns.push(ColumnDescriptor::raw(identification).with_unit(channel_unit(&channel)));
        }
    }

    let body = BodySpec::new(Layout::MultiSpace)
        .with_declared_rows(n_records, RowCountPolicy::Tolerant)
        .with_sentinel(MON_END_SENTINEL);
    let mut header = ParsedHeader::new(body);

    if let Some(text) = ctx
        .metadata
        .get_path(&["Series settings", "Instrument number"])
        .and_then(MetaValue::as_text)
    {
        if let Some(offset) = find_utc_offset(text) {
            header.timezone = Some(TimezoneHint {
                offset,
                source_text: text.to_string(),
            });
        }
    }

    if let Some(kind) = logger_setting(&ctx.metadata, "Instrument type") {
        header.metadata.insert("instrument_model", kind.trim());
    }
    if let Some(serial) = logger_setting(&ctx.metadata, "Serial number")
        .and_then(|serial| serial.trim_start_matches('.').split_whitespace().next())
    {
        header.metadata.insert("instrument_sn", serial);
    }
    header.metadata.insert("n_records", n_records as i64);
    header.metadata.merge(ctx.metadata);

    header.time = TimeSource::Text {
        column: TIME_VARIABLE.to_string(),
    };
    debug!(
        "MON header with {} channels and {} records in {}",
        columns.len() - 1,
        n_records,
        path.display()
    );
    header.columns = columns;
    Ok(HeaderParse::Parsed(Box::new(header)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const HEADER: &str = concat!(
        "Data file for DataLogger.\n",
        "==============================================================================\n",
        "COMPANY    : Hakai\n",
        "\n",
        "[Logger settings]\n",
        "  Instrument type    =CTD-Diver\n",
        "  Serial number      =..02-X1234      129.\n",
        "[Channel 1]\n",
        "  Identification     =PRESSURE\n",
        "  Reference level    =     0.000 cmH2O\n",
        "  Range              =  1000 cmH2O\n",
        "[Channel 2]\n",
        "  Identification     =TEMPERATURE\n",
        "  Range              =   100 °C\n",
        "[Series settings]\n",
        "  Instrument number  =UTC-8\n",
        "[Channel 2 from data header]\n",
        "  Identification     =TEMP (FROM DATA)\n",
        "[Data]\n",
        "      2\n",
    );

    fn parse(text: &str) -> Result<ParsedHeader> {
        let mut lines = LineReader::new(Cursor::new(text.to_string()));
        match parse_header(&mut lines, Path::new("X1234.MON"))? {
            HeaderParse::Parsed(header) => Ok(*header),
            HeaderParse::NotApplicable(warning) => panic!("unexpected {:?}", warning),
        }
    }

    #[test]
    fn test_channels_regroup_first_value_wins() {
        let header = parse(HEADER).unwrap();

        let names: Vec<&str> = header
            .columns
            .iter()
            .map(|c| c.original_name.as_str())
            .collect();
        assert_eq!(names, vec!["time", "PRESSURE", "TEMPERATURE"]);
        assert_eq!(header.columns[1].unit.as_deref(), Some("cmH2O"));
        assert_eq!(header.columns[2].unit.as_deref(), Some("°C"));
        assert_eq!(
            header
                .metadata
                .get_path(&["header_info", "COMPANY"])
                .and_then(MetaValue::as_text),
            Some("Hakai")
        );
    }

    #[test]
    fn test_logger_settings_and_timezone() {
        let header = parse(HEADER).unwrap();

        assert_eq!(header.metadata.get_text("instrument_model"), Some("CTD-Diver"));
        assert_eq!(header.metadata.get_text("instrument_sn"), Some("02-X1234"));
        assert_eq!(header.metadata.get("n_records"), Some(&MetaValue::Integer(2)));
        assert_eq!(header.body.declared_rows, Some(2));
        assert_eq!(header.body.sentinel.as_deref(), Some(MON_END_SENTINEL));
        let hint = header.timezone.unwrap();
        assert_eq!(hint.offset.local_minus_utc(), -8 * 3600);
        assert_eq!(hint.source_text, "UTC-8");
    }

    #[test]
    fn test_serial_like_instrument_number_is_not_a_timezone() {
        let text = HEADER.replace("=UTC-8\n", "=..02-12345\n");
        let header = parse(&text).unwrap();

        assert!(header.timezone.is_none());
        assert_eq!(
            header
                .metadata
                .get_path(&["Series settings", "Instrument number"])
                .and_then(MetaValue::as_text),
            Some("..02-12345")
        );
    }

    #[test]
    fn test_missing_identification() {
        let text = HEADER.replace("  Identification     =PRESSURE\n", "");
        match parse(&text).unwrap_err() {
            OceanError::HeaderFieldMissing { field, .. } => {
                assert_eq!(field, "Channel 1 Identification")
            }
            other => panic!("Expected HeaderFieldMissing error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_record_count() {
        let text = HEADER.replace("      2\n", "2019/05/01 12:00:00.0     1012.345\n");
        match parse(&text).unwrap_err() {
            OceanError::HeaderFieldMissing { field, .. } => assert_eq!(field, "n_records"),
            other => panic!("Expected HeaderFieldMissing error, got {:?}", other),
        }
    }
}
