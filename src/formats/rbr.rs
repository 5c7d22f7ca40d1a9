//! RBR Ruskin R-Text exports.
//!
//! `key=value` and `Key[n].Subkey=value` lines up to `NumberOfSamples`,
//! then a column header separated by two or more spaces:
//!
//! ```text
//! Model=RBRsolo
//! Serial=077014
//! Channel[1].Type=temp14
//! NumberOfSamples=3
//!
//! Date & Time               Temperature
//! 2019-05-01 00:00:00.000   10.1234
//! ```

use super::{HeaderParse, ParsedHeader, Probe};
use crate::body::{BodySpec, Layout, RowCountPolicy};
use crate::constants::RBR_HEADER_END;
use crate::error::{OceanError, Result};
use crate::header::{
    LineKind, LineReader, RawHeaderLine, Rule, TokenizerRules, classify_line, dispatch,
    is_indexed_key_value, is_key_value,
};
use crate::models::{ColumnDescriptor, Metadata, TimezoneHint};
use crate::schema::TimeSource;
use crate::units::find_utc_offset;
use regex::Regex;
use std::io::BufRead;
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;

static COLUMN_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s{2,}|\t").unwrap());

#[derive(Default)]
struct RbrContext {
    metadata: Metadata,
}

const RULES: &[Rule<RbrContext>] = &[
    Rule {
        label: "indexed key value",
        matches: is_indexed_key_value,
        handle: indexed_key_value,
    },
    Rule {
        label: "key value",
        matches: is_key_value,
        handle: key_value,
    },
];

fn indexed_key_value(ctx: &mut RbrContext, line: &RawHeaderLine) -> Result<()> {
    if let LineKind::IndexedKeyValue {
        key,
        index,
        subkey,
        value,
    } = &line.kind
    {
        ctx.metadata
            .map_mut(key)
            .map_mut(index)
            .insert(subkey.as_str(), value.as_str());
    }
    Ok(())
}

fn key_value(ctx: &mut RbrContext, line: &RawHeaderLine) -> Result<()> {
    if let Some((key, value)) = line.kind.key_value() {
        ctx.metadata.insert(key, value);
    }
    Ok(())
}

fn is_header_end(text: &str) -> bool {
    text.trim_start().starts_with(RBR_HEADER_END)
}

pub fn probe(head: &[String]) -> Probe {
    if head.iter().any(|line| is_header_end(line)) {
        Probe::Match
    } else {
        Probe::no_match(format!("no '{}' line", RBR_HEADER_END))
    }
}

/// First header key naming a timezone or UTC offset
fn timezone_hint(metadata: &Metadata) -> Option<TimezoneHint> {
    metadata.iter().find_map(|(key, value)| {
        let key = key.to_lowercase();
        if !(key.contains("timezone") || key.contains("time zone") || key.contains("utcoffset")) {
            return None;
        }
        let text = value.as_text()?;
        find_utc_offset(text).map(|offset| TimezoneHint {
            offset,
            source_text: text.to_string(),
        })
    })
}

pub fn parse_header<R: BufRead>(lines: &mut LineReader<R>, path: &Path) -> Result<HeaderParse> {
    let mut ctx = RbrContext::default();
    let rules = TokenizerRules::default();

    let declared = loop {
        let Some(text) = lines.next_line()? else {
            return Err(OceanError::header_field_missing(path, RBR_HEADER_END));
        };
        let line = classify_line(lines.line_number(), &text, rules);
        if is_header_end(&text) {
            let count = line
                .kind
                .key_value()
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .ok_or_else(|| OceanError::header_field_missing(path, RBR_HEADER_END))?;
            ctx.metadata.insert(RBR_HEADER_END, count as i64);
            break count;
        }
        dispatch(RULES, &mut ctx, &line)?;
    };

    let column_line = loop {
        match lines.next_line()? {
            Some(text) if text.trim().is_empty() => continue,
            Some(text) => break text,
            None => return Err(OceanError::header_field_missing(path, "column header")),
        }
    };
    let names: Vec<String> = COLUMN_SEPARATOR
        .split(column_line.trim())
        .map(|name| name.trim().to_string())
        .collect();

    let body = BodySpec::new(Layout::MultiSpace).with_declared_rows(declared, RowCountPolicy::Exact);
    let mut header = ParsedHeader::new(body);
    header.timezone = timezone_hint(&ctx.metadata);

    if let Some(model) = ctx.metadata.get_text("Model").map(str::to_string) {
        header.metadata.insert("instrument_model", model);
    }
    if let Some(serial) = ctx.metadata.get("Serial").cloned() {
        header.metadata.insert("instrument_sn", serial);
    }
    header.metadata.merge(ctx.metadata);

    if let Some(time) = names
        .iter()
        .find(|name| name.contains("Time"))
        .or_else(|| names.first())
    {
        header.time = TimeSource::Text {
            column: time.clone(),
        };
    }

    debug!(
        "RBR header declares {} samples over {} columns",
        declared,
        names.len()
    );
    header.columns = names.into_iter().map(ColumnDescriptor::raw).collect();
    Ok(HeaderParse::Parsed(Box::new(header)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse(text: &str) -> ParsedHeader {
        let mut lines = LineReader::new(Cursor::new(text.to_string()));
        match parse_header(&mut lines, Path::new("rbr.txt")).unwrap() {
            HeaderParse::Parsed(header) => *header,
            HeaderParse::NotApplicable(warning) => panic!("unexpected {:?}", warning),
        }
    }

    #[test]
    fn test_indexed_keys_nest() {
        let header = parse(concat!(
            "Key1=A\n",
            "Sensor[0].Model=X\n",
            "NumberOfSamples=3\n",
            "\n",
            "Date & Time               Temperature\n",
        ));

        let json = serde_json::to_value(&header.metadata).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"Key1": "A", "Sensor": {"0": {"Model": "X"}}, "NumberOfSamples": 3})
        );
        assert_eq!(header.body.declared_rows, Some(3));
        assert_eq!(header.body.policy, RowCountPolicy::Exact);
        assert_eq!(header.columns.len(), 2);
        assert_eq!(
            header.time,
            TimeSource::Text {
                column: "Date & Time".to_string()
            }
        );
    }

    #[test]
    fn test_model_serial_and_timezone() {
        let header = parse(concat!(
            "Model=RBRsolo\n",
            "Serial=077014\n",
            "TimeZone=UTC-8\n",
            "NumberOfSamples=0\n",
            "Date & Time   Temperature\n",
        ));

        assert_eq!(header.metadata.get_text("instrument_model"), Some("RBRsolo"));
        assert_eq!(header.metadata.get_text("instrument_sn"), Some("077014"));
        assert_eq!(header.timezone.unwrap().offset.local_minus_utc(), -8 * 3600);
    }

    #[test]
    fn test_missing_sample_count() {
        let mut lines = LineReader::new(Cursor::new("Model=RBRsolo\n".to_string()));
        match parse_header(&mut lines, Path::new("rbr.txt")).unwrap_err() {
            OceanError::HeaderFieldMissing { field, .. } => assert_eq!(field, "NumberOfSamples"),
            other => panic!("Expected HeaderFieldMissing error, got {:?}", other),
        }
    }
}
