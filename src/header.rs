//! Header tokenizing shared by all format parsers.
//!
//! Reads raw header lines in file order, classifies each line by its
//! syntactic pattern and dispatches it through a per-format grammar table.
//! Lines that match no rule are logged and skipped, never fatal.

use crate::error::Result;
use regex::Regex;
use std::io::BufRead;
use std::sync::LazyLock;
use tracing::{debug, warn};

static SECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\[(?P<name>[^\]]+)\]\s*$").unwrap());
static INDEXED_KEY_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?P<key>[^\[=:]+?)\[(?P<index>\d+)\]\.(?P<subkey>[^=:]+?)\s*[:=]\s*(?P<value>.*?)\s*$")
        .unwrap()
});
static KEY_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?P<key>[^=:]*[^=:\s])\s*[:=]\s*(?P<value>.*?)\s*$").unwrap()
});
static SEPARATOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*(=+|-+)?\s*$").unwrap());

/// Leading marker of a Sea-Bird header line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// `**` user comment
    DoubleStar,
    /// `*` instrument/software line
    Star,
    /// `#` processing line
    Hash,
}

/// Syntactic class of a header line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    Section(String),
    IndexedKeyValue {
        key: String,
        index: String,
        subkey: String,
        value: String,
    },
    KeyValue {
        key: String,
        value: String,
    },
    Prefixed {
        marker: Marker,
        content: String,
    },
    /// Blank or separator line
    Comment,
    Unknown,
}

impl LineKind {
    /// Key and value of a plain key/value line
    pub fn key_value(&self) -> Option<(&str, &str)> {
        match self {
            LineKind::KeyValue { key, value } => Some((key, value)),
            _ => None,
        }
    }
}

/// A classified header line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawHeaderLine {
    /// 1-based line number in the source
    pub number: usize,
    pub text: String,
    pub kind: LineKind,
}

/// Which optional patterns a format enables
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenizerRules {
    /// Recognize `**`, `*` and `#` prefixed Sea-Bird lines first
    pub prefixed: bool,
}

/// Classify a line. Patterns are tried in priority order.
pub fn classify_line(number: usize, text: &str, rules: TokenizerRules) -> RawHeaderLine {
    let kind = if rules.prefixed {
        classify_prefixed(text).unwrap_or_else(|| classify_plain(text))
    } else {
        classify_plain(text)
    };

    RawHeaderLine {
        number,
        text: text.to_string(),
        kind,
    }
}

fn classify_prefixed(text: &str) -> Option<LineKind> {
    let (marker, rest) = if let Some(rest) = text.strip_prefix("**") {
        (Marker::DoubleStar, rest)
    } else if let Some(rest) = text.strip_prefix('*') {
        (Marker::Star, rest)
    } else if let Some(rest) = text.strip_prefix('#') {
        (Marker::Hash, rest)
    } else {
        return None;
    };

    Some(LineKind::Prefixed {
        marker,
        content: rest.trim().to_string(),
    })
}

fn classify_plain(text: &str) -> LineKind {
    if let Some(caps) = SECTION.captures(text) {
        return LineKind::Section(caps["name"].trim().to_string());
    }
    if let Some(caps) = INDEXED_KEY_VALUE.captures(text) {
        return LineKind::IndexedKeyValue {
            key: caps["key"].trim().to_string(),
            index: caps["index"].to_string(),
            subkey: caps["subkey"].trim().to_string(),
            value: caps["value"].to_string(),
        };
    }
    if let Some(caps) = KEY_VALUE.captures(text) {
        return LineKind::KeyValue {
            key: caps["key"].trim().to_string(),
            value: caps["value"].to_string(),
        };
    }
    if SEPARATOR.is_match(text) {
        return LineKind::Comment;
    }
    LineKind::Unknown
}

/// Line reader with one-way push back and lossy decoding
///
/// Source files come from instrument software of varying age; invalid
/// UTF-8 (e.g. latin-1 degree signs) is replaced instead of failing.
pub struct LineReader<R> {
    inner: R,
    pushed_back: Vec<String>,
    line_number: usize,
    buffer: Vec<u8>,
}

impl<R: BufRead> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pushed_back: Vec::new(),
            line_number: 0,
            buffer: Vec::new(),
        }
    }

    /// Next line without its terminator, `None` at end of input
    pub fn next_line(&mut self) -> Result<Option<String>> {
        if let Some(line) = self.pushed_back.pop() {
            self.line_number += 1;
            return Ok(Some(line));
        }

        self.buffer.clear();
        let read = self.inner.read_until(b'\n', &mut self.buffer)?;
        if read == 0 {
            return Ok(None);
        }

        self.line_number += 1;
        let mut line = String::from_utf8_lossy(&self.buffer).into_owned();
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        if self.line_number == 1 {
            if let Some(stripped) = line.strip_prefix('\u{feff}') {
                line = stripped.to_string();
            }
        }
        Ok(Some(line))
    }

    /// Return a line so the next call yields it again
    pub fn push_back(&mut self, line: String) {
        self.line_number -= 1;
        self.pushed_back.push(line);
    }

    /// Number of lines consumed so far
    pub fn line_number(&self) -> usize {
        self.line_number
    }

    /// Read and classify the next line
    pub fn next_classified(&mut self, rules: TokenizerRules) -> Result<Option<RawHeaderLine>> {
        Ok(self
            .next_line()?
            .map(|line| classify_line(self.line_number, &line, rules)))
    }
}

/// Read up to `limit` lines for signature probing
pub fn read_head<R: BufRead>(reader: R, limit: usize) -> Result<Vec<String>> {
    let mut lines = LineReader::new(reader);
    let mut head = Vec::new();
    while head.len() < limit {
        match lines.next_line()? {
            Some(line) => head.push(line),
            None => break,
        }
    }
    Ok(head)
}

/// Handler invoked for a line matched by a grammar rule
pub type Handler<C> = fn(&mut C, &RawHeaderLine) -> Result<()>;

/// One entry of a format grammar table
pub struct Rule<C> {
    pub label: &'static str,
    pub matches: fn(&RawHeaderLine) -> bool,
    pub handle: Handler<C>,
}

/// Apply the first matching rule; unmatched lines are logged and skipped.
///
/// Returns whether a rule handled the line.
pub fn dispatch<C>(rules: &[Rule<C>], context: &mut C, line: &RawHeaderLine) -> Result<bool> {
    for rule in rules {
        if (rule.matches)(line) {
            debug!("line {} handled by rule '{}'", line.number, rule.label);
            (rule.handle)(context, line)?;
            return Ok(true);
        }
    }

    match line.kind {
        LineKind::Comment => {}
        _ => warn!("Ignored header line {}: {}", line.number, line.text),
    }
    Ok(false)
}

pub fn is_section(line: &RawHeaderLine) -> bool {
    matches!(line.kind, LineKind::Section(_))
}

pub fn is_key_value(line: &RawHeaderLine) -> bool {
    matches!(line.kind, LineKind::KeyValue { .. })
}

pub fn is_indexed_key_value(line: &RawHeaderLine) -> bool {
    matches!(line.kind, LineKind::IndexedKeyValue { .. })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn plain(text: &str) -> LineKind {
        classify_line(1, text, TokenizerRules::default()).kind
    }

    #[test]
    fn test_classify_section() {
        assert_eq!(
            plain("[Channel 1 from data header]"),
            LineKind::Section("Channel 1 from data header".to_string())
        );
    }

    #[test]
    fn test_classify_indexed_key_value() {
        assert_eq!(
            plain("Sensor[0].Model = X"),
            LineKind::IndexedKeyValue {
                key: "Sensor".to_string(),
                index: "0".to_string(),
                subkey: "Model".to_string(),
                value: "X".to_string(),
            }
        );
    }

    #[test]
    fn test_classify_key_value_variants() {
        assert_eq!(
            plain("  Instrument type    =CTD-Diver"),
            LineKind::KeyValue {
                key: "Instrument type".to_string(),
                value: "CTD-Diver".to_string(),
            }
        );
        assert_eq!(
            plain("COMPANY    : Hakai"),
            LineKind::KeyValue {
                key: "COMPANY".to_string(),
                value: "Hakai".to_string(),
            }
        );
        // Only the first separator splits
        assert_eq!(
            plain("TIME       : 12:00:00"),
            LineKind::KeyValue {
                key: "TIME".to_string(),
                value: "12:00:00".to_string(),
            }
        );
    }

    #[test]
    fn test_classify_comment_and_unknown() {
        assert_eq!(plain(""), LineKind::Comment);
        assert_eq!(plain("=========================="), LineKind::Comment);
        assert_eq!(plain("Data file for DataLogger."), LineKind::Unknown);
    }

    #[test]
    fn test_prefixed_lines_take_priority_in_seabird_mode() {
        let rules = TokenizerRules { prefixed: true };
        assert_eq!(
            classify_line(1, "* FileName = C:\\cast.hex", rules).kind,
            LineKind::Prefixed {
                marker: Marker::Star,
                content: "FileName = C:\\cast.hex".to_string(),
            }
        );
        assert_eq!(
            classify_line(2, "** Station: QU39", rules).kind,
            LineKind::Prefixed {
                marker: Marker::DoubleStar,
                content: "Station: QU39".to_string(),
            }
        );
        assert_eq!(
            classify_line(3, "# nquan = 4", rules).kind,
            LineKind::Prefixed {
                marker: Marker::Hash,
                content: "nquan = 4".to_string(),
            }
        );
    }

    #[test]
    fn test_line_reader_push_back_and_bom() {
        let data = "\u{feff}first\r\nsecond\nthird";
        let mut reader = LineReader::new(Cursor::new(data));

        assert_eq!(reader.next_line().unwrap().as_deref(), Some("first"));
        let second = reader.next_line().unwrap().unwrap();
        assert_eq!(second, "second");
        assert_eq!(reader.line_number(), 2);

        reader.push_back(second);
        assert_eq!(reader.line_number(), 1);
        assert_eq!(reader.next_line().unwrap().as_deref(), Some("second"));
        assert_eq!(reader.next_line().unwrap().as_deref(), Some("third"));
        assert_eq!(reader.next_line().unwrap(), None);
    }

    #[test]
    fn test_line_reader_lossy_decoding() {
        let data: &[u8] = b"Temp, \xb0F\n";
        let mut reader = LineReader::new(Cursor::new(data));
        let line = reader.next_line().unwrap().unwrap();
        assert!(line.starts_with("Temp, "));
        assert!(line.ends_with('F'));
    }

    #[derive(Default)]
    struct Counter {
        sections: usize,
        values: usize,
    }

    const RULES: &[Rule<Counter>] = &[
        Rule {
            label: "section",
            matches: is_section,
            handle: |ctx, _| {
                ctx.sections += 1;
                Ok(())
            },
        },
        Rule {
            label: "value",
            matches: is_key_value,
            handle: |ctx, _| {
                ctx.values += 1;
                Ok(())
            },
        },
    ];

    #[test]
    fn test_dispatch_uses_first_matching_rule() {
        let mut ctx = Counter::default();
        let rules = TokenizerRules::default();

        assert!(dispatch(RULES, &mut ctx, &classify_line(1, "[Logger settings]", rules)).unwrap());
        assert!(dispatch(RULES, &mut ctx, &classify_line(2, "Status = Started", rules)).unwrap());
        assert!(!dispatch(RULES, &mut ctx, &classify_line(3, "free text", rules)).unwrap());

        assert_eq!(ctx.sections, 1);
        assert_eq!(ctx.values, 1);
    }

    #[test]
    fn test_read_head_limits_lines() {
        let head = read_head(Cursor::new("a\nb\nc\nd\n"), 2).unwrap();
        assert_eq!(head, vec!["a".to_string(), "b".to_string()]);
    }
}
