//! Tabular body reading and row count validation.
//!
//! The header parsers leave the line reader positioned at the first data
//! line and describe the body layout in a [`BodySpec`]. Rows are returned
//! as raw optional strings; typing happens in [`crate::schema`].

use crate::error::{OceanError, Result};
use crate::header::LineReader;
use crate::models::ParseWarning;
use regex::Regex;
use std::io::BufRead;
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;

static MULTI_SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s{2,}|\t").unwrap());

/// One raw data row, `None` for empty fields
pub type Row = Vec<Option<String>>;

/// How fields are separated within a data line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    /// Quoted delimited text (CSV)
    Delimited(u8),
    /// Any run of whitespace
    Whitespace,
    /// Two or more spaces or a tab; single spaces stay inside a field
    MultiSpace,
    /// Character widths of each field; the last field runs to the end of line
    FixedWidth(Vec<usize>),
}

/// How strictly a declared row count is enforced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowCountPolicy {
    /// Any difference is a hard error
    Exact,
    /// Differences are reported as warnings
    Tolerant,
}

/// Body description produced by a header parser
#[derive(Debug, Clone, PartialEq)]
pub struct BodySpec {
    pub layout: Layout,
    pub declared_rows: Option<usize>,
    pub policy: RowCountPolicy,
    /// Prefix of a trailing line ending the data block
    pub sentinel: Option<String>,
}

impl BodySpec {
    pub fn new(layout: Layout) -> Self {
        Self {
            layout,
            declared_rows: None,
            policy: RowCountPolicy::Tolerant,
            sentinel: None,
        }
    }

    pub fn with_declared_rows(mut self, rows: usize, policy: RowCountPolicy) -> Self {
        self.declared_rows = Some(rows);
        self.policy = policy;
        self
    }

    pub fn with_sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.sentinel = Some(sentinel.into());
        self
    }
}

/// Rows read from a body plus soft diagnostics
#[derive(Debug, Default)]
pub struct BodyRead {
    pub rows: Vec<Row>,
    pub warnings: Vec<ParseWarning>,
}

/// Read all remaining lines as data rows of `width` fields.
pub fn read_body<R: BufRead>(
    lines: &mut LineReader<R>,
    spec: &BodySpec,
    width: usize,
    path: &Path,
) -> Result<BodyRead> {
    let mut data_lines = Vec::new();
    while let Some(line) = lines.next_line()? {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(sentinel) = &spec.sentinel {
            if line.trim_start().starts_with(sentinel.as_str()) {
                debug!("Cropped sentinel line {}: {}", lines.line_number(), line.trim());
                break;
            }
        }
        data_lines.push(line);
    }

    let raw_rows = match &spec.layout {
        Layout::Delimited(delimiter) => split_delimited(&data_lines, *delimiter)?,
        Layout::Whitespace => data_lines
            .iter()
            .map(|line| line.split_whitespace().map(str::to_string).collect())
            .collect(),
        Layout::MultiSpace => data_lines
            .iter()
            .map(|line| {
                MULTI_SPACE
                    .split(line.trim())
                    .map(str::to_string)
                    .collect()
            })
            .collect(),
        Layout::FixedWidth(widths) => data_lines
            .iter()
            .map(|line| split_fixed_width(line, widths))
            .collect(),
    };

    let rows: Vec<Row> = raw_rows
        .into_iter()
        .enumerate()
        .map(|(index, fields)| fit_row(fields, width, index))
        .collect();

    let mut warnings = Vec::new();
    if let Some(expected) = spec.declared_rows {
        let found = rows.len();
        if found != expected {
            match spec.policy {
                RowCountPolicy::Exact => {
                    return Err(OceanError::RowCountMismatch {
                        path: path.to_path_buf(),
                        expected,
                        found,
                    });
                }
                RowCountPolicy::Tolerant => {
                    warnings.push(ParseWarning::RowCountMismatch { expected, found });
                }
            }
        }
    }

    debug!("Read {} data rows from {}", rows.len(), path.display());
    Ok(BodyRead { rows, warnings })
}

fn split_delimited(lines: &[String], delimiter: u8) -> Result<Vec<Vec<String>>> {
    let text = lines.join("\n");
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let mut rows = Vec::with_capacity(lines.len());
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

fn split_fixed_width(line: &str, widths: &[usize]) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    let mut fields = Vec::with_capacity(widths.len() + 1);
    let mut start = 0;
    for width in widths {
        let end = (start + width).min(chars.len());
        fields.push(chars[start..end].iter().collect::<String>().trim().to_string());
        start = end;
    }
    fields.push(chars[start..].iter().collect::<String>().trim().to_string());
    fields
}

/// Pad short rows with nulls and truncate long ones
fn fit_row(fields: Vec<String>, width: usize, index: usize) -> Row {
    if fields.len() > width {
        debug!(
            "Row {} has {} fields, expected {}; extra fields dropped",
            index + 1,
            fields.len(),
            width
        );
    }

    let mut row: Row = fields
        .into_iter()
        .take(width)
        .map(|field| (!field.is_empty()).then_some(field))
        .collect();
    row.resize(width, None);
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn read(text: &str, spec: &BodySpec, width: usize) -> Result<BodyRead> {
        let mut lines = LineReader::new(Cursor::new(text.to_string()));
        read_body(&mut lines, spec, width, Path::new("test.txt"))
    }

    #[test]
    fn test_quoted_csv_rows() {
        let spec = BodySpec::new(Layout::Delimited(b','));
        let body = read("1,\"05/01/19 12:00:00 PM\",68.0,\n2,05/01/19 12:10:00 PM,68.5,Logged\n", &spec, 4)
            .unwrap();

        assert_eq!(body.rows.len(), 2);
        assert_eq!(body.rows[0][1].as_deref(), Some("05/01/19 12:00:00 PM"));
        assert_eq!(body.rows[0][3], None);
        assert_eq!(body.rows[1][3].as_deref(), Some("Logged"));
    }

    #[test]
    fn test_multi_space_keeps_single_spaces() {
        let spec = BodySpec::new(Layout::MultiSpace);
        let body = read("2019/05/01 00:00:00.0      1034.123     10.12\n", &spec, 3).unwrap();
        assert_eq!(
            body.rows[0],
            vec![
                Some("2019/05/01 00:00:00.0".to_string()),
                Some("1034.123".to_string()),
                Some("10.12".to_string()),
            ]
        );
    }

    #[test]
    fn test_sentinel_is_cropped_silently() {
        let spec = BodySpec::new(Layout::MultiSpace)
            .with_declared_rows(2, RowCountPolicy::Tolerant)
            .with_sentinel("END OF DATA FILE");
        let body = read(
            "2019/05/01 00:00:00.0  1.0\n2019/05/01 00:05:00.0  2.0\nEND OF DATA FILE OF DATALOGGER FOR WINDOWS\n",
            &spec,
            2,
        )
        .unwrap();
        assert_eq!(body.rows.len(), 2);
        assert!(body.warnings.is_empty());
    }

    #[test]
    fn test_tolerant_shortfall_warns() {
        let spec = BodySpec::new(Layout::Whitespace).with_declared_rows(5, RowCountPolicy::Tolerant);
        let body = read("1 2\n3 4\n\n", &spec, 2).unwrap();
        assert_eq!(body.rows.len(), 2);
        assert_eq!(
            body.warnings,
            vec![ParseWarning::RowCountMismatch {
                expected: 5,
                found: 2
            }]
        );
    }

    #[test]
    fn test_exact_mismatch_is_an_error() {
        let spec = BodySpec::new(Layout::MultiSpace).with_declared_rows(5, RowCountPolicy::Exact);
        let result = read("a  1\nb  2\nc  3\n", &spec, 2);
        match result.unwrap_err() {
            OceanError::RowCountMismatch { expected, found, .. } => {
                assert_eq!(expected, 5);
                assert_eq!(found, 3);
            }
            other => panic!("Expected RowCountMismatch error, got {:?}", other),
        }
    }

    #[test]
    fn test_fixed_width_rows() {
        let spec = BodySpec::new(Layout::FixedWidth(vec![4, 6]));
        let body = read("  1 Jun 23   (avg)\n", &spec, 3).unwrap();
        assert_eq!(
            body.rows[0],
            vec![
                Some("1".to_string()),
                Some("Jun 23".to_string()),
                Some("(avg)".to_string()),
            ]
        );
    }

    #[test]
    fn test_short_rows_are_padded_and_long_rows_truncated() {
        let spec = BodySpec::new(Layout::Whitespace);
        let body = read("1\n1 2 3 4\n", &spec, 3).unwrap();
        assert_eq!(body.rows[0], vec![Some("1".to_string()), None, None]);
        assert_eq!(body.rows[1].len(), 3);
    }
}
