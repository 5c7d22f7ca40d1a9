//! Sea-Bird bottle summary tables.
//!
//! Each bottle spans several fixed-width rows, one per statistic:
//!
//! ```text
//!     Bottle        Date       PrDM      T090C
//!   Position        Time
//!          1 Jun 23 2016     10.123     9.8765 (avg)
//!               13:51:30      0.011     0.0012 (sdev)
//! ```
//!
//! The `(avg)` row carries the date, the `(sdev)` row the time of day.

use crate::body::{Layout, Row};
use crate::constants::TIME_VARIABLE;
use crate::constants::bottle_layout::{BOTTLE_WIDTH, DATE_WIDTH, VARIABLES_OFFSET, VARIABLE_WIDTH};
use crate::error::{OceanError, Result};
use crate::header::LineReader;
use crate::models::{ColumnDescriptor, Metadata};
use regex::Regex;
use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;

static STATISTIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\((?P<stat>[^)]*)\)").unwrap());

/// Bottle, date and statistic columns around the variables
pub const LAYOUT_COLUMNS: usize = 3;

const AVERAGE: &str = "avg";
const TIME_OF_DAY: &str = "sdev";

/// Number of scans averaged into each bottle, from `datcnv_scans_per_bottle`
pub fn scans_per_bottle(metadata: &Metadata) -> Option<u32> {
    metadata
        .get_text("datcnv_scans_per_bottle")
        .and_then(|text| text.trim().parse().ok())
}

/// `scan: mean (previous 24 scans)` for the averaged bottle statistic
fn cell_method(stat: &str, scans: Option<u32>) -> Option<String> {
    let method = match stat {
        AVERAGE => "mean",
        "sdev" => "standard_deviation",
        "min" => "minimum",
        "max" => "maximum",
        _ => return None,
    };
    Some(match scans {
        Some(scans) => format!("scan: {} (previous {} scans)", method, scans),
        None => format!("scan: {}", method),
    })
}

fn with_cell_method(mut column: ColumnDescriptor, stat: &str, scans: Option<u32>) -> ColumnDescriptor {
    if let Some(method) = cell_method(stat, scans) {
        column.attributes.insert("cell_method", method);
    }
    column
}

/// `T090C` -> `t090C`
fn lower_first(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Read the `Bottle ... Date ...` column header and its `Position Time` line
pub fn read_column_header<R: BufRead>(
    lines: &mut LineReader<R>,
    path: &Path,
) -> Result<Vec<ColumnDescriptor>> {
    let header = loop {
        match lines.next_line()? {
            Some(text) if text.trim().is_empty() => continue,
            Some(text) if text.trim_start().starts_with("Bottle") => break text,
            _ => return Err(OceanError::header_field_missing(path, "Bottle")),
        }
    };

    let chars: Vec<char> = header.chars().collect();
    let variables: Vec<String> = chars
        .get(VARIABLES_OFFSET..)
        .unwrap_or_default()
        .chunks(VARIABLE_WIDTH)
        .map(|chunk| chunk.iter().collect::<String>().trim().to_string())
        .filter(|name| !name.is_empty())
        .collect();

    if let Some(next) = lines.next_line()? {
        if !next.trim_start().starts_with("Position") {
            lines.push_back(next);
        }
    }

    debug!("Bottle file variables: {}", variables.join(", "));
    let mut columns = vec![ColumnDescriptor::raw("bottle"), ColumnDescriptor::raw("date")];
    columns.extend(variables.iter().map(|name| ColumnDescriptor::raw(lower_first(name))));
    columns.push(ColumnDescriptor::raw("stats"));
    Ok(columns)
}

/// Fixed-width layout for `variables` variable columns; the statistic
/// label takes the rest of the line.
pub fn body_layout(variables: usize) -> Layout {
    let mut widths = vec![BOTTLE_WIDTH, DATE_WIDTH];
    widths.extend(std::iter::repeat_n(VARIABLE_WIDTH, variables));
    Layout::FixedWidth(widths)
}

#[derive(Default)]
struct Bottle {
    number: Option<String>,
    date: Option<String>,
    time: Option<String>,
    /// Variable values by statistic name
    statistics: BTreeMap<String, Vec<Option<String>>>,
}

impl Bottle {
    fn timestamp(&self) -> Option<String> {
        match (&self.date, &self.time) {
            (Some(date), Some(time)) => Some(format!("{} {}", date, time)),
            (Some(date), None) => Some(date.clone()),
            _ => None,
        }
    }
}

/// Regroup per-statistic rows into one row per bottle.
///
/// Average values keep the variable name; every other statistic becomes
/// `<variable>_<stat>`. The output columns are `bottle`, `time`, the
/// variables, then the statistic columns in order of first appearance.
/// Each variable column carries a `cell_method` naming its statistic.
pub fn regroup_statistics(
    columns: Vec<ColumnDescriptor>,
    rows: Vec<Row>,
    scans: Option<u32>,
) -> (Vec<ColumnDescriptor>, Vec<Row>) {
    if columns.len() < LAYOUT_COLUMNS {
        return (columns, rows);
    }
    let stats_index = columns.len() - 1;
    let variables: Vec<ColumnDescriptor> = columns[2..stats_index].to_vec();

    let mut bottles: Vec<Bottle> = Vec::new();
    let mut statistic_names: Vec<String> = Vec::new();
    for row in rows {
        let Some(stat) = row[stats_index]
            .as_deref()
            .and_then(|label| STATISTIC.captures(label))
            .map(|caps| caps["stat"].trim().to_string())
        else {
            debug!("Skipped bottle row without statistic: {:?}", row);
            continue;
        };

        if row[0].is_some() || bottles.is_empty() {
            bottles.push(Bottle {
                number: row[0].clone(),
                ..Bottle::default()
            });
        }
        let Some(bottle) = bottles.last_mut() else {
            continue;
        };

        if stat == AVERAGE {
            bottle.date = row[1].clone();
        } else {
            if stat == TIME_OF_DAY {
                bottle.time = row[1].clone();
            }
            if !statistic_names.contains(&stat) {
                statistic_names.push(stat.clone());
            }
        }
        bottle
            .statistics
            .insert(stat, row[2..stats_index].to_vec());
    }

    let mut regrouped = vec![
        ColumnDescriptor::raw("bottle"),
        ColumnDescriptor::raw(TIME_VARIABLE),
    ];
    regrouped.extend(
        variables
            .iter()
            .map(|variable| with_cell_method(variable.clone(), AVERAGE, scans)),
    );
    for stat in &statistic_names {
        regrouped.extend(variables.iter().map(|variable| {
            let mut column = ColumnDescriptor::raw(format!("{}_{}", variable.original_name, stat))
                .with_unit(variable.unit.clone());
            column.attributes = variable.attributes.clone();
            with_cell_method(column, stat, scans)
        }));
    }

    let empty = vec![None; variables.len()];
    let rows = bottles
        .iter()
        .map(|bottle| {
            let mut row: Row = vec![bottle.number.clone(), bottle.timestamp()];
            row.extend(
                bottle
                    .statistics
                    .get(AVERAGE)
                    .unwrap_or(&empty)
                    .iter()
                    .cloned(),
            );
            for stat in &statistic_names {
                row.extend(bottle.statistics.get(stat).unwrap_or(&empty).iter().cloned());
            }
            row
        })
        .collect();

    (regrouped, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::{BodySpec, read_body};
    use std::io::Cursor;

    fn bottle_line(cells: [&str; 4], stat: &str) -> String {
        format!(
            "{:>10}{:>12}{:>11}{:>11} ({})\n",
            cells[0], cells[1], cells[2], cells[3], stat
        )
    }

    fn sample() -> String {
        let mut text = format!("{:>10}{:>12}{:>11}{:>11}\n", "Bottle", "Date", "PrDM", "T090C");
        text.push_str(&format!("{:>10}{:>12}\n", "Position", "Time"));
        text.push_str(&bottle_line(["1", "Jun 23 2016", "10.123", "9.8765"], "avg"));
        text.push_str(&bottle_line(["", "13:51:30", "0.011", "0.0012"], "sdev"));
        text.push_str(&bottle_line(["2", "Jun 23 2016", "5.001", "10.2000"], "avg"));
        text.push_str(&bottle_line(["", "13:55:02", "0.020", "0.0030"], "sdev"));
        text
    }

    #[test]
    fn test_column_header() {
        let mut lines = LineReader::new(Cursor::new(sample()));
        let columns = read_column_header(&mut lines, Path::new("cast.btl")).unwrap();

        let names: Vec<&str> = columns.iter().map(|c| c.original_name.as_str()).collect();
        assert_eq!(names, vec!["bottle", "date", "prDM", "t090C", "stats"]);
        assert!(lines.next_line().unwrap().unwrap().ends_with("(avg)"));
    }

    #[test]
    fn test_missing_bottle_header() {
        let mut lines = LineReader::new(Cursor::new("  1.0  2.0\n".to_string()));
        match read_column_header(&mut lines, Path::new("cast.btl")).unwrap_err() {
            OceanError::HeaderFieldMissing { field, .. } => assert_eq!(field, "Bottle"),
            other => panic!("Expected HeaderFieldMissing error, got {:?}", other),
        }
    }

    #[test]
    fn test_regroup_average_and_sdev() {
        let path = Path::new("cast.btl");
        let mut lines = LineReader::new(Cursor::new(sample()));
        let columns = read_column_header(&mut lines, path).unwrap();
        let spec = BodySpec::new(body_layout(2));
        let body = read_body(&mut lines, &spec, columns.len(), path).unwrap();
        assert_eq!(body.rows.len(), 4);

        let (columns, rows) = regroup_statistics(columns, body.rows, Some(24));
        let names: Vec<&str> = columns.iter().map(|c| c.original_name.as_str()).collect();
        assert_eq!(
            names,
            vec!["bottle", "time", "prDM", "t090C", "prDM_sdev", "t090C_sdev"]
        );
        let method = |index: usize| columns[index].attributes.get_text("cell_method");
        assert_eq!(method(0), None);
        assert_eq!(method(1), None);
        assert_eq!(method(2), Some("scan: mean (previous 24 scans)"));
        assert_eq!(method(5), Some("scan: standard_deviation (previous 24 scans)"));
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0],
            vec![
                Some("1".to_string()),
                Some("Jun 23 2016 13:51:30".to_string()),
                Some("10.123".to_string()),
                Some("9.8765".to_string()),
                Some("0.011".to_string()),
                Some("0.0012".to_string()),
            ]
        );
        assert_eq!(rows[1][1].as_deref(), Some("Jun 23 2016 13:55:02"));
    }

    #[test]
    fn test_scans_per_bottle() {
        let mut metadata = Metadata::new();
        assert_eq!(scans_per_bottle(&metadata), None);
        metadata.insert("datcnv_scans_per_bottle", "24");
        assert_eq!(scans_per_bottle(&metadata), Some(24));
        assert_eq!(cell_method("max", None).as_deref(), Some("scan: maximum"));
        assert_eq!(cell_method("n", Some(24)), None);
    }
}
