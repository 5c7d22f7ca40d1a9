//! Typed frame construction from raw body rows.
//!
//! Each raw column becomes an Int64, Float64 or String column depending on
//! its content. The time column is built first from the [`TimeSource`]
//! chosen by the header parser and stored as `Datetime(ms)`.

use crate::body::Row;
use crate::constants::TIME_VARIABLE;
use crate::error::Result;
use crate::models::{ColumnDescriptor, ParseWarning, TimeReference};
use chrono::{NaiveDate, NaiveDateTime};
use polars::prelude::*;
use tracing::debug;

/// Where the time variable comes from, referencing columns by original name
#[derive(Debug, Clone, PartialEq)]
pub enum TimeSource {
    /// Wall-clock text parsed with the configured layouts
    Text { column: String },
    /// Seconds since 1970-01-01 UTC
    EpochSeconds { column: String },
    /// Seconds elapsed since a header start time
    ElapsedSeconds { column: String, start: NaiveDateTime },
    /// Day of year, 1.0 being January 1st 00:00
    JulianDay { column: String, year: i32 },
    None,
}

impl TimeSource {
    fn column(&self) -> Option<&str> {
        match self {
            TimeSource::Text { column }
            | TimeSource::EpochSeconds { column }
            | TimeSource::ElapsedSeconds { column, .. }
            | TimeSource::JulianDay { column, .. } => Some(column),
            TimeSource::None => None,
        }
    }
}

/// Typed frame with descriptors aligned to its columns
#[derive(Debug)]
pub struct Frame {
    pub data: DataFrame,
    pub columns: Vec<ColumnDescriptor>,
    pub time_reference: TimeReference,
    pub warnings: Vec<ParseWarning>,
}

/// Parse a timestamp with the first matching layout.
///
/// `last` remembers the layout that matched previously so a column is
/// usually parsed with a single attempt per value.
pub fn parse_timestamp(
    text: &str,
    formats: &[String],
    last: &mut Option<usize>,
) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Some(index) = *last {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, &formats[index]) {
            return Some(parsed);
        }
    }

    for (index, format) in formats.iter().enumerate() {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
            *last = Some(index);
            return Some(parsed);
        }
    }
    None
}

const MS_PER_DAY: f64 = 86_400_000.0;

fn parse_float(value: &Option<String>) -> Option<f64> {
    value.as_deref().and_then(|v| v.trim().parse::<f64>().ok())
}

fn epoch_ms(seconds: f64) -> i64 {
    (seconds * 1000.0).round() as i64
}

/// Build the time column values and its reference
fn time_values(
    source: &TimeSource,
    values: &[Option<String>],
    formats: &[String],
    warnings: &mut Vec<ParseWarning>,
) -> (Vec<Option<i64>>, TimeReference) {
    match source {
        TimeSource::Text { column } => {
            let mut last = None;
            let mut failures = 0;
            let parsed = values
                .iter()
                .map(|value| {
                    let text = value.as_deref()?;
                    let parsed = parse_timestamp(text, formats, &mut last);
                    if parsed.is_none() {
                        failures += 1;
                    }
                    parsed.map(|t| t.and_utc().timestamp_millis())
                })
                .collect();
            if failures > 0 {
                warnings.push(ParseWarning::UnparsedTimestamps {
                    column: column.clone(),
                    count: failures,
                });
            }
            (parsed, TimeReference::Local)
        }
        TimeSource::EpochSeconds { .. } => (
            values.iter().map(|v| parse_float(v).map(epoch_ms)).collect(),
            TimeReference::Utc,
        ),
        TimeSource::ElapsedSeconds { start, .. } => {
            let start_ms = start.and_utc().timestamp_millis();
            (
                values
                    .iter()
                    .map(|v| parse_float(v).map(|s| start_ms + epoch_ms(s)))
                    .collect(),
                TimeReference::Local,
            )
        }
        TimeSource::JulianDay { year, .. } => {
            let origin = NaiveDate::from_ymd_opt(*year, 1, 1)
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|t| t.and_utc().timestamp_millis());
            (
                values
                    .iter()
                    .map(|v| {
                        let day = parse_float(v)?;
                        Some(origin? + (MS_PER_DAY * (day - 1.0)).round() as i64)
                    })
                    .collect(),
                TimeReference::Local,
            )
        }
        TimeSource::None => (Vec::new(), TimeReference::Absent),
    }
}

fn is_bad_flag(value: f64, bad_flag: Option<f64>) -> bool {
    bad_flag.is_some_and(|flag| (value - flag).abs() <= flag.abs() * 1e-9)
}

/// Build a column choosing the narrowest type that fits every value
fn typed_column(name: &str, values: Vec<Option<String>>, bad_flag: Option<f64>) -> Column {
    let present = || values.iter().flatten();

    if present().all(|v| v.trim().parse::<i64>().is_ok()) && present().next().is_some() {
        let parsed: Vec<Option<i64>> = values
            .iter()
            .map(|v| v.as_deref().and_then(|v| v.trim().parse().ok()))
            .collect();
        return Column::new(name.into(), parsed);
    }

    if present().all(|v| v.trim().parse::<f64>().is_ok()) {
        let parsed: Vec<Option<f64>> = values
            .iter()
            .map(|v| parse_float(v).filter(|value| !is_bad_flag(*value, bad_flag)))
            .collect();
        return Column::new(name.into(), parsed);
    }

    Column::new(name.into(), values)
}

/// Build the typed frame from normalized descriptors and raw rows.
///
/// The source column of the time variable is replaced by `time` when its
/// canonical name is already `time`; otherwise a derived `time` column is
/// prepended and the source kept.
pub fn build_frame(
    columns: Vec<ColumnDescriptor>,
    rows: Vec<Row>,
    time: &TimeSource,
    bad_flag: Option<f64>,
    time_formats: &[String],
) -> Result<Frame> {
    let mut series: Vec<Vec<Option<String>>> = vec![Vec::with_capacity(rows.len()); columns.len()];
    for row in rows {
        for (index, value) in row.into_iter().enumerate().take(columns.len()) {
            series[index].push(value);
        }
    }

    let mut warnings = Vec::new();
    let time_index = time
        .column()
        .and_then(|name| columns.iter().position(|c| c.original_name == name));

    let mut frame_columns = Vec::with_capacity(columns.len() + 1);
    let mut descriptors = Vec::with_capacity(columns.len() + 1);
    let mut consumed = None;
    let mut time_reference = TimeReference::Absent;

    match time_index {
        Some(index) => {
            let (values, reference) = time_values(time, &series[index], time_formats, &mut warnings);
            time_reference = reference;

            let descriptor = if columns[index].canonical_name == TIME_VARIABLE {
                consumed = Some(index);
                columns[index].clone()
            } else {
                let mut derived = ColumnDescriptor::raw(TIME_VARIABLE);
                derived.canonical_name = TIME_VARIABLE.to_string();
                derived.ignored = true;
                derived
                    .attributes
                    .insert("derived_from", columns[index].original_name.clone());
                derived
            };

            frame_columns.push(
                Column::new(TIME_VARIABLE.into(), values)
                    .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?,
            );
            descriptors.push(descriptor);
        }
        None => {
            debug!("No time column found for {:?}", time);
            warnings.push(ParseWarning::MissingTime);
        }
    }

    for (index, (descriptor, values)) in columns.into_iter().zip(series).enumerate() {
        if Some(index) == consumed {
            continue;
        }
        frame_columns.push(typed_column(&descriptor.canonical_name, values, bad_flag));
        descriptors.push(descriptor);
    }

    let data = DataFrame::new(frame_columns)?;
    Ok(Frame {
        data,
        columns: descriptors,
        time_reference,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParserConfig;

    fn descriptor(original: &str, canonical: &str) -> ColumnDescriptor {
        let mut column = ColumnDescriptor::raw(original);
        column.canonical_name = canonical.to_string();
        column
    }

    fn row(values: &[&str]) -> Row {
        values
            .iter()
            .map(|v| (!v.is_empty()).then(|| v.to_string()))
            .collect()
    }

    #[test]
    fn test_text_time_replaces_source_column() {
        let frame = build_frame(
            vec![
                descriptor("#", "index"),
                descriptor("Date Time, GMT-07:00", "time"),
                descriptor("Temp, °F", "temperature"),
            ],
            vec![
                row(&["1", "05/01/19 12:00:00 PM", "68.0"]),
                row(&["2", "05/01/19 12:10:00 PM", ""]),
            ],
            &TimeSource::Text {
                column: "Date Time, GMT-07:00".to_string(),
            },
            None,
            &ParserConfig::builtin().time_formats,
        )
        .unwrap();

        assert_eq!(
            frame.data.get_column_names_str(),
            vec!["time", "index", "temperature"]
        );
        assert_eq!(frame.columns[0].original_name, "Date Time, GMT-07:00");
        assert_eq!(frame.time_reference, TimeReference::Local);
        assert_eq!(frame.data.column("index").unwrap().dtype(), &DataType::Int64);
        assert_eq!(
            frame.data.column("temperature").unwrap().dtype(),
            &DataType::Float64
        );
        assert!(frame.warnings.is_empty());
    }

    #[test]
    fn test_elapsed_seconds_derive_time() {
        let start = NaiveDate::from_ymd_opt(2016, 6, 23)
            .unwrap()
            .and_hms_opt(13, 51, 30)
            .unwrap();
        let frame = build_frame(
            vec![descriptor("timeS", "time_elapsed"), descriptor("t090C", "temperature")],
            vec![row(&["0.000", "10.1"]), row(&["0.250", "10.2"])],
            &TimeSource::ElapsedSeconds {
                column: "timeS".to_string(),
                start,
            },
            None,
            &ParserConfig::builtin().time_formats,
        )
        .unwrap();

        assert_eq!(
            frame.data.get_column_names_str(),
            vec!["time", "time_elapsed", "temperature"]
        );
        let ms: Vec<Option<i64>> = frame
            .data
            .column("time")
            .unwrap()
            .cast(&DataType::Int64)
            .unwrap()
            .as_materialized_series()
            .i64()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(ms[1].unwrap() - ms[0].unwrap(), 250);
    }

    #[test]
    fn test_bad_flag_becomes_null() {
        let frame = build_frame(
            vec![descriptor("t090C", "temperature")],
            vec![row(&["10.1"]), row(&["-9.990e-29"])],
            &TimeSource::None,
            Some(-9.990e-29),
            &ParserConfig::builtin().time_formats,
        )
        .unwrap();

        assert_eq!(frame.data.column("temperature").unwrap().null_count(), 1);
        assert_eq!(frame.warnings, vec![ParseWarning::MissingTime]);
        assert_eq!(frame.time_reference, TimeReference::Absent);
    }

    #[test]
    fn test_unparsed_timestamps_are_reported() {
        let frame = build_frame(
            vec![descriptor("Date & Time", "time")],
            vec![row(&["2019-05-01 00:00:00.000"]), row(&["not a date"])],
            &TimeSource::Text {
                column: "Date & Time".to_string(),
            },
            None,
            &ParserConfig::builtin().time_formats,
        )
        .unwrap();

        assert_eq!(frame.data.column("time").unwrap().null_count(), 1);
        assert_eq!(
            frame.warnings,
            vec![ParseWarning::UnparsedTimestamps {
                column: "Date & Time".to_string(),
                count: 1
            }]
        );
    }

    #[test]
    fn test_text_columns_stay_strings() {
        let column = typed_column(
            "coupler_attached",
            vec![None, Some("Logged".to_string())],
            None,
        );
        assert_eq!(column.dtype(), &DataType::String);
    }
}
