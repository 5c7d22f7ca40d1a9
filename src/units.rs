//! Unit conversion and timezone resolution passes.
//!
//! Both passes run on a finished [`NormalizedDataset`] and are idempotent:
//! converted columns carry the target unit afterwards and a resolved time
//! column is marked [`TimeReference::Utc`].

use crate::config::{UnitAction, UnitPolicy};
use crate::constants::TIME_VARIABLE;
use crate::error::Result;
use crate::models::{NormalizedDataset, ParseWarning, TimeReference, TimezoneHint};
use chrono::{FixedOffset, Offset};
use polars::prelude::*;
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

/// A complete offset value as typed on the command line
static UTC_OFFSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:GMT|UTC)?\s*(?P<sign>[+-])\s*(?P<hours>\d{1,2})(?::?(?P<minutes>\d{2}))?$")
        .unwrap()
});

/// An offset embedded in header text; the zone token is required
static HEADER_OFFSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:UTC|GMT)\s*(?P<sign>[+-])(?P<hours>\d{1,2})(?::?(?P<minutes>\d{2}))?\b")
        .unwrap()
});

const CELSIUS: &str = "degC";
const MILLISIEMENS: &str = "mS/cm";

fn offset_from_captures(caps: &regex::Captures<'_>) -> Option<FixedOffset> {
    let hours: i32 = caps["hours"].parse().ok()?;
    let minutes: i32 = caps
        .name("minutes")
        .map(|m| m.as_str().parse())
        .transpose()
        .ok()?
        .unwrap_or(0);
    if hours > 14 || minutes > 59 {
        return None;
    }
    let seconds = hours * 3600 + minutes * 60;
    match &caps["sign"] {
        "-" => FixedOffset::west_opt(seconds),
        _ => FixedOffset::east_opt(seconds),
    }
}

fn is_bare_utc(text: &str) -> bool {
    ["UTC", "GMT", "Z"]
        .iter()
        .any(|zone| text.eq_ignore_ascii_case(zone))
}

/// Parse a whole offset value: `GMT-07:00`, `UTC-8`, `+05:30`, `-0700` or a bare `UTC`/`GMT`
pub fn parse_utc_offset(text: &str) -> Option<FixedOffset> {
    let trimmed = text.trim();
    if let Some(caps) = UTC_OFFSET.captures(trimmed) {
        return offset_from_captures(&caps);
    }
    is_bare_utc(trimmed).then(|| FixedOffset::east_opt(0)).flatten()
}

/// Find a `UTC±N` / `GMT±HH:MM` offset inside header text.
///
/// Digits without a zone token (serial numbers, dates) never count.
pub fn find_utc_offset(text: &str) -> Option<FixedOffset> {
    let trimmed = text.trim();
    if let Some(caps) = HEADER_OFFSET.captures(trimmed) {
        return offset_from_captures(&caps);
    }
    is_bare_utc(trimmed).then(|| FixedOffset::east_opt(0)).flatten()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TemperatureUnit {
    Celsius,
    Fahrenheit,
    Unrecognized,
}

fn temperature_unit(unit: &str) -> TemperatureUnit {
    let last = unit.rsplit(',').next().unwrap_or(unit);
    let cleaned: String = last
        .to_lowercase()
        .replace("degrees", "")
        .replace("deg", "")
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .collect();

    match cleaned.as_str() {
        "c" | "celsius" | "degc" => TemperatureUnit::Celsius,
        "f" | "fahrenheit" => TemperatureUnit::Fahrenheit,
        _ => TemperatureUnit::Unrecognized,
    }
}

fn is_micro_siemens(unit: &str) -> bool {
    let cleaned: String = unit
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    matches!(cleaned.as_str(), "µs/cm" | "μs/cm" | "us/cm")
}

fn is_temperature(name: &str) -> bool {
    name == "temperature" || name.starts_with("temperature_")
}

fn is_conductivity(name: &str) -> bool {
    name.starts_with("conductivity") || name.starts_with("specific_conductance")
}

/// Rewrite a float column in place with `convert`
fn map_float_column(
    dataset: &mut NormalizedDataset,
    name: &str,
    convert: impl Fn(f64) -> f64,
) -> Result<bool> {
    let column = dataset.data.column(name)?;
    if !column.dtype().is_primitive_numeric() {
        return Ok(false);
    }

    let values: Vec<Option<f64>> = column
        .cast(&DataType::Float64)?
        .as_materialized_series()
        .f64()?
        .into_iter()
        .map(|value| value.map(&convert))
        .collect();
    dataset
        .data
        .with_column(Column::new(name.into(), values))?;
    Ok(true)
}

/// Convert non-SI units according to the per-family policy.
pub fn normalize_units(dataset: &mut NormalizedDataset, policy: &UnitPolicy) -> Result<()> {
    for index in 0..dataset.columns.len() {
        let name = dataset.columns[index].canonical_name.clone();
        let Some(unit) = dataset.columns[index].unit.clone() else {
            continue;
        };

        if is_temperature(&name) {
            match temperature_unit(&unit) {
                TemperatureUnit::Celsius => {}
                TemperatureUnit::Unrecognized => dataset.warn(ParseWarning::UnknownTemperatureUnit {
                    variable: name.clone(),
                    unit: unit.clone(),
                }),
                TemperatureUnit::Fahrenheit => match policy.temperature {
                    UnitAction::Ignore => {}
                    UnitAction::Warn => dataset.warn(ParseWarning::UnitNotConverted {
                        variable: name.clone(),
                        unit: unit.clone(),
                    }),
                    UnitAction::Convert => {
                        // Spreads scale without the offset
                        let converted = if name.ends_with("_sdev") {
                            map_float_column(dataset, &name, |v| v / 1.8)?
                        } else {
                            map_float_column(dataset, &name, |v| (v - 32.0) / 1.8)?
                        };
                        if converted {
                            dataset.columns[index].unit = Some(CELSIUS.to_string());
                            dataset.add_history(format!(
                                "Converted {} from {} to {}",
                                name, unit, CELSIUS
                            ));
                        }
                    }
                },
            }
        } else if is_conductivity(&name) && is_micro_siemens(&unit) {
            match policy.conductivity {
                UnitAction::Ignore => {}
                UnitAction::Warn => dataset.warn(ParseWarning::UnitNotConverted {
                    variable: name.clone(),
                    unit: unit.clone(),
                }),
                UnitAction::Convert => {
                    if map_float_column(dataset, &name, |v| v / 1000.0)? {
                        dataset.columns[index].unit = Some(MILLISIEMENS.to_string());
                        dataset.add_history(format!(
                            "Converted {} from {} to {}",
                            name, unit, MILLISIEMENS
                        ));
                    }
                }
            }
        }
    }
    Ok(())
}

/// Resolve the time column to UTC.
///
/// Priority: caller override, then header offset. Without either, UTC is
/// assumed and an [`ParseWarning::UnresolvedTimezone`] warning is recorded.
/// Epoch based time columns are already UTC and are left untouched.
pub fn resolve_timezone(
    dataset: &mut NormalizedDataset,
    hint: Option<&TimezoneHint>,
    override_offset: Option<FixedOffset>,
) -> Result<()> {
    match dataset.time_reference {
        TimeReference::Absent => return Ok(()),
        TimeReference::Utc => {
            if dataset.metadata.insert_derived("time_zone", "UTC") {
                dataset.metadata.insert_derived("time_offset", "+00:00");
                dataset.metadata.insert_derived("time_offset_source", "epoch");
            }
            return Ok(());
        }
        TimeReference::Local => {}
    }

    let (offset, source) = match (override_offset, hint) {
        (Some(offset), _) => (offset, "override".to_string()),
        (None, Some(hint)) => (hint.offset, format!("header ({})", hint.source_text)),
        (None, None) => {
            dataset.warn(ParseWarning::UnresolvedTimezone);
            (chrono::Utc.fix(), "assumed".to_string())
        }
    };

    let shift_ms = i64::from(offset.local_minus_utc()) * 1000;
    if shift_ms != 0 {
        let values: Vec<Option<i64>> = dataset
            .data
            .column(TIME_VARIABLE)?
            .cast(&DataType::Int64)?
            .as_materialized_series()
            .i64()?
            .into_iter()
            .map(|value| value.map(|ms| ms - shift_ms))
            .collect();
        let column = Column::new(TIME_VARIABLE.into(), values)
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?;
        dataset.data.with_column(column)?;
    }

    debug!(
        "Resolved time of {} from offset {} ({})",
        dataset.source.display(),
        offset,
        source
    );
    dataset.metadata.insert_derived("time_zone", "UTC");
    dataset.metadata.insert_derived("time_offset", offset.to_string());
    dataset.metadata.insert_derived("time_offset_source", source.clone());
    dataset.add_history(format!(
        "Localized time to UTC{} ({}) and converted to UTC",
        offset, source
    ));
    dataset.time_reference = TimeReference::Utc;
    Ok(())
}
