//! Variable name normalization.
//!
//! Maps vendor column names, which may embed units, serial numbers and
//! timezone strings, onto canonical variable names. The result depends only
//! on each column's original name, so normalizing twice is a no-op.

use crate::constants::BOTTLE_STATISTICS;
use crate::models::{ColumnDescriptor, ParseWarning};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::LazyLock;
use tracing::debug;

static SERIAL_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\([^()]*S/N[^()]*\)").unwrap());
static SERIAL_SUFFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+#\d+\s*$").unwrap());
static CHANNEL_PREFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*\d+:\s*").unwrap());
static TRAILING_PARENS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<name>.*?)\s*\((?P<unit>[^()]*)\)\s*$").unwrap());
static TIMEZONE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?i)(GMT|UTC)\s*([+-]\d{1,2}(:?\d{2})?)?$").unwrap());
static NON_ALPHANUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Lower-case a name and join its alphanumeric runs with underscores
pub fn slugify(name: &str) -> String {
    let lowered = name.to_lowercase();
    NON_ALPHANUMERIC
        .replace_all(&lowered, "_")
        .trim_matches('_')
        .to_string()
}

/// Strip vendor artifacts and split a raw column name into name and unit.
///
/// ```text
/// "Temp, °C (LGR S/N: 10251325, SEN S/N: 10251325)" -> ("Temp", Some("°C"))
/// "Date Time, GMT-07:00"                             -> ("Date Time", None)
/// "DO (mg/l)"                                        -> ("DO", Some("mg/l"))
/// ```
pub fn split_name_and_unit(raw: &str) -> (String, Option<String>) {
    let cleaned = SERIAL_BLOCK.replace_all(raw, "");
    let cleaned = SERIAL_SUFFIX.replace(&cleaned, "");
    let cleaned = CHANNEL_PREFIX.replace(&cleaned, "");
    let cleaned = cleaned.trim();

    if let Some((name, unit)) = cleaned.split_once(',') {
        let unit = unit.trim();
        let unit = (!unit.is_empty() && !TIMEZONE_TOKEN.is_match(unit)).then(|| unit.to_string());
        return (name.trim().to_string(), unit);
    }

    if let Some(caps) = TRAILING_PARENS.captures(cleaned) {
        let name = caps["name"].trim();
        if !name.is_empty() {
            let unit = caps["unit"].trim();
            let unit = (!unit.is_empty() && !TIMEZONE_TOKEN.is_match(unit)).then(|| unit.to_string());
            return (name.to_string(), unit);
        }
    }

    (cleaned.to_string(), None)
}

fn mapped(cleaned: &str, mapping: &BTreeMap<String, String>) -> Option<String> {
    mapping.get(cleaned).cloned().or_else(|| {
        mapping
            .iter()
            .find(|(raw, _)| raw.eq_ignore_ascii_case(cleaned))
            .map(|(_, canonical)| canonical.clone())
    })
}

/// Canonical name for a cleaned column name
fn lookup(cleaned: &str, mapping: &BTreeMap<String, String>) -> String {
    if let Some(canonical) = mapped(cleaned, mapping) {
        return canonical;
    }

    // Bottle statistics columns, e.g. `t090C_sdev`
    for statistic in BOTTLE_STATISTICS {
        if let Some(stem) = cleaned.strip_suffix(&format!("_{}", statistic)) {
            if let Some(canonical) = mapped(stem, mapping) {
                return format!("{}_{}", canonical, statistic);
            }
        }
    }

    let slug = slugify(cleaned);
    if let Some((_, canonical)) = mapping.iter().find(|(raw, _)| slugify(raw) == slug) {
        return canonical.clone();
    }

    if slug.is_empty() {
        "variable".to_string()
    } else {
        slug
    }
}

/// Resolve canonical names, units and ignored flags for a column list.
///
/// Units supplied by the format parser take precedence over units found in
/// the column name. Repeated canonical names are suffixed `_2`, `_3`, ...
pub fn normalize(
    columns: Vec<ColumnDescriptor>,
    mapping: &BTreeMap<String, String>,
    ignored: &BTreeSet<String>,
) -> (Vec<ColumnDescriptor>, Vec<ParseWarning>) {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut warnings = Vec::new();

    let columns = columns
        .into_iter()
        .map(|mut column| {
            let (cleaned, unit) = split_name_and_unit(&column.original_name);
            let base = lookup(&cleaned, mapping);

            let count = seen.entry(base.clone()).or_insert(0);
            *count += 1;
            let canonical = if *count == 1 {
                base.clone()
            } else {
                let renamed = format!("{}_{}", base, count);
                warnings.push(ParseWarning::DuplicateVariable {
                    name: base.clone(),
                    renamed: renamed.clone(),
                });
                renamed
            };

            debug!("column '{}' -> '{}'", column.original_name, canonical);
            if column.unit.is_none() {
                column.unit = unit;
            }
            column.ignored = ignored.contains(&base);
            column.canonical_name = canonical;
            column
        })
        .collect();

    (columns, warnings)
}
