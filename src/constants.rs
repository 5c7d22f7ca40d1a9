//! Application constants for the ocean processor
//!
//! This module contains the built-in mapping tables, instrument signature
//! catalogue, format sentinels and default values. They are turned into an
//! immutable [`crate::config::ParserConfig`] once per process.

// =============================================================================
// Canonical Variable Tables
// =============================================================================

/// Canonical name of the time variable in every dataset
pub const TIME_VARIABLE: &str = "time";

/// Onset HOBOware column names (units and serial blocks stripped)
pub const ONSET_VARIABLES: &[(&str, &str)] = &[
    ("#", "index"),
    ("Date Time", "time"),
    ("Date", "date"),
    ("Time", "time_of_day"),
    ("Temp", "temperature"),
    ("Temperature", "temperature"),
    ("Intensity", "light_intensity"),
    ("Abs Pres", "pressure"),
    ("Abs Pres Barom.", "barometric_pressure"),
    ("Bar Pres", "barometric_pressure"),
    ("Barometric Pressure", "barometric_pressure"),
    ("Sensor Depth", "sensor_depth"),
    ("Water Level", "water_level"),
    ("Low Range", "low_range_conductivity"),
    ("High Range", "conductivity"),
    ("Full Range", "conductivity"),
    ("Specific Conductance", "specific_conductance"),
    ("Salinity", "salinity"),
    ("Turbidity", "turbidity"),
    ("Batt", "battery_voltage"),
    ("Button Down", "button_down"),
    ("Button Up", "button_up"),
    ("Host Connect", "host_connected"),
    ("Host Connected", "host_connected"),
    ("Started", "started"),
    ("Stopped", "stopped"),
    ("End Of File", "end_of_file"),
    ("Coupler Attached", "coupler_attached"),
    ("Coupler Detached", "coupler_detached"),
    ("Bad Battery", "bad_battery"),
    ("Good Battery", "good_battery"),
];

/// PME MiniDOT txt and CAT column names
pub const PME_VARIABLES: &[(&str, &str)] = &[
    ("Time", "time"),
    ("Unix Timestamp", "time"),
    ("UTC_Date_&_Time", "utc_date_time"),
    ("BV", "battery_voltage"),
    ("Battery", "battery_voltage"),
    ("T", "temperature"),
    ("Temperature", "temperature"),
    ("DO", "dissolved_oxygen"),
    ("Dissolved Oxygen", "dissolved_oxygen"),
    ("Dissolved Oxygen Saturation", "dissolved_oxygen_saturation"),
    ("Q", "dissolved_oxygen_quality"),
];

/// RBR Ruskin R-Text column names
pub const RBR_VARIABLES: &[(&str, &str)] = &[
    ("Date & Time", "time"),
    ("Time", "time"),
    ("Temperature", "temperature"),
    ("Temp", "temperature"),
    ("Pressure", "pressure"),
    ("Pres", "pressure"),
    ("Sea pressure", "sea_pressure"),
    ("Depth", "depth"),
    ("Conductivity", "conductivity"),
    ("Cond", "conductivity"),
    ("Salinity", "salinity"),
    ("Specific conductivity", "specific_conductance"),
    ("Dissolved O2 saturation", "dissolved_oxygen_saturation"),
    ("Dissolved O2 concentration", "dissolved_oxygen"),
    ("Turbidity", "turbidity"),
];

/// Van Essen channel identifications
pub const VAN_ESSEN_VARIABLES: &[(&str, &str)] = &[
    ("time", "time"),
    ("PRESSURE", "pressure"),
    ("TEMPERATURE", "temperature"),
    ("CONDUCTIVITY", "conductivity"),
    ("SPEC.COND.", "specific_conductance"),
    ("BAROMETRIC PRESSURE", "barometric_pressure"),
];

/// Sea-Bird SBE variable names
pub const SEABIRD_VARIABLES: &[(&str, &str)] = &[
    ("scan", "scan_count"),
    ("timeS", "time_elapsed"),
    ("timeJ", "time_julian"),
    ("timeY", "time_epoch"),
    ("prdM", "pressure"),
    ("prDM", "pressure"),
    ("prSM", "pressure"),
    ("t090C", "temperature"),
    ("t090F", "temperature"),
    ("t068C", "temperature"),
    ("tv290C", "temperature"),
    ("t190C", "temperature_secondary"),
    ("c0S/m", "conductivity"),
    ("c0mS/cm", "conductivity"),
    ("c0uS/cm", "conductivity"),
    ("c1S/m", "conductivity_secondary"),
    ("c1mS/cm", "conductivity_secondary"),
    ("depSM", "depth"),
    ("sal00", "salinity"),
    ("sal11", "salinity_secondary"),
    ("density00", "density"),
    ("sigma-t00", "sigma_t"),
    ("potemp090C", "potential_temperature"),
    ("svCM", "sound_velocity"),
    ("sbeox0ML/L", "dissolved_oxygen_ml_l"),
    ("sbeox0Mm/L", "dissolved_oxygen_umol_l"),
    ("sbeox0V", "dissolved_oxygen_voltage"),
    ("flECO-AFL", "chlorophyll_fluorescence"),
    ("turbWETntu0", "turbidity"),
    ("par", "par"),
    ("nbin", "bin_count"),
    ("flag", "flag"),
];

// =============================================================================
// Instrument Classification
// =============================================================================

/// Housekeeping and event variables excluded from instrument signatures
pub const IGNORED_VARIABLES: &[&str] = &[
    "index",
    "time",
    "date",
    "time_of_day",
    "battery_voltage",
    "button_down",
    "button_up",
    "host_connected",
    "started",
    "stopped",
    "end_of_file",
    "coupler_attached",
    "coupler_detached",
    "bad_battery",
    "good_battery",
    "scan_count",
    "bin_count",
    "bottle",
    "flag",
];

/// Ordered instrument signature catalogue, first exact match wins
pub const INSTRUMENT_SIGNATURES: &[(&str, &[&str])] = &[
    ("Pendant", &["temperature", "light_intensity"]),
    ("CT", &["conductivity", "temperature"]),
    ("CT", &["conductivity", "specific_conductance", "temperature"]),
    (
        "CT",
        &["conductivity", "salinity", "specific_conductance", "temperature"],
    ),
    ("Tidbit", &["temperature"]),
    ("PT", &["pressure", "sensor_depth", "temperature"]),
    (
        "WL",
        &[
            "barometric_pressure",
            "pressure",
            "sensor_depth",
            "temperature",
            "water_level",
        ],
    ),
    ("airPT", &["pressure", "temperature"]),
    ("airP", &["pressure"]),
    ("Turbidity", &["turbidity"]),
];

// =============================================================================
// Time Handling
// =============================================================================

/// Timestamp layouts tried in order when parsing a text time column
pub const TIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%y %I:%M:%S %p",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%y %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%y %H:%M",
    "%m/%d/%Y %H:%M",
    "%d-%b-%Y %H:%M:%S%.f",
    "%b %d %Y %H:%M:%S",
];

/// Sea-Bird header date layout (`Jun 23 2016 13:51:30`)
pub const SEABIRD_DATE_FORMAT: &str = "%b %d %Y %H:%M:%S";

// =============================================================================
// Format Signatures and Sentinels
// =============================================================================

/// First line of a MiniDOT concatenated file
pub const MINIDOT_CAT_SIGNATURE: &str = "MiniDOT Logger Concatenated Data File";

/// Header lines following the CAT signature, before the column block
pub const MINIDOT_CAT_HEADER_LINES: usize = 5;

/// Marker ending an RBR R-Text header
pub const RBR_HEADER_END: &str = "NumberOfSamples";

/// Marker ending a Van Essen MON header
pub const MON_HEADER_END: &str = "[Data]";

/// Trailing line of a Van Essen MON data block
pub const MON_END_SENTINEL: &str = "END OF DATA FILE";

/// Marker ending a Sea-Bird header
pub const SEABIRD_HEADER_END: &str = "*END*";

/// Sea-Bird processing steps rendered into the history attribute
pub const SEABIRD_PROCESSING_STEPS: &[&str] = &[
    "datcnv",
    "filter",
    "alignctd",
    "celltm",
    "loopedit",
    "wildedit",
    "derive",
    "binavg",
    "bottlesum",
    "section",
    "split",
    "strip",
    "w_filter",
];

/// Per-bottle statistics other than the average, appended as `<variable>_<stat>`
pub const BOTTLE_STATISTICS: &[&str] = &["sdev", "min", "max"];

/// Fixed column widths of a Sea-Bird bottle file
pub mod bottle_layout {
    pub const BOTTLE_WIDTH: usize = 10;
    pub const DATE_WIDTH: usize = 12;
    pub const VARIABLE_WIDTH: usize = 11;
    /// Offset of the first variable name in the column header line
    pub const VARIABLES_OFFSET: usize = 22;
}

/// Number of lines read when probing a file signature
pub const PROBE_LINES: usize = 200;

// =============================================================================
// Manufacturers
// =============================================================================

pub mod manufacturers {
    pub const ONSET: &str = "Onset";
    pub const PME: &str = "PME";
    pub const RBR: &str = "RBR";
    pub const VAN_ESSEN: &str = "Van Essen Instruments";
    pub const SEABIRD: &str = "Sea-Bird Scientific";
}

// =============================================================================
// Output
// =============================================================================

/// Suffix of the metadata sidecar written next to each table
pub const METADATA_SIDECAR_SUFFIX: &str = "metadata.json";

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_canonical_names_are_slug_fixed_points() {
        let tables = [
            ONSET_VARIABLES,
            PME_VARIABLES,
            RBR_VARIABLES,
            VAN_ESSEN_VARIABLES,
            SEABIRD_VARIABLES,
        ];
        for table in tables {
            for (_, canonical) in table.iter() {
                assert_eq!(
                    crate::normalize::slugify(canonical),
                    *canonical,
                    "canonical name must already be a slug"
                );
            }
        }
    }

    #[test]
    fn test_signatures_are_unique() {
        let mut seen = HashSet::new();
        for (_, variables) in INSTRUMENT_SIGNATURES {
            let mut sorted: Vec<&str> = variables.to_vec();
            sorted.sort_unstable();
            assert!(seen.insert(sorted), "duplicate signature {:?}", variables);
        }
    }

    #[test]
    fn test_signatures_exclude_ignored_variables() {
        for (label, variables) in INSTRUMENT_SIGNATURES {
            for variable in variables.iter() {
                assert!(
                    !IGNORED_VARIABLES.contains(variable),
                    "{} signature uses ignored variable {}",
                    label,
                    variable
                );
            }
        }
    }
}
