//! Instrument sub-model inference from the set of canonical variables.

use crate::config::InstrumentSignature;
use crate::models::InstrumentType;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Result of matching a variable set against the signature catalogue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub instrument_type: InstrumentType,
    /// Variables left after removing ignored ones, sorted (only for `Unknown`)
    pub unmatched: Vec<String>,
}

/// Classify a dataset by exact equality of its non-ignored variable set.
///
/// The catalogue is ordered and the first exact match wins; a subset or
/// superset never matches.
pub fn classify<'a>(
    canonical_names: impl IntoIterator<Item = &'a str>,
    ignored: &BTreeSet<String>,
    catalogue: &[InstrumentSignature],
) -> Classification {
    let variables: BTreeSet<String> = canonical_names
        .into_iter()
        .filter(|name| !ignored.contains(*name))
        .map(str::to_string)
        .collect();

    if let Some(signature) = catalogue
        .iter()
        .find(|signature| signature.variables == variables)
    {
        debug!("Matched instrument signature {}", signature.instrument_type);
        return Classification {
            instrument_type: signature.instrument_type,
            unmatched: Vec::new(),
        };
    }

    let unmatched: Vec<String> = variables.into_iter().collect();
    warn!("Unknown instrument signature: {:?}", unmatched);
    Classification {
        instrument_type: InstrumentType::Unknown,
        unmatched,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParserConfig;

    fn run(names: &[&str]) -> Classification {
        let config = ParserConfig::builtin();
        classify(
            names.iter().copied(),
            &config.ignored_variables,
            &config.signatures,
        )
    }

    #[test]
    fn test_every_catalogued_signature_classifies_to_its_label() {
        let config = ParserConfig::builtin();
        for signature in &config.signatures {
            let mut names: Vec<&str> = signature.variables.iter().map(String::as_str).collect();
            names.push("time");
            names.push("battery_voltage");

            let result = run(&names);
            assert_eq!(result.instrument_type, signature.instrument_type);
            assert!(result.unmatched.is_empty());
        }
    }

    #[test]
    fn test_extra_variable_is_unknown() {
        let result = run(&["time", "temperature", "light_intensity", "salinity"]);
        assert_eq!(result.instrument_type, InstrumentType::Unknown);
        assert_eq!(
            result.unmatched,
            vec!["light_intensity", "salinity", "temperature"]
        );
    }

    #[test]
    fn test_order_and_events_do_not_matter() {
        let result = run(&[
            "index",
            "pressure",
            "coupler_attached",
            "time",
            "temperature",
            "sensor_depth",
            "end_of_file",
        ]);
        assert_eq!(result.instrument_type, InstrumentType::Pt);
    }

    #[test]
    fn test_tidbit_versus_pendant() {
        assert_eq!(run(&["time", "temperature"]).instrument_type, InstrumentType::Tidbit);
        assert_eq!(
            run(&["time", "temperature", "light_intensity"]).instrument_type,
            InstrumentType::Pendant
        );
    }
}
