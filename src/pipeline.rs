//! Single-file parsing pipeline.
//!
//! header -> body -> table reshaping -> variable normalization -> typed
//! frame -> instrument metadata -> unit pass -> time pass.

use crate::body::read_body;
use crate::classify::classify;
use crate::config::ParserConfig;
use crate::constants::PROBE_LINES;
use crate::error::{OceanError, Result};
use crate::formats::{self, HeaderParse, ParsedHeader};
use crate::header::LineReader;
use crate::models::{InstrumentFormat, InstrumentType, Metadata, NormalizedDataset, ParseWarning};
use crate::normalize::normalize;
use crate::schema::build_frame;
use crate::units::{normalize_units, resolve_timezone};
use chrono::FixedOffset;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info, warn};

/// Per-call options
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    /// Skip probing and parse as this format
    pub format: Option<InstrumentFormat>,
    /// Offset of local timestamps, taking precedence over the header
    pub timezone: Option<FixedOffset>,
}

impl ParseOptions {
    pub fn with_format(mut self, format: InstrumentFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_timezone(mut self, offset: FixedOffset) -> Self {
        self.timezone = Some(offset);
        self
    }
}

/// Parse one instrument file into a normalized dataset
pub fn parse_file(
    path: &Path,
    options: &ParseOptions,
    config: &ParserConfig,
) -> Result<NormalizedDataset> {
    if !path.exists() {
        return Err(OceanError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let format = match options.format {
        Some(format) => format,
        None => formats::detect_format(path)?,
    };
    debug!("Parsing {} as {}", path.display(), format);

    let reader = BufReader::new(File::open(path)?);
    parse_reader(reader, path, &options.clone().with_format(format), config)
}

/// Parse instrument text from any reader.
///
/// `source` is recorded on the dataset and used in errors and as the
/// format hint when `options.format` is not set.
pub fn parse_reader<R: BufRead>(
    reader: R,
    source: &Path,
    options: &ParseOptions,
    config: &ParserConfig,
) -> Result<NormalizedDataset> {
    let mut lines = LineReader::new(reader);
    let format = match options.format {
        Some(format) => format,
        None => probe_reader(&mut lines, source)?,
    };

    let header = match formats::parse_header(format, &mut lines, source)? {
        HeaderParse::Parsed(header) => *header,
        HeaderParse::NotApplicable(warning) => {
            let mut metadata = Metadata::new();
            metadata.insert("instrument_manufacturer", formats::manufacturer(format));
            let mut dataset =
                NormalizedDataset::empty(source.to_path_buf(), format, metadata, Vec::new());
            dataset.warn(warning);
            return Ok(dataset);
        }
    };
    let ParsedHeader {
        metadata,
        columns,
        body,
        time,
        timezone,
        bad_flag,
        history,
        warnings,
    } = header;

    let body_read = read_body(&mut lines, &body, columns.len(), source)?;
    let (columns, rows) = formats::finish_table(format, columns, body_read.rows, &metadata);
    let (columns, normalize_warnings) = normalize(
        columns,
        config.variable_map(format.family()),
        &config.ignored_variables,
    );
    let frame = build_frame(columns, rows, &time, bad_flag, &config.time_formats)?;

    let mut dataset = NormalizedDataset {
        source: source.to_path_buf(),
        format,
        data: frame.data,
        columns: frame.columns,
        metadata,
        history,
        warnings: Vec::new(),
        time_reference: frame.time_reference,
    };
    for warning in warnings
        .into_iter()
        .chain(body_read.warnings)
        .chain(normalize_warnings)
        .chain(frame.warnings)
    {
        dataset.warn(warning);
    }

    dataset
        .metadata
        .insert_derived("instrument_manufacturer", formats::manufacturer(format));
    if !dataset.metadata.contains_key("instrument_sn") {
        warn!("No instrument serial number in {}", source.display());
        dataset.warn(ParseWarning::MissingSerialNumber);
    }

    // The vendor model stays under `instrument_model`
    let classification = classify(
        dataset.canonical_names(),
        &config.ignored_variables,
        &config.signatures,
    );
    if classification.instrument_type == InstrumentType::Unknown {
        dataset
            .metadata
            .insert("unknown_variables", classification.unmatched.clone());
        dataset.warn(ParseWarning::UnknownInstrumentSignature {
            variables: classification.unmatched,
        });
    }
    dataset
        .metadata
        .insert("instrument_type", classification.instrument_type.as_str());

    normalize_units(&mut dataset, &config.unit_policy)?;
    resolve_timezone(&mut dataset, timezone.as_ref(), options.timezone)?;

    info!(
        "Parsed {} rows x {} variables from {} ({})",
        dataset.row_count(),
        dataset.columns.len(),
        source.display(),
        format
    );
    Ok(dataset)
}

/// Detect the format from the first lines, then rewind the reader
fn probe_reader<R: BufRead>(lines: &mut LineReader<R>, source: &Path) -> Result<InstrumentFormat> {
    let mut head = Vec::with_capacity(PROBE_LINES);
    while head.len() < PROBE_LINES {
        match lines.next_line()? {
            Some(line) => head.push(line),
            None => break,
        }
    }

    let detected = formats::detect_in_head(&head, InstrumentFormat::from_path(source));
    for line in head.into_iter().rev() {
        lines.push_back(line);
    }
    detected.ok_or_else(|| OceanError::UnknownFormat {
        path: source.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MetaValue, TimeReference};
    use std::io::Cursor;

    const RTEXT: &str = concat!(
        "Model=RBRsolo\n",
        "Serial=077014\n",
        "NumberOfSamples=2\n",
        "\n",
        "Date & Time               Temperature\n",
        "2019-05-01 00:00:00.000   10.1234\n",
        "2019-05-01 00:00:10.000   10.2234\n",
    );

    fn parse(text: &str, name: &str, options: &ParseOptions) -> Result<NormalizedDataset> {
        parse_reader(
            Cursor::new(text.to_string()),
            Path::new(name),
            options,
            ParserConfig::builtin(),
        )
    }

    #[test]
    fn test_probe_rewinds_reader() {
        let dataset = parse(RTEXT, "rbr/077014.txt", &ParseOptions::default()).unwrap();

        assert_eq!(dataset.format, InstrumentFormat::RbrRText);
        assert_eq!(dataset.row_count(), 2);
        assert_eq!(dataset.metadata.get_text("instrument_sn"), Some("077014"));
        assert_eq!(
            dataset.metadata.get("NumberOfSamples"),
            Some(&MetaValue::Integer(2))
        );
    }

    #[test]
    fn test_instrument_type_classified_for_every_format() {
        let dataset = parse(RTEXT, "077014.txt", &ParseOptions::default()).unwrap();

        assert_eq!(dataset.metadata.get_text("instrument_manufacturer"), Some("RBR"));
        assert_eq!(dataset.metadata.get_text("instrument_model"), Some("RBRsolo"));
        assert_eq!(dataset.metadata.get_text("instrument_type"), Some("Tidbit"));
        assert!(!dataset.metadata.contains_key("unknown_variables"));
    }

    #[test]
    fn test_missing_serial_number_warns() {
        let dataset = parse(RTEXT, "077014.txt", &ParseOptions::default()).unwrap();
        assert!(!dataset.warnings.contains(&ParseWarning::MissingSerialNumber));

        let anonymous = RTEXT.replace("Serial=077014\n", "");
        let dataset = parse(&anonymous, "077014.txt", &ParseOptions::default()).unwrap();
        assert!(dataset.warnings.contains(&ParseWarning::MissingSerialNumber));
        assert_eq!(dataset.row_count(), 2);
    }

    #[test]
    fn test_timezone_override() {
        let options = ParseOptions::default()
            .with_format(InstrumentFormat::RbrRText)
            .with_timezone(FixedOffset::west_opt(7 * 3600).unwrap());
        let dataset = parse(RTEXT, "077014.txt", &options).unwrap();

        assert_eq!(dataset.time_reference, TimeReference::Utc);
        assert!(
            !dataset
                .warnings
                .contains(&ParseWarning::UnresolvedTimezone)
        );
    }

    #[test]
    fn test_unknown_content() {
        let result = parse("nothing to see\n", "notes.txt", &ParseOptions::default());
        assert!(matches!(result, Err(OceanError::UnknownFormat { .. })));
    }

    #[test]
    fn test_missing_file() {
        let result = parse_file(
            Path::new("/nonexistent/cast.cnv"),
            &ParseOptions::default(),
            ParserConfig::builtin(),
        );
        assert!(matches!(result, Err(OceanError::FileNotFound { .. })));
    }
}
