//! Command-line interface components.

use crate::config::{CompressionAlgorithm, OutputFormat, ParserConfig, ProcessorConfig, UnitAction};
use crate::models::{InstrumentFormat, ProcessingStats};
use crate::pipeline::ParseOptions;
use crate::processor::BatchProcessor;
use crate::processor::discovery::FileDiscovery;
use crate::units::parse_utc_offset;

use anyhow::{Context, Result, bail};
use chrono::FixedOffset;
use clap::Parser;
use colored::*;
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "ocean_processor")]
#[command(about = "Normalize raw oceanographic instrument files into time-indexed tables")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Args {
    /// Instrument files, directories (searched recursively) or glob patterns
    #[arg(value_name = "INPUTS", required = true, num_args = 1..)]
    pub inputs: Vec<String>,

    /// Parse every input as this format instead of probing
    /// (onset, minidot, minidot-cat, rtext, mon, cnv, btl)
    #[arg(short, long)]
    pub format: Option<InstrumentFormat>,

    /// UTC offset of local timestamps, overriding the file header (e.g. UTC-8, -07:00)
    #[arg(short = 't', long)]
    pub timezone: Option<String>,

    /// Output directory; without it files are parsed and reported only
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output table format
    #[arg(long, default_value = "parquet", value_parser = ["parquet", "csv"])]
    pub output_format: String,

    /// Parquet compression algorithm (snappy, zstd, lz4, none)
    #[arg(long, default_value = "snappy")]
    pub compression: String,

    /// Number of files parsed concurrently (defaults to the CPU count)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// JSON parser configuration replacing the built-in tables
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Fahrenheit temperatures: convert, warn or ignore
    #[arg(long)]
    pub temperature_units: Option<UnitAction>,

    /// Conductivity in uS/cm: convert, warn or ignore
    #[arg(long)]
    pub conductivity_units: Option<UnitAction>,

    /// Re-parse files whose output already exists
    #[arg(long)]
    pub force: bool,

    /// Do not write the JSON metadata sidecar
    #[arg(long)]
    pub no_metadata: bool,

    /// Merge the MiniDOT txt files of each directory into one table
    #[arg(long, conflicts_with = "format")]
    pub merge_minidot: bool,

    /// Enable verbose logging (-v: info, -vv: debug, -vvv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only show errors. Overrides verbose settings.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Args {
    /// Determine the appropriate log level based on verbosity flags
    pub fn get_log_level(&self) -> &'static str {
        if self.quiet {
            "error"
        } else {
            match self.verbose {
                0 => "warn",
                1 => "info",
                2 => "debug",
                _ => "trace",
            }
        }
    }

    pub fn show_progress(&self) -> bool {
        !self.quiet
    }

    pub fn parse_timezone(&self) -> Result<Option<FixedOffset>> {
        match &self.timezone {
            None => Ok(None),
            Some(text) => parse_utc_offset(text)
                .map(Some)
                .with_context(|| format!("Invalid timezone offset '{}'", text)),
        }
    }

    pub fn parse_options(&self) -> Result<ParseOptions> {
        Ok(ParseOptions {
            format: self.format,
            timezone: self.parse_timezone()?,
        })
    }

    /// Layer the command line flags over the defaults (or `--config`)
    pub fn to_processor_config(&self) -> Result<ProcessorConfig> {
        let mut parser = match &self.config {
            Some(path) => ParserConfig::from_json_file(path)
                .with_context(|| format!("Failed to load configuration {}", path.display()))?,
            None => ParserConfig::builtin().clone(),
        };
        if let Some(action) = self.temperature_units {
            parser.unit_policy.temperature = action;
        }
        if let Some(action) = self.conductivity_units {
            parser.unit_policy.conductivity = action;
        }

        let output_format = match self.output_format.as_str() {
            "csv" => OutputFormat::Csv,
            _ => OutputFormat::Parquet,
        };
        let mut config = ProcessorConfig::default()
            .with_parser(parser)
            .with_output_format(output_format)
            .with_compression(CompressionAlgorithm::parse(&self.compression)?);
        if let Some(workers) = self.workers {
            if workers == 0 {
                bail!("Workers count must be greater than 0");
            }
            config = config.with_workers(workers);
        }
        if self.force {
            config = config.with_force_reprocess();
        }
        if self.no_metadata {
            config = config.without_metadata();
        }
        Ok(config)
    }
}

/// Set up structured logging on stderr
pub fn setup_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let log_level = args.get_log_level();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ocean_processor={}", log_level)));

    if args.quiet {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_level(true)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_level(true)
                    .with_timer(fmt::time::uptime())
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    }

    debug!("Logging initialized at level: {}", log_level);
    Ok(())
}

/// Discover, parse and write every input
pub async fn run(args: Args) -> Result<ProcessingStats> {
    let config = args.to_processor_config()?;
    let options = args.parse_options()?;

    let mut discovery = FileDiscovery::new(args.inputs.clone());
    if let Some(output) = &args.output {
        discovery = discovery.excluding(output.clone());
    }
    let files = discovery.discover_files()?;
    if files.is_empty() {
        bail!("No instrument files found in {}", args.inputs.join(", "));
    }

    if args.show_progress() {
        println!(
            "{} {} files",
            "Processing".bright_green().bold(),
            files.len().to_string().bright_white().bold()
        );
    }
    info!("Processing {} files", files.len());

    let mut processor = BatchProcessor::new(config).with_options(options);
    if let Some(output) = &args.output {
        processor = processor.with_output(output.clone());
    }
    if !args.show_progress() {
        processor = processor.without_progress();
    }

    let report = if args.merge_minidot {
        processor.merge_minidot(&files).await?
    } else {
        processor.process_files(&files).await?
    };
    if args.show_progress() {
        report.print_summary();
    }
    Ok(report.stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_flags_layer_over_defaults() {
        let args = parse(&[
            "ocean_processor",
            "data/",
            "--output-format",
            "csv",
            "--workers",
            "3",
            "--temperature-units",
            "warn",
            "--force",
        ]);
        let config = args.to_processor_config().unwrap();

        assert_eq!(config.workers, 3);
        assert_eq!(config.output_format, OutputFormat::Csv);
        assert_eq!(config.parser.unit_policy.temperature, UnitAction::Warn);
        assert_eq!(config.parser.unit_policy.conductivity, UnitAction::Warn);
        assert!(config.force_reprocess);
        assert!(config.write_metadata);
    }

    #[test]
    fn test_format_and_timezone() {
        let args = parse(&["ocean_processor", "a.txt", "-f", "rtext", "-t", "UTC-8"]);
        let options = args.parse_options().unwrap();

        assert_eq!(options.format, Some(InstrumentFormat::RbrRText));
        assert_eq!(options.timezone.unwrap().local_minus_utc(), -8 * 3600);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(Args::try_parse_from(["ocean_processor", "a.txt", "-f", "netcdf"]).is_err());
        assert!(Args::try_parse_from(["ocean_processor"]).is_err());
        assert!(
            parse(&["ocean_processor", "a.txt", "-t", "somewhere"])
                .parse_options()
                .is_err()
        );
        assert!(
            parse(&["ocean_processor", "a.txt", "--compression", "brotli"])
                .to_processor_config()
                .is_err()
        );
    }

    #[test]
    fn test_merge_minidot_flag() {
        assert!(parse(&["ocean_processor", "raw/", "--merge-minidot"]).merge_minidot);
        assert!(!parse(&["ocean_processor", "raw/"]).merge_minidot);
        assert!(
            Args::try_parse_from(["ocean_processor", "raw/", "--merge-minidot", "-f", "rtext"])
                .is_err()
        );
    }

    #[test]
    fn test_log_levels() {
        assert_eq!(parse(&["ocean_processor", "a"]).get_log_level(), "warn");
        assert_eq!(parse(&["ocean_processor", "a", "-vv"]).get_log_level(), "debug");
        assert_eq!(parse(&["ocean_processor", "a", "-q"]).get_log_level(), "error");
    }
}
