//! Table writing for normalized datasets.
//!
//! Each dataset becomes `<output>/<stem>.parquet` (or `.csv`) with a
//! `<stem>.metadata.json` sidecar holding the global metadata record,
//! history, warnings and the column descriptors.

use crate::config::{CompressionAlgorithm, OutputFormat, ProcessorConfig};
use crate::constants::METADATA_SIDECAR_SUFFIX;
use crate::error::{OceanError, Result};
use crate::models::{ColumnDescriptor, InstrumentFormat, Metadata, NormalizedDataset, TimeReference};

use polars::prelude::{CsvWriter, ParquetWriter as PolarsParquetWriter, SerWriter};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Serialize)]
struct Sidecar<'a> {
    source: &'a Path,
    format: InstrumentFormat,
    time_reference: TimeReference,
    rows: usize,
    attributes: Metadata,
    variables: &'a [ColumnDescriptor],
}

/// Writes tables and metadata sidecars into one output directory
#[derive(Debug, Clone)]
pub struct TableWriter {
    output_dir: PathBuf,
    format: OutputFormat,
    compression: CompressionAlgorithm,
    write_metadata: bool,
}

impl TableWriter {
    pub fn new(output_dir: PathBuf, config: &ProcessorConfig) -> Self {
        Self {
            output_dir,
            format: config.output_format,
            compression: config.compression.clone(),
            write_metadata: config.write_metadata,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Table path for an output stem
    pub fn table_path(&self, stem: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", stem, self.format.extension()))
    }

    pub fn sidecar_path(&self, stem: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", stem, METADATA_SIDECAR_SUFFIX))
    }

    /// Write the dataset table (and sidecar) and return the table path
    pub fn write(&self, dataset: &NormalizedDataset, stem: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_dir)?;
        let path = self.table_path(stem);
        let mut df = dataset.data.clone();

        let file = File::create(&path)?;
        match self.format {
            OutputFormat::Parquet => {
                PolarsParquetWriter::new(file)
                    .with_compression(self.compression.to_polars_compression())
                    .finish(&mut df)
                    .map_err(|e| OceanError::ProcessingFailed {
                        path: path.clone(),
                        reason: format!("Failed to write parquet: {}", e),
                    })?;
            }
            OutputFormat::Csv => {
                CsvWriter::new(BufWriter::new(file))
                    .include_header(true)
                    .finish(&mut df)
                    .map_err(|e| OceanError::ProcessingFailed {
                        path: path.clone(),
                        reason: format!("Failed to write csv: {}", e),
                    })?;
            }
        }

        if self.write_metadata {
            self.write_sidecar(dataset, stem)?;
        }
        debug!("Wrote {} rows to {}", df.height(), path.display());
        Ok(path)
    }

    fn write_sidecar(&self, dataset: &NormalizedDataset, stem: &str) -> Result<()> {
        let sidecar = Sidecar {
            source: &dataset.source,
            format: dataset.format,
            time_reference: dataset.time_reference,
            rows: dataset.row_count(),
            attributes: dataset.metadata_record(),
            variables: &dataset.columns,
        };
        let file = File::create(self.sidecar_path(stem))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &sidecar)?;
        Ok(())
    }
}

/// Output stem per input file.
///
/// Stems are the file stems; inputs sharing a stem (e.g. several
/// MiniDOT `Cat.TXT` files) are prefixed with their parent directory name.
/// Names still shared after that (same parent name and stem under different
/// roots) get a numeric suffix in input order.
pub fn output_stems(files: &[PathBuf]) -> HashMap<PathBuf, String> {
    let stem = |path: &Path| {
        path.file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "dataset".to_string())
    };

    let mut counts: HashMap<String, usize> = HashMap::new();
    for file in files {
        *counts.entry(stem(file)).or_insert(0) += 1;
    }

    let candidates: Vec<String> = files
        .iter()
        .map(|file| {
            let base = stem(file);
            if counts.get(&base).copied().unwrap_or(0) > 1 {
                let parent = file
                    .parent()
                    .and_then(Path::file_name)
                    .map(|p| p.to_string_lossy().to_string())
                    .unwrap_or_default();
                format!("{}_{}", parent, base)
            } else {
                base
            }
        })
        .collect();

    let mut taken: HashSet<String> = candidates.iter().cloned().collect();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut stems = HashMap::with_capacity(files.len());
    for (file, candidate) in files.iter().zip(&candidates) {
        let name = if seen.insert(candidate.as_str()) {
            candidate.clone()
        } else {
            let mut suffix = 2;
            while taken.contains(&format!("{}_{}", candidate, suffix)) {
                suffix += 1;
            }
            let name = format!("{}_{}", candidate, suffix);
            taken.insert(name.clone());
            name
        };
        stems.insert(file.clone(), name);
    }
    stems
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;
    use tempfile::TempDir;

    fn sample_dataset() -> NormalizedDataset {
        let mut metadata = Metadata::new();
        metadata.insert("instrument_sn", "077014");
        let mut dataset = NormalizedDataset::empty(
            PathBuf::from("raw/077014.txt"),
            InstrumentFormat::RbrRText,
            metadata,
            Vec::new(),
        );
        let mut temperature = ColumnDescriptor::raw("Temperature");
        temperature.canonical_name = "temperature".to_string();
        temperature.unit = Some("degC".to_string());
        dataset.data = df!("temperature" => [10.1f64, 10.2, 10.3]).unwrap();
        dataset.columns = vec![temperature];
        dataset.add_history("Parsed test data");
        dataset
    }

    #[test]
    fn test_write_parquet_with_sidecar() {
        let temp_dir = TempDir::new().unwrap();
        let writer = TableWriter::new(temp_dir.path().join("out"), &ProcessorConfig::default());
        let dataset = sample_dataset();

        let path = writer.write(&dataset, "077014").unwrap();
        assert_eq!(path, temp_dir.path().join("out/077014.parquet"));

        let read_back = ParquetReader::new(File::open(&path).unwrap())
            .finish()
            .unwrap();
        assert_eq!(read_back.height(), 3);

        let sidecar: serde_json::Value =
            serde_json::from_reader(File::open(writer.sidecar_path("077014")).unwrap()).unwrap();
        assert_eq!(sidecar["attributes"]["instrument_sn"], "077014");
        assert_eq!(sidecar["variables"][0]["canonical_name"], "temperature");
        assert_eq!(sidecar["rows"], 3);
    }

    #[test]
    fn test_write_csv_without_metadata() {
        let temp_dir = TempDir::new().unwrap();
        let config = ProcessorConfig::default()
            .with_output_format(OutputFormat::Csv)
            .without_metadata();
        let writer = TableWriter::new(temp_dir.path().to_path_buf(), &config);

        let path = writer.write(&sample_dataset(), "077014").unwrap();
        let text = fs::read_to_string(path).unwrap();
        assert!(text.starts_with("temperature"));
        assert_eq!(text.lines().count(), 4);
        assert!(!writer.sidecar_path("077014").exists());
    }

    #[test]
    fn test_output_stems_disambiguate() {
        let files = vec![
            PathBuf::from("pme/7450-001/Cat.TXT"),
            PathBuf::from("pme/7450-002/Cat.TXT"),
            PathBuf::from("ctd/cast_001.cnv"),
        ];
        let stems = output_stems(&files);

        assert_eq!(stems[&files[0]], "7450-001_Cat");
        assert_eq!(stems[&files[1]], "7450-002_Cat");
        assert_eq!(stems[&files[2]], "cast_001");
    }

    #[test]
    fn test_output_stems_numeric_suffix_when_parents_match() {
        let files = vec![
            PathBuf::from("2019/site_a/Cat.TXT"),
            PathBuf::from("2020/site_a/Cat.TXT"),
            PathBuf::from("2021/site_a/Cat.TXT"),
            PathBuf::from("2019/site_b/Cat.TXT"),
            PathBuf::from("other/site_a_Cat_2.txt"),
        ];
        let stems = output_stems(&files);

        assert_eq!(stems[&files[0]], "site_a_Cat");
        assert_eq!(stems[&files[1]], "site_a_Cat_3");
        assert_eq!(stems[&files[2]], "site_a_Cat_4");
        assert_eq!(stems[&files[3]], "site_b_Cat");
        assert_eq!(stems[&files[4]], "site_a_Cat_2");

        let unique: HashSet<&String> = stems.values().collect();
        assert_eq!(unique.len(), files.len());
    }
}
