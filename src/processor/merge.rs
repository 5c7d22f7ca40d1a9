//! Merging of MiniDOT txt series.
//!
//! A MiniDOT logger writes one txt file per time block into a folder named
//! after the instrument. The blocks of a folder are parsed one by one and
//! concatenated in time order, every row tagged with the software version,
//! serial number and calibration of the file it came from.

use super::writer::TableWriter;
use super::{BatchProcessor, BatchReport, FileOutcome, FileStatus};

use crate::config::{ParserConfig, ProcessorConfig};
use crate::constants::TIME_VARIABLE;
use crate::error::{OceanError, Result};
use crate::formats::detect_format;
use crate::models::{ColumnDescriptor, InstrumentFormat, MetaValue, NormalizedDataset};
use crate::pipeline::{ParseOptions, parse_file};

use polars::prelude::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::task;
use tracing::{debug, error, info, warn};

/// Per-row columns added to a merged series, with the metadata key they copy
pub const FILE_COLUMNS: [(&str, &str); 3] = [
    ("software_version", "software_version"),
    ("serial_number", "instrument_sn"),
    ("calibration", "instrument_calibration"),
];

/// Parse MiniDOT txt files and concatenate them into one dataset.
///
/// Files that turn out not to be MiniDOT txt files are skipped with their
/// warning kept on the result. The merged metadata is the first file's,
/// plus the list of merged file names.
pub fn merge_minidot_files(
    paths: &[PathBuf],
    options: &ParseOptions,
    config: &ParserConfig,
) -> Result<NormalizedDataset> {
    let options = options.clone().with_format(InstrumentFormat::MiniDot);
    let mut merged: Option<NormalizedDataset> = None;
    let mut frames = Vec::with_capacity(paths.len());
    let mut skipped = Vec::new();
    let mut file_names = Vec::new();

    for path in paths {
        let dataset = parse_file(path, &options, config)?;
        if dataset.is_empty() {
            warn!("Skipped {} while merging: no MiniDOT data", path.display());
            skipped.extend(dataset.warnings);
            continue;
        }

        let tags: Vec<Expr> = FILE_COLUMNS
            .iter()
            .map(|(column, key)| {
                lit(dataset.metadata.get_text(key).unwrap_or_default().to_string()).alias(*column)
            })
            .collect();
        frames.push(dataset.data.clone().lazy().with_columns(tags));
        file_names.push(MetaValue::Text(
            path.file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default(),
        ));

        if let Some(base) = merged.as_mut() {
            for warning in dataset.warnings {
                base.warn(warning);
            }
        } else {
            merged = Some(dataset);
        }
    }

    let Some(mut base) = merged else {
        return Err(OceanError::ProcessingFailed {
            path: common_directory(paths),
            reason: "no MiniDOT txt data to merge".to_string(),
        });
    };

    let args = UnionArgs {
        to_supertypes: true,
        diagonal: true,
        ..UnionArgs::default()
    };
    let mut combined = concat(frames, args)?;
    if base.data.column(TIME_VARIABLE).is_ok() {
        combined = combined.sort([TIME_VARIABLE], SortMultipleOptions::default());
    }
    base.data = combined.collect()?;

    for (column, _) in FILE_COLUMNS {
        let mut descriptor = ColumnDescriptor::raw(column);
        descriptor.canonical_name = column.to_string();
        descriptor.ignored = true;
        base.columns.push(descriptor);
    }
    for warning in skipped {
        base.warn(warning);
    }

    let count = file_names.len();
    base.source = common_directory(paths);
    base.metadata.insert("merged_files", MetaValue::List(file_names));
    base.add_history(format!("Merged {} MiniDOT txt files", count));
    info!(
        "Merged {} MiniDOT files into {} rows from {}",
        count,
        base.row_count(),
        base.source.display()
    );
    Ok(base)
}

fn common_directory(paths: &[PathBuf]) -> PathBuf {
    paths
        .first()
        .and_then(|path| path.parent())
        .map(Path::to_path_buf)
        .unwrap_or_default()
}

/// MiniDOT txt files grouped by their directory
pub fn group_minidot_files(files: &[PathBuf]) -> BTreeMap<PathBuf, Vec<PathBuf>> {
    let mut groups: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
    for file in files {
        match detect_format(file) {
            Ok(InstrumentFormat::MiniDot) => groups
                .entry(file.parent().map(Path::to_path_buf).unwrap_or_default())
                .or_default()
                .push(file.clone()),
            Ok(format) => debug!("Not merging {} ({})", file.display(), format),
            Err(e) => debug!("Not merging {}: {}", file.display(), e),
        }
    }
    for paths in groups.values_mut() {
        paths.sort();
    }
    groups
}

fn merge_directory(
    directory: &Path,
    paths: &[PathBuf],
    options: &ParseOptions,
    config: &ProcessorConfig,
    writer: Option<&TableWriter>,
) -> FileOutcome {
    let dataset = match merge_minidot_files(paths, options, &config.parser) {
        Ok(dataset) => dataset,
        Err(e) => {
            error!("Failed to merge {}: {}", directory.display(), e);
            return FileOutcome::failed(directory.to_path_buf(), e);
        }
    };

    let stem = directory
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "minidot".to_string());
    let status = match writer.map(|writer| writer.write(&dataset, &stem)) {
        Some(Ok(output)) => FileStatus::Written { output },
        Some(Err(e)) => {
            error!("Failed to write {}: {}", directory.display(), e);
            FileStatus::Failed(e)
        }
        None => FileStatus::Parsed,
    };

    FileOutcome {
        path: directory.to_path_buf(),
        format: Some(InstrumentFormat::MiniDot),
        rows: dataset.row_count(),
        warnings: dataset.warnings.iter().map(|w| w.to_string()).collect(),
        status,
    }
}

impl BatchProcessor {
    /// Merge the MiniDOT txt files of each directory into one table per
    /// directory, named after the directory. Other files are ignored.
    pub async fn merge_minidot(&self, files: &[PathBuf]) -> Result<BatchReport> {
        let start_time = Instant::now();
        if let Some(writer) = &self.writer {
            tokio::fs::create_dir_all(writer.output_dir()).await?;
        }

        let groups = group_minidot_files(files);
        debug!("Merging MiniDOT files of {} directories", groups.len());
        let pb = self.progress_bar(groups.len());

        let mut outcomes = Vec::with_capacity(groups.len());
        for (directory, paths) in groups {
            pb.set_message(format!("Merging: {}", directory.display()));
            let options = self.options.clone();
            let config = Arc::clone(&self.config);
            let writer = self.writer.clone();
            let task_directory = directory.clone();
            let outcome = task::spawn_blocking(move || {
                merge_directory(&task_directory, &paths, &options, &config, writer.as_ref())
            })
            .await
            .unwrap_or_else(|e| {
                FileOutcome::failed(
                    directory.clone(),
                    OceanError::ProcessingFailed {
                        path: directory.clone(),
                        reason: format!("worker task failed: {}", e),
                    },
                )
            });
            pb.inc(1);
            outcomes.push(outcome);
        }
        pb.finish_with_message("Merging complete");

        let stats = self.collect_stats(&outcomes, start_time);
        Ok(BatchReport { outcomes, stats })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::tests::write_file;
    use tempfile::TempDir;

    fn block(calibration: &str, start: i64) -> String {
        format!(
            "7450-617000\nOS REV: 2.31 Sensor Cal: {}\nTime (sec),  T (deg C),  DO (mg/l),  Q ()\n{},  10.1,  8.4,  0.98\n{},  10.2,  8.3,  0.97\n",
            calibration,
            start,
            start + 600
        )
    }

    fn text_values(dataset: &NormalizedDataset, name: &str) -> Vec<Option<String>> {
        dataset
            .data
            .column(name)
            .unwrap()
            .str()
            .unwrap()
            .into_iter()
            .map(|value| value.map(str::to_string))
            .collect()
    }

    #[test]
    fn test_merge_tags_rows_with_file_calibration() {
        let temp_dir = TempDir::new().unwrap();
        let directory = temp_dir.path().join("7450-617000");
        // Written out of time order; the merge sorts by time
        let later = write_file(&directory, "2019-05-02 000000Z.txt", &block("617001", 1_556_755_200));
        let earlier = write_file(&directory, "2019-05-01 000000Z.txt", &block("617000", 1_556_668_800));

        let dataset = merge_minidot_files(
            &[later, earlier],
            &ParseOptions::default(),
            ParserConfig::builtin(),
        )
        .unwrap();

        assert_eq!(dataset.row_count(), 4);
        assert_eq!(dataset.source, directory);
        assert_eq!(
            text_values(&dataset, "calibration"),
            vec![
                Some("617000".to_string()),
                Some("617000".to_string()),
                Some("617001".to_string()),
                Some("617001".to_string()),
            ]
        );
        assert_eq!(
            text_values(&dataset, "serial_number")[0].as_deref(),
            Some("7450-617000")
        );
        assert_eq!(
            text_values(&dataset, "software_version")[3].as_deref(),
            Some("2.31")
        );
        assert!(dataset.column("calibration").is_some_and(|c| c.ignored));
        assert!(matches!(
            dataset.metadata.get("merged_files"),
            Some(MetaValue::List(files)) if files.len() == 2
        ));
        assert!(dataset.history.iter().any(|entry| entry.contains("Merged 2")));
    }

    #[test]
    fn test_merge_skips_other_text_and_fails_when_nothing_left() {
        let temp_dir = TempDir::new().unwrap();
        let good = write_file(temp_dir.path(), "a.txt", &block("617000", 1_556_668_800));
        let notes = write_file(temp_dir.path(), "notes.txt", "field notes\nno data here\n");

        let dataset = merge_minidot_files(
            &[good, notes.clone()],
            &ParseOptions::default(),
            ParserConfig::builtin(),
        )
        .unwrap();
        assert_eq!(dataset.row_count(), 2);

        let result = merge_minidot_files(&[notes], &ParseOptions::default(), ParserConfig::builtin());
        assert!(matches!(result, Err(OceanError::ProcessingFailed { .. })));
    }

    #[tokio::test]
    async fn test_merge_minidot_writes_one_table_per_directory() {
        let temp_dir = TempDir::new().unwrap();
        let first = temp_dir.path().join("raw/7450-617000");
        let second = temp_dir.path().join("raw/7450-999000");
        let files = vec![
            write_file(&first, "2019-05-01 000000Z.txt", &block("617000", 1_556_668_800)),
            write_file(&first, "2019-05-02 000000Z.txt", &block("617001", 1_556_755_200)),
            write_file(&second, "2019-05-01 000000Z.txt", &block("999000", 1_556_668_800)),
            write_file(temp_dir.path(), "raw/cast.cnv", crate::processor::tests::CNV),
        ];
        let output = temp_dir.path().join("out");

        let report = BatchProcessor::new(ProcessorConfig::default())
            .without_progress()
            .with_output(output.clone())
            .merge_minidot(&files)
            .await
            .unwrap();

        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.stats.files_processed, 2);
        assert_eq!(report.stats.total_rows, 6);
        assert!(output.join("7450-617000.parquet").exists());
        assert!(output.join("7450-999000.parquet").exists());
    }
}
