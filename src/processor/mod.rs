//! Batch processing of instrument files.
//!
//! Files are parsed on tokio's blocking pool with bounded concurrency and
//! optionally written as tables. One failing file never stops the batch;
//! every file gets a [`FileOutcome`] in the returned [`BatchReport`].

pub mod discovery;
pub mod merge;
pub mod writer;

#[cfg(test)]
pub mod tests;

use self::writer::{TableWriter, output_stems};

use crate::config::ProcessorConfig;
use crate::error::{OceanError, Result};
use crate::models::{InstrumentFormat, ProcessingStats};
use crate::pipeline::{ParseOptions, parse_file};

use colored::*;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::task;
use tracing::{debug, error, warn};

/// What happened to a single input file
#[derive(Debug)]
pub enum FileStatus {
    /// Parsed and written to `output`
    Written { output: PathBuf },
    /// Parsed without an output directory
    Parsed,
    /// Parsed to an empty dataset (soft format mismatch)
    Empty,
    /// Output already present and reprocessing not forced
    Skipped { output: PathBuf },
    Failed(OceanError),
}

#[derive(Debug)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub format: Option<InstrumentFormat>,
    pub rows: usize,
    pub warnings: Vec<String>,
    pub status: FileStatus,
}

impl FileOutcome {
    fn failed(path: PathBuf, error: OceanError) -> Self {
        Self {
            path,
            format: None,
            rows: 0,
            warnings: Vec::new(),
            status: FileStatus::Failed(error),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status, FileStatus::Failed(_))
    }
}

/// Per-file outcomes sorted by path, plus totals
#[derive(Debug)]
pub struct BatchReport {
    pub outcomes: Vec<FileOutcome>,
    pub stats: ProcessingStats,
}

impl BatchReport {
    pub fn failures(&self) -> impl Iterator<Item = &FileOutcome> {
        self.outcomes.iter().filter(|outcome| outcome.is_failure())
    }

    pub fn print_summary(&self) {
        let stats = &self.stats;
        println!("\n{}", "Processing Summary".bright_green().bold());
        println!(
            "  {} {}ms",
            "Time elapsed:".bright_cyan(),
            stats.processing_time_ms.to_string().bright_white()
        );
        println!(
            "  {} {}",
            "Files processed:".bright_cyan(),
            stats.files_processed.to_string().bright_white()
        );
        if stats.files_empty > 0 {
            println!(
                "  {} {}",
                "Empty datasets:".bright_yellow(),
                stats.files_empty.to_string().bright_yellow()
            );
        }
        if stats.files_failed > 0 {
            println!(
                "  {} {}",
                "Files failed:".bright_red(),
                stats.files_failed.to_string().bright_red().bold()
            );
            for outcome in self.failures() {
                if let FileStatus::Failed(e) = &outcome.status {
                    println!("    {} {}", outcome.path.display(), e.to_string().red());
                }
            }
        }
        println!(
            "  {} {}",
            "Total rows:".bright_cyan(),
            stats.total_rows.to_string().bright_white().bold()
        );
        println!(
            "  {} {}",
            "Warnings:".bright_cyan(),
            stats.total_warnings.to_string().bright_white()
        );
        if let Some(output) = &stats.output_path {
            println!("  {} {}", "Output:".bright_cyan(), output.display());
        }
    }
}

/// Concurrent parser/writer over a list of files
#[derive(Debug)]
pub struct BatchProcessor {
    config: Arc<ProcessorConfig>,
    options: ParseOptions,
    writer: Option<TableWriter>,
    show_progress: bool,
}

impl BatchProcessor {
    pub fn new(config: ProcessorConfig) -> Self {
        Self {
            config: Arc::new(config),
            options: ParseOptions::default(),
            writer: None,
            show_progress: true,
        }
    }

    pub fn with_options(mut self, options: ParseOptions) -> Self {
        self.options = options;
        self
    }

    /// Write each parsed dataset below `output_dir`
    pub fn with_output(mut self, output_dir: PathBuf) -> Self {
        self.writer = Some(TableWriter::new(output_dir, &self.config));
        self
    }

    pub fn without_progress(mut self) -> Self {
        self.show_progress = false;
        self
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::default_bar().template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        ) {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb.set_message("Processing files");
        pb
    }

    /// Parse (and write) every file
    pub async fn process_files(&self, files: &[PathBuf]) -> Result<BatchReport> {
        let start_time = Instant::now();
        if let Some(writer) = &self.writer {
            tokio::fs::create_dir_all(writer.output_dir()).await?;
        }

        let stems = Arc::new(output_stems(files));
        let concurrent_limit = self.config.workers.clamp(1, files.len().max(1));
        debug!(
            "Processing {} files with {} workers",
            files.len(),
            concurrent_limit
        );

        let pb = self.progress_bar(files.len());
        let mut outcomes: Vec<FileOutcome> = stream::iter(files.iter().cloned())
            .map(|path| {
                let config = Arc::clone(&self.config);
                let options = self.options.clone();
                let writer = self.writer.clone();
                let stems = Arc::clone(&stems);
                let pb = pb.clone();
                async move {
                    if let Some(file_name) = path.file_name() {
                        pb.set_message(format!("Processing: {}", file_name.to_string_lossy()));
                    }
                    let task_path = path.clone();
                    let outcome = task::spawn_blocking(move || {
                        let stem = stems.get(&task_path).cloned().unwrap_or_default();
                        process_single_file(&task_path, &stem, &options, &config, writer.as_ref())
                    })
                    .await
                    .unwrap_or_else(|e| {
                        FileOutcome::failed(
                            path.clone(),
                            OceanError::ProcessingFailed {
                                path: path.clone(),
                                reason: format!("worker task failed: {}", e),
                            },
                        )
                    });
                    pb.inc(1);
                    outcome
                }
            })
            .buffer_unordered(concurrent_limit)
            .collect()
            .await;
        pb.finish_with_message("Processing complete");

        outcomes.sort_by(|a, b| a.path.cmp(&b.path));
        let stats = self.collect_stats(&outcomes, start_time);
        Ok(BatchReport { outcomes, stats })
    }

    fn collect_stats(&self, outcomes: &[FileOutcome], start_time: Instant) -> ProcessingStats {
        outcomes.iter().fold(
            ProcessingStats {
                output_path: self.writer.as_ref().map(|w| w.output_dir().to_path_buf()),
                processing_time_ms: start_time.elapsed().as_millis(),
                ..ProcessingStats::default()
            },
            |mut stats, outcome| {
                match outcome.status {
                    FileStatus::Failed(_) => {
                        stats.files_failed += 1;
                        return stats;
                    }
                    FileStatus::Skipped { .. } => return stats,
                    FileStatus::Empty => stats.files_empty += 1,
                    FileStatus::Written { .. } | FileStatus::Parsed => {}
                }
                stats.files_processed += 1;
                stats.total_rows += outcome.rows;
                stats.total_warnings += outcome.warnings.len();
                stats
            },
        )
    }
}

/// Parse one file and write it when an output directory is configured
fn process_single_file(
    path: &Path,
    stem: &str,
    options: &ParseOptions,
    config: &ProcessorConfig,
    writer: Option<&TableWriter>,
) -> FileOutcome {
    if let Some(writer) = writer {
        let output = writer.table_path(stem);
        if output.exists() && !config.force_reprocess {
            debug!("Skipping {}, {} exists", path.display(), output.display());
            return FileOutcome {
                path: path.to_path_buf(),
                format: None,
                rows: 0,
                warnings: Vec::new(),
                status: FileStatus::Skipped { output },
            };
        }
    }

    let dataset = match parse_file(path, options, &config.parser) {
        Ok(dataset) => dataset,
        Err(e) => {
            if e.is_format_mismatch() {
                warn!("Not a recognized instrument file {}: {}", path.display(), e);
            } else {
                error!("Failed to process {}: {}", path.display(), e);
            }
            return FileOutcome::failed(path.to_path_buf(), e);
        }
    };

    let warnings: Vec<String> = dataset.warnings.iter().map(|w| w.to_string()).collect();
    let status = if dataset.is_empty() {
        warn!("Skipped file (no data): {}", path.display());
        FileStatus::Empty
    } else {
        match writer.map(|writer| writer.write(&dataset, stem)) {
            Some(Ok(output)) => FileStatus::Written { output },
            Some(Err(e)) => {
                error!("Failed to write {}: {}", path.display(), e);
                FileStatus::Failed(e)
            }
            None => FileStatus::Parsed,
        }
    };

    FileOutcome {
        path: path.to_path_buf(),
        format: Some(dataset.format),
        rows: dataset.row_count(),
        warnings,
        status,
    }
}
