//! End-to-end batch runs over mixed instrument files

use super::{CNV, RTEXT, write_file};
use crate::config::{OutputFormat, ProcessorConfig};
use crate::models::InstrumentFormat;
use crate::processor::discovery::FileDiscovery;
use crate::processor::{BatchProcessor, FileStatus};
use std::fs;
use tempfile::TempDir;

fn processor(config: ProcessorConfig) -> BatchProcessor {
    BatchProcessor::new(config.with_workers(2)).without_progress()
}

#[tokio::test]
async fn test_mixed_formats_written() {
    let temp_dir = TempDir::new().unwrap();
    let raw = temp_dir.path().join("raw");
    write_file(&raw, "rbr/077014.txt", RTEXT);
    write_file(&raw, "ctd/cast_001.cnv", CNV);
    let output = temp_dir.path().join("out");

    let files = FileDiscovery::new(vec![raw.to_string_lossy().to_string()])
        .discover_files()
        .unwrap();
    let report = processor(ProcessorConfig::default())
        .with_output(output.clone())
        .process_files(&files)
        .await
        .unwrap();

    assert_eq!(report.stats.files_processed, 2);
    assert_eq!(report.stats.files_failed, 0);
    assert_eq!(report.stats.total_rows, 5);
    assert_eq!(report.stats.output_path.as_deref(), Some(output.as_path()));

    let formats: Vec<_> = report.outcomes.iter().map(|o| o.format).collect();
    assert_eq!(
        formats,
        vec![
            Some(InstrumentFormat::SeabirdCnv),
            Some(InstrumentFormat::RbrRText)
        ]
    );
    assert!(output.join("cast_001.parquet").exists());
    assert!(output.join("077014.parquet").exists());
    assert!(output.join("077014.metadata.json").exists());
}

#[tokio::test]
async fn test_parse_only_without_output() {
    let temp_dir = TempDir::new().unwrap();
    let file = write_file(temp_dir.path(), "rbr/077014.txt", RTEXT);

    let report = processor(ProcessorConfig::default())
        .process_files(&[file])
        .await
        .unwrap();

    assert!(matches!(report.outcomes[0].status, FileStatus::Parsed));
    assert_eq!(report.outcomes[0].rows, 3);
    assert!(report.stats.output_path.is_none());
}

#[tokio::test]
async fn test_existing_output_skipped_unless_forced() {
    let temp_dir = TempDir::new().unwrap();
    let file = write_file(temp_dir.path(), "raw/077014.txt", RTEXT);
    let output = temp_dir.path().join("out");
    let config = ProcessorConfig::default().with_output_format(OutputFormat::Csv);

    let first = processor(config.clone())
        .with_output(output.clone())
        .process_files(std::slice::from_ref(&file))
        .await
        .unwrap();
    assert!(matches!(first.outcomes[0].status, FileStatus::Written { .. }));

    let second = processor(config.clone())
        .with_output(output.clone())
        .process_files(std::slice::from_ref(&file))
        .await
        .unwrap();
    assert!(matches!(second.outcomes[0].status, FileStatus::Skipped { .. }));
    assert_eq!(second.stats.files_processed, 0);

    let forced = processor(config.with_force_reprocess())
        .with_output(output.clone())
        .process_files(&[file])
        .await
        .unwrap();
    assert!(matches!(forced.outcomes[0].status, FileStatus::Written { .. }));

    let text = fs::read_to_string(output.join("077014.csv")).unwrap();
    assert_eq!(text.lines().count(), 4);
}
