//! Input file discovery.
//!
//! Inputs may be files, directories (searched recursively) or glob
//! patterns. Directory entries are filtered to the extensions instrument
//! software writes; explicitly named files are always kept.

use crate::error::{OceanError, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Extensions picked up when walking a directory
const INSTRUMENT_EXTENSIONS: &[&str] = &["cnv", "btl", "mon", "csv", "txt"];

/// File discovery over a list of input paths and patterns
#[derive(Debug)]
pub struct FileDiscovery {
    inputs: Vec<String>,
    /// Directory never searched, typically the output directory
    excluded: Option<PathBuf>,
}

impl FileDiscovery {
    pub fn new(inputs: Vec<String>) -> Self {
        Self {
            inputs,
            excluded: None,
        }
    }

    /// Skip everything below `dir`
    pub fn excluding(mut self, dir: impl Into<PathBuf>) -> Self {
        self.excluded = Some(dir.into());
        self
    }

    /// Resolve every input to a sorted, deduplicated list of files
    pub fn discover_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = BTreeSet::new();

        for input in &self.inputs {
            let path = Path::new(input);
            if path.is_dir() {
                files.extend(self.walk_directory(path));
            } else if path.is_file() {
                files.insert(path.to_path_buf());
            } else if is_pattern(input) {
                files.extend(self.expand_pattern(input)?);
            } else {
                return Err(OceanError::FileNotFound {
                    path: path.to_path_buf(),
                });
            }
        }

        debug!(
            "Discovered {} files from {} inputs",
            files.len(),
            self.inputs.len()
        );
        Ok(files.into_iter().collect())
    }

    fn is_excluded(&self, path: &Path) -> bool {
        self.excluded
            .as_deref()
            .is_some_and(|excluded| path.starts_with(excluded))
    }

    fn walk_directory(&self, dir: &Path) -> Vec<PathBuf> {
        WalkDir::new(dir)
            .follow_links(true)
            .into_iter()
            .filter_entry(|entry| !self.is_excluded(entry.path()))
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unreadable entry under {}: {}", dir.display(), e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| is_instrument_file(path))
            .collect()
    }

    fn expand_pattern(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        let entries = glob::glob(pattern).map_err(|e| OceanError::Configuration {
            message: format!("Invalid input pattern '{}': {}", pattern, e),
        })?;

        let files: Vec<PathBuf> = entries
            .filter_map(|entry| match entry {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!("Skipping unreadable match of {}: {}", pattern, e);
                    None
                }
            })
            .filter(|path| path.is_file() && !self.is_excluded(path))
            .collect();

        if files.is_empty() {
            warn!("Pattern '{}' matched no files", pattern);
        }
        Ok(files)
    }
}

fn is_pattern(input: &str) -> bool {
    input.contains(['*', '?', '['])
}

/// Check the extension against the known instrument extensions
pub fn is_instrument_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            INSTRUMENT_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}
