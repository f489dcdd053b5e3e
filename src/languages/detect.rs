//! Language detection by file extension
//!
//! Only the top-level directory is inspected and only names are looked at.
//! The language with strictly the most matching files wins; ties are never
//! broken implicitly.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{adapter_for, LanguageAdapter};
use crate::error::DetectError;

/// Pick the adapter for `dir`, honouring an explicit override
pub fn resolve_language(
    dir: &Path,
    language: Option<&str>,
    adapters: &[Arc<dyn LanguageAdapter>],
) -> Result<Arc<dyn LanguageAdapter>, DetectError> {
    match language {
        Some(name) => {
            let adapter = adapter_for(adapters, name)?;
            debug!("Using language override {}", adapter.name());
            Ok(adapter)
        }
        None => detect(dir, adapters),
    }
}

pub fn detect(
    dir: &Path,
    adapters: &[Arc<dyn LanguageAdapter>],
) -> Result<Arc<dyn LanguageAdapter>, DetectError> {
    let counts = count_sources(dir, adapters);
    debug!("Source file counts in {:?}: {:?}", dir, counts);

    let max = counts.values().copied().max().unwrap_or(0);
    if max == 0 {
        return Err(DetectError::NoLanguageDetected {
            dir: dir.to_path_buf(),
        });
    }

    // BTreeMap keeps candidates sorted by name.
    let leaders: Vec<&str> = counts
        .iter()
        .filter(|(_, count)| **count == max)
        .map(|(name, _)| *name)
        .collect();

    if leaders.len() > 1 {
        return Err(DetectError::AmbiguousLanguage {
            candidates: leaders.iter().map(|s| s.to_string()).collect(),
        });
    }

    let adapter = adapter_for(adapters, leaders[0])?;
    info!("Detected language {} ({} files)", adapter.name(), max);
    Ok(adapter)
}

fn count_sources<'a>(
    dir: &Path,
    adapters: &'a [Arc<dyn LanguageAdapter>],
) -> BTreeMap<&'a str, usize> {
    let mut counts: BTreeMap<&str, usize> = adapters.iter().map(|a| (a.name(), 0)).collect();

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot read {:?}: {}", dir, e);
            return counts;
        }
    };

    for entry in entries.flatten() {
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        let name = entry.file_name();
        if !is_file || name.to_string_lossy().starts_with('.') {
            continue;
        }
        let path = Path::new(&name);
        for adapter in adapters {
            if adapter.is_source(path) {
                *counts.entry(adapter.name()).or_insert(0) += 1;
            }
        }
    }

    counts
}
