//! Submission file collection

use std::fs;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose, Engine as _};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::Serialize;
use tracing::debug;

use crate::error::SubmitError;
use crate::languages::{walk_sources, LanguageAdapter};

/// Maximum size of a single submitted file
pub const MAX_FILE_SIZE: u64 = 1024 * 1024;

/// Maximum size of all submitted files together
pub const MAX_TOTAL_SIZE: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitFile {
    /// Relative path with `/` separators
    pub path: String,
    /// Base64-encoded content
    pub content: String,
    #[serde(skip)]
    pub size: u64,
}

/// Files to submit: the adapter's sources plus any matching `patterns`,
/// sorted and deduplicated
pub fn submission_paths(
    root: &Path,
    adapter: &dyn LanguageAdapter,
    patterns: &[String],
) -> Result<Vec<PathBuf>, SubmitError> {
    let io_err = |source| SubmitError::Io {
        path: root.to_path_buf(),
        source,
    };
    let mut paths = adapter.discover_files(root).map_err(io_err)?;

    if !patterns.is_empty() {
        let globs = build_globset(patterns)?;
        walk_sources(root, Path::new(""), &mut |rel| {
            if globs.is_match(slash_path(rel)) {
                paths.push(rel.to_path_buf());
            }
        })
        .map_err(io_err)?;
    }

    paths.sort();
    paths.dedup();
    Ok(paths)
}

/// Read, size-check and encode `paths` (relative to `root`)
pub fn collect_files(root: &Path, paths: &[PathBuf]) -> Result<Vec<SubmitFile>, SubmitError> {
    if paths.is_empty() {
        return Err(SubmitError::NoFiles);
    }

    let mut files = Vec::with_capacity(paths.len());
    let mut total: u64 = 0;
    for rel in paths {
        let full = root.join(rel);
        let io_err = |source| SubmitError::Io {
            path: full.clone(),
            source,
        };
        let size = fs::metadata(&full).map_err(io_err)?.len();
        if size > MAX_FILE_SIZE {
            return Err(SubmitError::FileTooLarge {
                path: slash_path(rel),
                size,
                max: MAX_FILE_SIZE,
            });
        }
        total += size;
        if total > MAX_TOTAL_SIZE {
            return Err(SubmitError::TotalTooLarge {
                total,
                max: MAX_TOTAL_SIZE,
            });
        }

        let bytes = fs::read(&full).map_err(io_err)?;
        files.push(SubmitFile {
            path: slash_path(rel),
            content: general_purpose::STANDARD.encode(&bytes),
            size,
        });
    }

    debug!("Collected {} files ({} bytes)", files.len(), total);
    Ok(files)
}

fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Compile submission patterns. `*` and `?` stay within one path segment,
/// `**` crosses segments.
pub fn build_globset(patterns: &[String]) -> Result<GlobSet, SubmitError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| SubmitError::InvalidPattern {
                pattern: pattern.clone(),
                message: e.kind().to_string(),
            })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| SubmitError::InvalidPattern {
        pattern: patterns.join(", "),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages::{adapter_for, all_adapters};
    use tempfile::TempDir;

    #[test]
    fn test_collect_encodes_content() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("hello.py"), "print('hi')\n").unwrap();
        let files = collect_files(dir.path(), &[PathBuf::from("hello.py")]).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "hello.py");
        assert_eq!(files[0].size, 12);
        assert_eq!(
            general_purpose::STANDARD.decode(&files[0].content).unwrap(),
            b"print('hi')\n"
        );
    }

    #[test]
    fn test_empty_file_list_rejected() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(collect_files(dir.path(), &[]), Err(SubmitError::NoFiles)));
    }

    #[test]
    fn test_file_size_limit() {
        let dir = TempDir::new().unwrap();
        let big = vec![b'x'; (MAX_FILE_SIZE + 1) as usize];
        fs::write(dir.path().join("big.c"), big).unwrap();
        assert!(matches!(
            collect_files(dir.path(), &[PathBuf::from("big.c")]),
            Err(SubmitError::FileTooLarge { .. })
        ));
    }

    #[test]
    fn test_total_size_limit() {
        let dir = TempDir::new().unwrap();
        let chunk = vec![b'x'; MAX_FILE_SIZE as usize];
        let mut paths = Vec::new();
        for i in 0..11 {
            let name = format!("part{}.c", i);
            fs::write(dir.path().join(&name), &chunk).unwrap();
            paths.push(PathBuf::from(name));
        }
        assert!(matches!(
            collect_files(dir.path(), &paths),
            Err(SubmitError::TotalTooLarge { .. })
        ));
    }

    #[test]
    fn test_submission_paths_include_patterns() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("hello.c"), "").unwrap();
        fs::write(dir.path().join("hello.o"), "").unwrap();
        fs::write(dir.path().join("answers.txt"), "").unwrap();
        fs::create_dir_all(dir.path().join("notes")).unwrap();
        fs::write(dir.path().join("notes/todo.txt"), "").unwrap();

        let adapters = all_adapters().unwrap();
        let c = adapter_for(&adapters, "c").unwrap();
        let paths = submission_paths(dir.path(), c.as_ref(), &["*.txt".to_string()]).unwrap();
        assert_eq!(
            paths,
            vec![PathBuf::from("answers.txt"), PathBuf::from("hello.c")]
        );

        let paths = submission_paths(dir.path(), c.as_ref(), &["**/*.txt".to_string()]).unwrap();
        assert_eq!(paths.len(), 3);
    }

    #[test]
    fn test_globset_stays_within_segment() {
        let globs = build_globset(&["data/?.csv".to_string()]).unwrap();
        assert!(globs.is_match("data/a.csv"));
        assert!(!globs.is_match("data/ab.csv"));
        assert!(!globs.is_match("other/data/a.csv"));

        let globs = build_globset(&["*.txt".to_string()]).unwrap();
        assert!(globs.is_match("answers.txt"));
        assert!(!globs.is_match("notes/todo.txt"));
    }

    #[test]
    fn test_invalid_pattern_is_an_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("hello.c"), "").unwrap();
        let adapters = all_adapters().unwrap();
        let c = adapter_for(&adapters, "c").unwrap();
        let err = submission_paths(dir.path(), c.as_ref(), &["[*.txt".to_string()]).unwrap_err();
        assert!(matches!(err, SubmitError::InvalidPattern { ref pattern, .. } if pattern == "[*.txt"));
    }
}
