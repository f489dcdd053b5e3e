//! On-disk cache of remote check specification sets
//!
//! Layout: `<root>/<course>/<language>/<stage>/` holding the fetched files
//! and a `.version` marker. The marker is written last, so an entry without
//! one is incomplete and treated as absent.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use base64::{engine::general_purpose, Engine as _};
use tracing::{debug, info};

use crate::api::ChecksBundle;
use crate::core::Slug;
use crate::engine::workspace::is_relative_inside;
use crate::error::LoadError;

const VERSION_MARKER: &str = ".version";

#[derive(Debug, Clone)]
pub struct SpecCache {
    root: PathBuf,
    ttl: Duration,
}

/// One cached set, as listed by `cache list`
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub course: String,
    pub language: String,
    pub stage: String,
    pub version: String,
    pub age: Duration,
}

impl SpecCache {
    pub fn new(root: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            root: root.into(),
            ttl,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_dir(&self, slug: &Slug, language: &str) -> Result<PathBuf, LoadError> {
        let (course, stage) = slug.remote_parts()?;
        Ok(self.root.join(course).join(language).join(stage))
    }

    /// Whether `dir` holds a complete entry
    pub fn is_complete(&self, dir: &Path) -> bool {
        dir.join(VERSION_MARKER).is_file()
    }

    /// Complete and younger than the TTL
    pub fn is_fresh(&self, dir: &Path) -> bool {
        match marker_age(dir) {
            Some(age) => age < self.ttl,
            None => false,
        }
    }

    /// Replace the entry at `dir` with the files of `bundle`
    pub fn store(&self, dir: &Path, bundle: &ChecksBundle) -> Result<(), LoadError> {
        let parent = dir.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent).map_err(|source| io_error(parent, source))?;

        // Stage into a sibling directory so a failed write never leaves a
        // half-populated entry behind.
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(parent)
            .map_err(|source| io_error(parent, source))?;

        for file in &bundle.files {
            let rel = Path::new(&file.path);
            if !is_relative_inside(rel) {
                return Err(LoadError::InvalidCheckSpec {
                    reason: format!("bundle file escapes the checks directory: {}", file.path),
                });
            }
            let bytes = general_purpose::STANDARD
                .decode(&file.content)
                .map_err(|e| LoadError::InvalidCheckSpec {
                    reason: format!("failed to decode {}: {}", file.path, e),
                })?;
            let dest = staging.path().join(rel);
            if let Some(dest_parent) = dest.parent() {
                fs::create_dir_all(dest_parent).map_err(|source| io_error(dest_parent, source))?;
            }
            fs::write(&dest, bytes).map_err(|source| io_error(&dest, source))?;
        }

        let marker = staging.path().join(VERSION_MARKER);
        fs::write(&marker, &bundle.version).map_err(|source| io_error(&marker, source))?;

        if dir.exists() {
            fs::remove_dir_all(dir).map_err(|source| io_error(dir, source))?;
        }
        fs::rename(staging.path(), dir).map_err(|source| io_error(dir, source))?;

        info!(
            "Cached {} files (version {}) at {:?}",
            bundle.files.len(),
            bundle.version,
            dir
        );
        Ok(())
    }

    /// Every complete entry, sorted by course, language and stage
    pub fn list(&self) -> Result<Vec<CacheEntry>, LoadError> {
        let mut entries = Vec::new();
        if !self.root.is_dir() {
            return Ok(entries);
        }
        self.collect_entries(&self.root, &mut entries)?;
        entries.sort_by(|a, b| {
            (&a.course, &a.language, &a.stage).cmp(&(&b.course, &b.language, &b.stage))
        });
        Ok(entries)
    }

    fn collect_entries(&self, dir: &Path, entries: &mut Vec<CacheEntry>) -> Result<(), LoadError> {
        if self.is_complete(dir) {
            if let Some(entry) = self.describe(dir) {
                entries.push(entry);
            }
            return Ok(());
        }
        let read = fs::read_dir(dir).map_err(|source| io_error(dir, source))?;
        for child in read.flatten() {
            let name = child.file_name();
            if name.to_string_lossy().starts_with('.') {
                continue;
            }
            if child.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                self.collect_entries(&child.path(), entries)?;
            }
        }
        Ok(())
    }

    fn describe(&self, dir: &Path) -> Option<CacheEntry> {
        let rel = dir.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if parts.len() < 3 {
            return None;
        }
        let version = fs::read_to_string(dir.join(VERSION_MARKER)).ok()?;
        Some(CacheEntry {
            course: parts[0].clone(),
            language: parts[1].clone(),
            stage: parts[2..].join("/"),
            version: version.trim().to_string(),
            age: marker_age(dir).unwrap_or_default(),
        })
    }

    /// Remove cached sets; everything, one slug, or one slug in one
    /// language. Returns the number of entries removed.
    pub fn clear(&self, slug: Option<&Slug>, language: Option<&str>) -> Result<usize, LoadError> {
        let targets: Vec<CacheEntry> = self
            .list()?
            .into_iter()
            .filter(|entry| match slug {
                Some(slug) => {
                    slug.course.as_deref() == Some(entry.course.as_str()) && slug.stage == entry.stage
                }
                None => true,
            })
            .filter(|entry| language.map_or(true, |lang| lang == entry.language))
            .collect();

        if slug.is_none() && language.is_none() {
            if self.root.exists() {
                fs::remove_dir_all(&self.root).map_err(|source| io_error(&self.root, source))?;
            }
            debug!("Cleared checks cache at {:?}", self.root);
            return Ok(targets.len());
        }

        for entry in &targets {
            let dir = self
                .root
                .join(&entry.course)
                .join(&entry.language)
                .join(&entry.stage);
            fs::remove_dir_all(&dir).map_err(|source| io_error(&dir, source))?;
            debug!("Removed cached checks {:?}", dir);
        }
        Ok(targets.len())
    }
}

fn marker_age(dir: &Path) -> Option<Duration> {
    let modified = fs::metadata(dir.join(VERSION_MARKER)).ok()?.modified().ok()?;
    Some(
        SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default(),
    )
}

fn io_error(path: &Path, source: std::io::Error) -> LoadError {
    LoadError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::BundleFile;
    use tempfile::TempDir;

    fn bundle(version: &str, files: &[(&str, &str)]) -> ChecksBundle {
        ChecksBundle {
            version: version.to_string(),
            files: files
                .iter()
                .map(|(path, content)| BundleFile {
                    path: path.to_string(),
                    content: general_purpose::STANDARD.encode(content),
                })
                .collect(),
        }
    }

    #[test]
    fn test_store_and_list() {
        let root = TempDir::new().unwrap();
        let cache = SpecCache::new(root.path(), Duration::from_secs(3600));
        let slug = Slug::parse("cs50/hello").unwrap();
        let dir = cache.entry_dir(&slug, "c").unwrap();
        assert!(!cache.is_fresh(&dir));

        cache
            .store(&dir, &bundle("v1", &[("checks.toml", "[[check]]"), ("data/in.txt", "42")]))
            .unwrap();
        assert!(cache.is_fresh(&dir));
        assert_eq!(fs::read_to_string(dir.join("data/in.txt")).unwrap(), "42");

        let entries = cache.list().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].course, "cs50");
        assert_eq!(entries[0].language, "c");
        assert_eq!(entries[0].stage, "hello");
        assert_eq!(entries[0].version, "v1");
    }

    #[test]
    fn test_store_replaces_previous_entry() {
        let root = TempDir::new().unwrap();
        let cache = SpecCache::new(root.path(), Duration::from_secs(3600));
        let dir = cache
            .entry_dir(&Slug::parse("cs50/hello").unwrap(), "python")
            .unwrap();
        cache.store(&dir, &bundle("v1", &[("old.txt", "x")])).unwrap();
        cache.store(&dir, &bundle("v2", &[("checks.toml", "")])).unwrap();
        assert!(!dir.join("old.txt").exists());
        assert_eq!(cache.list().unwrap()[0].version, "v2");
    }

    #[test]
    fn test_zero_ttl_is_never_fresh() {
        let root = TempDir::new().unwrap();
        let cache = SpecCache::new(root.path(), Duration::ZERO);
        let dir = cache.entry_dir(&Slug::parse("cs50/hello").unwrap(), "c").unwrap();
        cache.store(&dir, &bundle("v1", &[])).unwrap();
        assert!(cache.is_complete(&dir));
        assert!(!cache.is_fresh(&dir));
    }

    #[test]
    fn test_traversal_rejected() {
        let root = TempDir::new().unwrap();
        let cache = SpecCache::new(root.path(), Duration::from_secs(3600));
        let dir = cache.entry_dir(&Slug::parse("cs50/hello").unwrap(), "c").unwrap();
        let err = cache.store(&dir, &bundle("v1", &[("../../evil", "x")])).unwrap_err();
        assert!(matches!(err, LoadError::InvalidCheckSpec { .. }));
        assert!(!dir.exists());
    }

    #[test]
    fn test_clear_by_slug() {
        let root = TempDir::new().unwrap();
        let cache = SpecCache::new(root.path(), Duration::from_secs(3600));
        let hello = Slug::parse("cs50/hello").unwrap();
        let mario = Slug::parse("cs50/mario-less").unwrap();
        for (slug, lang) in [(&hello, "c"), (&hello, "python"), (&mario, "c")] {
            let dir = cache.entry_dir(slug, lang).unwrap();
            cache.store(&dir, &bundle("v1", &[])).unwrap();
        }

        assert_eq!(cache.clear(Some(&hello), Some("c")).unwrap(), 1);
        assert_eq!(cache.list().unwrap().len(), 2);
        assert_eq!(cache.clear(Some(&hello), None).unwrap(), 1);
        assert_eq!(cache.clear(None, None).unwrap(), 1);
        assert!(cache.list().unwrap().is_empty());
    }
}
