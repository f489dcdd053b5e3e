//! Check specification loading
//!
//! Resolution order: an explicit local path, then the grader checks root,
//! then the cache, refreshed from the remote service when stale, missing or
//! when an update is forced. Everything the runner relies on is validated
//! here.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::cache::SpecCache;
use super::steps::{Step, StepsBody};
use super::{CheckSpec, CheckSpecSet};
use crate::api::files::build_globset;
use crate::api::SpecFetcher;
use crate::core::Slug;
use crate::engine::workspace::is_relative_inside;
use crate::engine::Fixture;
use crate::error::{ApiError, LoadError};

pub const CHECKS_FILE: &str = "checks.toml";

/// Where a check specification set may come from
pub enum SpecSource {
    /// `--local`: a `checks.toml`, a directory holding one, or a root with
    /// `<slug>/checks.toml` below it. No network, no cache write.
    Local(PathBuf),
    /// Grader root first, then the cache backed by a remote fetcher
    Remote {
        checks_root: Option<PathBuf>,
        cache: SpecCache,
        fetcher: Arc<dyn SpecFetcher>,
        update: bool,
    },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ChecksFile {
    problem: Option<String>,
    #[serde(default)]
    files: Vec<String>,
    #[serde(default, rename = "check")]
    checks: Vec<CheckEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CheckEntry {
    name: String,
    description: Option<String>,
    #[serde(default)]
    requires: Vec<String>,
    /// Seconds
    timeout: Option<u64>,
    #[serde(default)]
    fixtures: Vec<String>,
    #[serde(default, rename = "step")]
    steps: Vec<Step>,
}

/// Resolve `slug` into a validated set for `language`
pub async fn load(slug: &Slug, language: &str, source: &SpecSource) -> Result<CheckSpecSet, LoadError> {
    match source {
        SpecSource::Local(path) => {
            let dir = resolve_local(path, slug)?;
            info!("Loading checks for {} from {:?}", slug, dir);
            load_dir(&dir, slug)
        }
        SpecSource::Remote {
            checks_root,
            cache,
            fetcher,
            update,
        } => {
            if let Some(root) = checks_root {
                let dir = root.join(slug.to_string());
                if dir.join(CHECKS_FILE).is_file() {
                    info!("Loading checks for {} from checks root {:?}", slug, dir);
                    return load_dir(&dir, slug);
                }
                debug!("{:?} has no checks for {}", root, slug);
            }
            let dir = cached_or_fetched(slug, language, cache, fetcher.as_ref(), *update).await?;
            load_dir(&dir, slug)
        }
    }
}

async fn cached_or_fetched(
    slug: &Slug,
    language: &str,
    cache: &SpecCache,
    fetcher: &dyn SpecFetcher,
    update: bool,
) -> Result<PathBuf, LoadError> {
    let dir = cache.entry_dir(slug, language)?;
    if !update && cache.is_fresh(&dir) {
        info!("Using cached checks for {} at {:?}", slug, dir);
        return Ok(dir);
    }

    let (course, stage) = slug.remote_parts()?;
    info!("Fetching checks for {} ({})", slug, language);
    match fetcher.fetch_checks(course, stage, language).await {
        Ok(bundle) => {
            cache.store(&dir, &bundle)?;
            Ok(dir)
        }
        Err(ApiError::Http { status: 404, .. }) => Err(LoadError::NotFound {
            slug: slug.to_string(),
        }),
        Err(err) if cache.is_complete(&dir) => {
            warn!("Failed to refresh checks for {} ({}), using stale cache", slug, err);
            Ok(dir)
        }
        Err(source) => Err(LoadError::Fetch {
            slug: slug.to_string(),
            source,
        }),
    }
}

/// Directory containing `checks.toml` for a `--local` argument
pub fn resolve_local(path: &Path, slug: &Slug) -> Result<PathBuf, LoadError> {
    if path.is_file() {
        return Ok(path.parent().map(Path::to_path_buf).unwrap_or_default());
    }
    if path.join(CHECKS_FILE).is_file() {
        return Ok(path.to_path_buf());
    }
    let nested = path.join(slug.to_string());
    if nested.join(CHECKS_FILE).is_file() {
        return Ok(nested);
    }
    Err(LoadError::NotFound {
        slug: slug.to_string(),
    })
}

/// Parse and validate `<dir>/checks.toml`
pub fn load_dir(dir: &Path, slug: &Slug) -> Result<CheckSpecSet, LoadError> {
    let path = dir.join(CHECKS_FILE);
    let bytes = fs::read(&path).map_err(|source| LoadError::Io {
        path: path.clone(),
        source,
    })?;
    let content = String::from_utf8(bytes.clone()).map_err(|e| LoadError::Parse {
        path: path.clone(),
        message: e.to_string(),
    })?;
    let file: ChecksFile = toml::from_str(&content).map_err(|e| LoadError::Parse {
        path: path.clone(),
        message: e.to_string(),
    })?;

    build_globset(&file.files).map_err(|e| LoadError::InvalidCheckSpec {
        reason: e.to_string(),
    })?;

    let version = content_version(&bytes);
    let problem = file
        .problem
        .unwrap_or_else(|| slug.problem().to_string());
    let set = build_set(dir, &slug.to_string(), &version, &problem, file.checks)?
        .with_extra_files(file.files);
    debug!("Loaded {} checks for {} (version {})", set.len(), slug, version);
    Ok(set)
}

fn build_set(
    dir: &Path,
    slug: &str,
    version: &str,
    problem: &str,
    entries: Vec<CheckEntry>,
) -> Result<CheckSpecSet, LoadError> {
    if entries.is_empty() {
        return Err(LoadError::InvalidCheckSpec {
            reason: "no checks declared".to_string(),
        });
    }

    let mut checks = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.steps.is_empty() {
            return Err(invalid(&entry.name, "has no steps"));
        }
        for step in &entry.steps {
            step.validate().map_err(|reason| invalid(&entry.name, &reason))?;
        }

        let mut fixtures = Vec::with_capacity(entry.fixtures.len());
        for fixture in &entry.fixtures {
            let rel = PathBuf::from(fixture);
            if !is_relative_inside(&rel) {
                return Err(invalid(&entry.name, &format!("fixture {} escapes the checks directory", fixture)));
            }
            let source = dir.join(&rel);
            if !source.is_file() {
                return Err(invalid(&entry.name, &format!("fixture {} not found", fixture)));
            }
            fixtures.push(Fixture { source, dest: rel });
        }

        let mut spec = CheckSpec::new(entry.name.clone(), StepsBody::new(entry.steps))
            .requires(entry.requires)
            .with_fixtures(fixtures);
        if let Some(description) = entry.description {
            spec = spec.with_description(description);
        }
        match entry.timeout {
            Some(0) => return Err(invalid(&entry.name, "timeout must be positive")),
            Some(secs) => spec = spec.with_timeout(Duration::from_secs(secs)),
            None => {}
        }
        checks.push(spec);
    }

    CheckSpecSet::new(slug, version, problem, checks)
}

fn invalid(check: &str, reason: &str) -> LoadError {
    LoadError::InvalidCheckSpec {
        reason: format!("check '{}' {}", check, reason),
    }
}

/// Hex SHA-256 of the specification bytes
pub fn content_version(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}
