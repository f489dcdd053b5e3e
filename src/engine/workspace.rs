//! Disposable per-check working copies
//!
//! The student's directory is the read-only template. Each check gets its own
//! copy (plus the fixture files it declares) which is removed when the
//! `Workspace` is dropped.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

/// Directory names never copied into a workspace
const SKIPPED_DIRS: &[&str] = &[".git", ".hg", ".svn", "target", "node_modules", "__pycache__"];

/// A fixture file copied from the check specification directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fixture {
    /// Absolute source path
    pub source: PathBuf,
    /// Destination relative to the workspace root
    pub dest: PathBuf,
}

pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Copy `template` and `fixtures` into a fresh temporary directory
    pub async fn materialize(template: &Path, fixtures: &[Fixture]) -> Result<Self> {
        let template = template.to_path_buf();
        let fixtures = fixtures.to_vec();
        tokio::task::spawn_blocking(move || Self::materialize_blocking(&template, &fixtures))
            .await
            .context("Workspace copy task panicked")?
    }

    fn materialize_blocking(template: &Path, fixtures: &[Fixture]) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("exercheck-")
            .tempdir()
            .context("Failed to create workspace directory")?;

        copy_tree(template, dir.path())
            .with_context(|| format!("Failed to copy {} into workspace", template.display()))?;

        for fixture in fixtures {
            if !is_relative_inside(&fixture.dest) {
                anyhow::bail!("Fixture path escapes the workspace: {}", fixture.dest.display());
            }
            let dest = dir.path().join(&fixture.dest);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(&fixture.source, &dest).with_context(|| {
                format!("Failed to copy fixture {}", fixture.source.display())
            })?;
        }

        debug!("Materialized workspace at {:?}", dir.path());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Whether `path` is relative and stays below its base
pub fn is_relative_inside(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}

fn copy_tree(src: &Path, dest: &Path) -> std::io::Result<()> {
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let name = entry.file_name();
        let target = dest.join(&name);

        if file_type.is_dir() {
            if SKIPPED_DIRS.iter().any(|skip| name == *skip) {
                continue;
            }
            fs::create_dir_all(&target)?;
            copy_tree(&entry.path(), &target)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)?;
        }
        // Symlinks are not followed.
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_copies_template_and_fixtures() {
        let template = TempDir::new().unwrap();
        fs::write(template.path().join("hello.c"), "int main(void) {}").unwrap();
        fs::create_dir_all(template.path().join("lib")).unwrap();
        fs::write(template.path().join("lib/util.c"), "").unwrap();
        fs::create_dir_all(template.path().join(".git")).unwrap();
        fs::write(template.path().join(".git/HEAD"), "ref").unwrap();

        let specs = TempDir::new().unwrap();
        fs::write(specs.path().join("input.txt"), "42").unwrap();
        let fixtures = vec![Fixture {
            source: specs.path().join("input.txt"),
            dest: PathBuf::from("data/input.txt"),
        }];

        let ws = Workspace::materialize(template.path(), &fixtures).await.unwrap();
        assert!(ws.path().join("hello.c").exists());
        assert!(ws.path().join("lib/util.c").exists());
        assert!(!ws.path().join(".git").exists());
        assert_eq!(
            fs::read_to_string(ws.path().join("data/input.txt")).unwrap(),
            "42"
        );
    }

    #[tokio::test]
    async fn test_workspace_removed_on_drop_and_template_untouched() {
        let template = TempDir::new().unwrap();
        fs::write(template.path().join("hello.py"), "print('hi')").unwrap();

        let ws = Workspace::materialize(template.path(), &[]).await.unwrap();
        let path = ws.path().to_path_buf();
        fs::write(path.join("hello.py"), "changed").unwrap();
        drop(ws);

        assert!(!path.exists());
        assert_eq!(
            fs::read_to_string(template.path().join("hello.py")).unwrap(),
            "print('hi')"
        );
    }

    #[tokio::test]
    async fn test_fixture_traversal_rejected() {
        let template = TempDir::new().unwrap();
        let fixtures = vec![Fixture {
            source: template.path().join("x"),
            dest: PathBuf::from("../escape"),
        }];
        assert!(Workspace::materialize(template.path(), &fixtures).await.is_err());
    }

    #[test]
    fn test_is_relative_inside() {
        assert!(is_relative_inside(Path::new("a/b.txt")));
        assert!(!is_relative_inside(Path::new("/etc/passwd")));
        assert!(!is_relative_inside(Path::new("a/../../b")));
        assert!(!is_relative_inside(Path::new("")));
    }
}
