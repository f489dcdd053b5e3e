//! Language adapters
//!
//! The runner and the submission flow only ever see `dyn LanguageAdapter`.
//! Each built-in language has one concrete adapter; toolchain commands come
//! from the embedded `files/languages.toml` table so they can be tuned
//! without touching adapter code.

pub mod c;
pub mod detect;
pub mod java;
pub mod naming;
pub mod python;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;

use crate::engine::compiler::{compile, BuildResult};
use crate::engine::executer::{execute, ExecutionSpec, ExecutionStatus};
use crate::error::{DetectError, ToolchainError};

pub use c::CAdapter;
pub use detect::{detect, resolve_language};
pub use java::JavaAdapter;
pub use python::PythonAdapter;

/// Directories never searched for source files
const IGNORED_DIRS: &[&str] = &["target", "build", "node_modules", "__pycache__"];

/// Toolchain configuration for a supported programming language
#[derive(Debug, Clone)]
pub struct LanguageConfig {
    /// Canonical language name (e.g., "c")
    pub name: String,
    /// Source extensions without the leading dot
    pub extensions: Vec<String>,
    /// Build artifact extensions, excluded from discovery
    pub artifacts: Vec<String>,
    /// Compile command template (None if not needed)
    pub compile_command: Option<Vec<String>>,
    /// Run command template
    pub run_command: Vec<String>,
    /// Alternative names accepted by `--language`
    pub aliases: Vec<String>,
}

impl LanguageConfig {
    pub fn matches_name(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.name == name || self.aliases.iter().any(|alias| *alias == name)
    }
}

/// Raw TOML configuration for a language
#[derive(Debug, Deserialize)]
struct RawLanguageConfig {
    extensions: Vec<String>,
    #[serde(default)]
    artifacts: Vec<String>,
    compile_command: Option<String>,
    run_command: String,
    #[serde(default)]
    aliases: Vec<String>,
}

/// Global language configurations
static LANGUAGES: OnceLock<HashMap<String, LanguageConfig>> = OnceLock::new();

const EMBEDDED_LANGUAGES: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/languages.toml"));

/// Parsed toolchain table, loaded once per process
pub fn language_configs() -> anyhow::Result<&'static HashMap<String, LanguageConfig>> {
    if let Some(table) = LANGUAGES.get() {
        return Ok(table);
    }
    let parsed = parse_languages(EMBEDDED_LANGUAGES).context("Invalid embedded languages.toml")?;
    Ok(LANGUAGES.get_or_init(|| parsed))
}

fn parse_languages(content: &str) -> anyhow::Result<HashMap<String, LanguageConfig>> {
    let raw_configs: HashMap<String, RawLanguageConfig> = toml::from_str(content)?;

    let mut languages = HashMap::new();
    for (name, raw) in raw_configs {
        if raw.extensions.is_empty() {
            anyhow::bail!("Language {} declares no extensions", name);
        }
        let run_command = into_command(&raw.run_command);
        if run_command.is_empty() {
            anyhow::bail!("Language {} has an empty run_command", name);
        }

        let name = name.to_lowercase();
        let config = LanguageConfig {
            name: name.clone(),
            extensions: raw.extensions.iter().map(|e| normalize_ext(e)).collect(),
            artifacts: raw.artifacts.iter().map(|e| normalize_ext(e)).collect(),
            compile_command: raw.compile_command.map(|cmd| into_command(&cmd)),
            run_command,
            aliases: raw.aliases.iter().map(|a| a.to_lowercase()).collect(),
        };
        languages.insert(name, config);
    }

    Ok(languages)
}

fn normalize_ext(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

fn into_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(|s| s.to_string()).collect()
}

/// Substitute `{name}` placeholders in a command template
pub fn expand_command(template: &[String], vars: &[(&str, &str)]) -> Vec<String> {
    template
        .iter()
        .map(|part| {
            vars.iter().fold(part.clone(), |acc, (key, value)| {
                acc.replace(&format!("{{{}}}", key), value)
            })
        })
        .collect()
}

/// Outcome of running the program under test
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    pub stdout: String,
    pub stderr: String,
    /// None when the program was killed (signal or timeout)
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub time_ms: u64,
}

/// Arguments for one invocation of the program under test
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub args: Vec<String>,
    pub stdin: Option<String>,
    pub timeout: Duration,
}

impl RunRequest {
    pub fn new(timeout: Duration) -> Self {
        Self {
            args: Vec::new(),
            stdin: None,
            timeout,
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }
}

/// Capability contract every language implements
#[async_trait]
pub trait LanguageAdapter: Send + Sync + std::fmt::Debug {
    /// Toolchain configuration backing this adapter
    fn config(&self) -> &LanguageConfig;

    /// Map a logical exercise name to this language's entry file name
    fn resolve_entry_name(&self, logical_name: &str) -> String;

    /// Placeholder values for command templates
    fn command_vars(&self, logical_name: &str) -> Vec<(&'static str, String)>;

    fn name(&self) -> &str {
        &self.config().name
    }

    fn extensions(&self) -> &[String] {
        &self.config().extensions
    }

    fn is_compiled(&self) -> bool {
        self.config().compile_command.is_some()
    }

    /// Whether `path` has one of this language's source extensions
    fn is_source(&self, path: &Path) -> bool {
        extension_of(path).is_some_and(|ext| self.extensions().iter().any(|e| *e == ext))
    }

    fn is_artifact(&self, path: &Path) -> bool {
        extension_of(path).is_some_and(|ext| self.config().artifacts.iter().any(|e| *e == ext))
    }

    /// Source files this language's checks and submissions operate on,
    /// relative to `workspace`, sorted
    fn discover_files(&self, workspace: &Path) -> std::io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        walk_sources(workspace, Path::new(""), &mut |rel| {
            if self.is_source(rel) && !self.is_artifact(rel) {
                files.push(rel.to_path_buf());
            }
        })?;
        files.sort();
        Ok(files)
    }

    /// Compile the entry program; a no-op success for interpreted languages
    async fn build(
        &self,
        workspace: &Path,
        logical_name: &str,
        timeout: Duration,
    ) -> Result<BuildResult, ToolchainError> {
        let Some(template) = &self.config().compile_command else {
            return Ok(BuildResult::ok());
        };
        let vars = self.command_vars(logical_name);
        let vars: Vec<(&str, &str)> = vars.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let command = expand_command(template, &vars);
        compile(workspace, &command, timeout).await
    }

    /// Run the program under test with an enforced wall-clock limit
    async fn run(
        &self,
        workspace: &Path,
        logical_name: &str,
        request: &RunRequest,
    ) -> Result<RunResult, ToolchainError> {
        let vars = self.command_vars(logical_name);
        let vars: Vec<(&str, &str)> = vars.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let mut command = expand_command(&self.config().run_command, &vars);
        command.extend(request.args.iter().cloned());

        let mut spec = ExecutionSpec::new(workspace)
            .with_command(command)
            .with_timeout(request.timeout);
        if let Some(stdin) = &request.stdin {
            spec = spec.with_stdin(stdin.clone());
        }

        let outcome = execute(&spec).await?;
        let exit_code = match outcome.status {
            ExecutionStatus::Exited(code) => Some(code),
            _ => None,
        };
        Ok(RunResult {
            timed_out: outcome.timed_out(),
            stdout: outcome.stdout,
            stderr: outcome.stderr,
            exit_code,
            time_ms: outcome.time_ms,
        })
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

/// Visit non-hidden files below `root`, passing paths relative to it
pub(crate) fn walk_sources(root: &Path, rel: &Path, visit: &mut dyn FnMut(&Path)) -> std::io::Result<()> {
    for entry in fs::read_dir(root.join(rel))? {
        let entry = entry?;
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        let rel_path = rel.join(&name);
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            if IGNORED_DIRS.iter().any(|dir| name == *dir) {
                continue;
            }
            walk_sources(root, &rel_path, visit)?;
        } else if file_type.is_file() {
            visit(&rel_path);
        }
    }
    Ok(())
}

/// Every built-in adapter, ordered by language name
pub fn all_adapters() -> anyhow::Result<Vec<Arc<dyn LanguageAdapter>>> {
    let configs = language_configs()?;
    let mut names: Vec<&String> = configs.keys().collect();
    names.sort();

    let mut adapters: Vec<Arc<dyn LanguageAdapter>> = Vec::new();
    for name in names {
        let config = configs[name].clone();
        let adapter: Arc<dyn LanguageAdapter> = match name.as_str() {
            "c" => Arc::new(CAdapter::new(config)),
            "java" => Arc::new(JavaAdapter::new(config)),
            "python" => Arc::new(PythonAdapter::new(config)),
            other => {
                tracing::warn!("No adapter implementation for configured language {}", other);
                continue;
            }
        };
        adapters.push(adapter);
    }
    Ok(adapters)
}

/// Look up an adapter by canonical name or alias
pub fn adapter_for(
    adapters: &[Arc<dyn LanguageAdapter>],
    language: &str,
) -> Result<Arc<dyn LanguageAdapter>, DetectError> {
    adapters
        .iter()
        .find(|adapter| adapter.config().matches_name(language))
        .cloned()
        .ok_or_else(|| DetectError::UnknownLanguage {
            name: language.to_string(),
            supported: adapters.iter().map(|a| a.name().to_string()).collect(),
        })
}
