//! Check specifications, outcomes and result sets
//!
//! A `CheckSpec` pairs identity and prerequisites with a `CheckBody`. Bodies
//! report an intentional failure with `CheckFailure::Failed`; anything else
//! that goes wrong (a toolchain that cannot start, a panic, a malformed
//! step) is `CheckFailure::Error` so it is never mistaken for a grading
//! signal.

pub mod cache;
pub mod graph;
pub mod loader;
pub mod runner;
pub mod steps;

use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::core::utils::{truncate_output, MAX_PAYLOAD_CHARS, MAX_PAYLOAD_LINES};
use crate::core::CheckState;
use crate::engine::Fixture;
use crate::error::{LoadError, ToolchainError};
use crate::languages::{LanguageAdapter, RunRequest, RunResult};

pub use loader::{load, SpecSource};
pub use runner::{run_checks, RunOptions};

/// Maximum number of log lines kept per check
pub const MAX_LOG_LINES: usize = 100;

/// Why a check did not pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub rationale: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
}

impl Failure {
    pub fn new(rationale: impl Into<String>) -> Self {
        Self {
            rationale: rationale.into(),
            help: None,
            expected: None,
            actual: None,
        }
    }

    /// Comparison failure; both payloads are truncated to their tails
    pub fn mismatch(rationale: impl Into<String>, expected: &str, actual: &str) -> Self {
        Self {
            rationale: rationale.into(),
            help: None,
            expected: Some(truncate_output(expected, MAX_PAYLOAD_LINES, MAX_PAYLOAD_CHARS)),
            actual: Some(truncate_output(actual, MAX_PAYLOAD_LINES, MAX_PAYLOAD_CHARS)),
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckFailure {
    /// The submission is wrong
    Failed(Failure),
    /// The check itself could not be carried out
    Error(String),
}

impl From<Failure> for CheckFailure {
    fn from(failure: Failure) -> Self {
        CheckFailure::Failed(failure)
    }
}

impl From<ToolchainError> for CheckFailure {
    fn from(err: ToolchainError) -> Self {
        CheckFailure::Error(err.to_string())
    }
}

pub type CheckResult = Result<(), CheckFailure>;

/// Log lines a check body appends while it runs
#[derive(Debug, Clone, Default)]
pub struct CheckLog(Arc<Mutex<Vec<String>>>);

impl CheckLog {
    /// Record `line` and emit it as it happens on the `exercheck::check_log`
    /// target. Embedded newlines are escaped so one push stays one line.
    pub fn push(&self, line: impl Into<String>) {
        let line = line.into().replace('\r', "\\r").replace('\n', "\\n");
        info!(target: "exercheck::check_log", "{}", line);
        if let Ok(mut lines) = self.0.lock() {
            lines.push(line);
        }
    }

    /// Snapshot capped at `MAX_LOG_LINES`, keeping the most recent lines
    pub fn lines(&self) -> Vec<String> {
        let lines = match self.0.lock() {
            Ok(lines) => lines.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        if lines.len() <= MAX_LOG_LINES {
            return lines;
        }
        let mut kept = Vec::with_capacity(MAX_LOG_LINES);
        kept.push("...".to_string());
        kept.extend_from_slice(&lines[lines.len() - (MAX_LOG_LINES - 1)..]);
        kept
    }
}

/// Everything a check body may touch: its own workspace copy and the
/// active language
#[derive(Clone)]
pub struct CheckContext {
    workspace: PathBuf,
    language: Arc<dyn LanguageAdapter>,
    problem: String,
    timeout: Duration,
    log: CheckLog,
}

impl CheckContext {
    pub fn new(
        workspace: impl Into<PathBuf>,
        language: Arc<dyn LanguageAdapter>,
        problem: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            workspace: workspace.into(),
            language,
            problem: problem.into(),
            timeout,
            log: CheckLog::default(),
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn language(&self) -> &dyn LanguageAdapter {
        self.language.as_ref()
    }

    /// Logical exercise name, e.g. `hello`
    pub fn problem(&self) -> &str {
        &self.problem
    }

    /// Time budget of the whole check; also the default for each run
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn log(&self, line: impl Into<String>) {
        self.log.push(line);
    }

    pub(crate) fn log_handle(&self) -> CheckLog {
        self.log.clone()
    }

    /// Entry file name in the active language's convention
    pub fn entry_file(&self) -> String {
        self.language.resolve_entry_name(&self.problem)
    }

    pub fn require_exists(&self, file: &str) -> CheckResult {
        self.log(format!("checking that {} exists...", file));
        if self.workspace.join(file).is_file() {
            Ok(())
        } else {
            Err(Failure::new(format!("{} not found", file)).into())
        }
    }

    /// Build the entry program; compile errors fail the check
    pub async fn build(&self) -> CheckResult {
        if !self.language.is_compiled() {
            return Ok(());
        }
        self.log(format!("compiling {}...", self.entry_file()));
        let result = self
            .language
            .build(&self.workspace, &self.problem, self.timeout)
            .await?;
        if result.success {
            return Ok(());
        }
        for line in result.diagnostic_lines() {
            self.log(line);
        }
        Err(Failure::new("code failed to compile")
            .with_help("see the log for compiler output")
            .into())
    }

    /// Run the entry program
    pub async fn run(&self, request: &RunRequest) -> Result<RunResult, CheckFailure> {
        let mut line = format!("running {}", self.entry_file());
        if !request.args.is_empty() {
            line.push(' ');
            line.push_str(&request.args.join(" "));
        }
        self.log(format!("{}...", line));
        if let Some(stdin) = &request.stdin {
            self.log(format!("sending input {}...", stdin.trim_end()));
        }
        let result = self
            .language
            .run(&self.workspace, &self.problem, request)
            .await?;
        Ok(result)
    }
}

/// The executable part of a check
#[async_trait]
pub trait CheckBody: Send + Sync {
    async fn run(&self, ctx: CheckContext) -> CheckResult;
}

/// Adapts an async closure into a `CheckBody`
pub struct FnBody<F>(pub F);

#[async_trait]
impl<F, Fut> CheckBody for FnBody<F>
where
    F: Fn(CheckContext) -> Fut + Send + Sync,
    Fut: Future<Output = CheckResult> + Send + 'static,
{
    async fn run(&self, ctx: CheckContext) -> CheckResult {
        (self.0)(ctx).await
    }
}

#[derive(Clone)]
pub struct CheckSpec {
    pub name: String,
    pub description: String,
    pub requires: Vec<String>,
    /// Overrides the run-wide default
    pub timeout: Option<Duration>,
    pub fixtures: Vec<Fixture>,
    pub body: Arc<dyn CheckBody>,
}

impl std::fmt::Debug for CheckSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckSpec")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("requires", &self.requires)
            .field("timeout", &self.timeout)
            .field("fixtures", &self.fixtures)
            .finish_non_exhaustive()
    }
}

impl CheckSpec {
    pub fn new(name: impl Into<String>, body: impl CheckBody + 'static) -> Self {
        let name = name.into();
        Self {
            description: name.clone(),
            name,
            requires: Vec::new(),
            timeout: None,
            fixtures: Vec::new(),
            body: Arc::new(body),
        }
    }

    pub fn from_fn<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(CheckContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CheckResult> + Send + 'static,
    {
        Self::new(name, FnBody(f))
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn requires(mut self, prerequisites: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.requires = prerequisites.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_fixtures(mut self, fixtures: Vec<Fixture>) -> Self {
        self.fixtures = fixtures;
        self
    }
}

/// Validated, dependency-ordered collection of checks
#[derive(Debug, Clone)]
pub struct CheckSpecSet {
    slug: String,
    version: String,
    problem: String,
    extra_files: Vec<String>,
    checks: Vec<CheckSpec>,
    order: Vec<usize>,
}

impl CheckSpecSet {
    /// Validate names and prerequisites and fix the execution order
    pub fn new(
        slug: impl Into<String>,
        version: impl Into<String>,
        problem: impl Into<String>,
        checks: Vec<CheckSpec>,
    ) -> Result<Self, LoadError> {
        let order = graph::execution_order(&checks)?;
        Ok(Self {
            slug: slug.into(),
            version: version.into(),
            problem: problem.into(),
            extra_files: Vec::new(),
            checks,
            order,
        })
    }

    pub fn with_extra_files(mut self, patterns: Vec<String>) -> Self {
        self.extra_files = patterns;
        self
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn problem(&self) -> &str {
        &self.problem
    }

    /// Extra submission file patterns beyond adapter discovery
    pub fn extra_files(&self) -> &[String] {
        &self.extra_files
    }

    /// Checks in declaration order
    pub fn checks(&self) -> &[CheckSpec] {
        &self.checks
    }

    /// Indices into `checks()` in execution order
    pub fn execution_order(&self) -> &[usize] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Keep only `targets` and everything they transitively require
    pub fn restrict_to(self, targets: &[String]) -> Result<Self, LoadError> {
        if targets.is_empty() {
            return Ok(self);
        }
        let keep: HashSet<String> = graph::with_prerequisites(&self.checks, targets)?
            .into_iter()
            .map(str::to_string)
            .collect();
        let checks: Vec<CheckSpec> = self
            .checks
            .into_iter()
            .filter(|check| keep.contains(&check.name))
            .collect();
        let order = graph::execution_order(&checks)?;
        Ok(Self {
            checks,
            order,
            ..self
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckOutcome {
    pub name: String,
    pub description: String,
    pub state: CheckState,
    /// Set for failed checks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<Failure>,
    /// Set for error checks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// First prerequisite that did not pass, for skipped checks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_because: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub log: Vec<String>,
    pub duration_ms: u64,
}

impl CheckOutcome {
    pub fn passed(spec: &CheckSpec) -> Self {
        Self::with_state(spec, CheckState::Passed)
    }

    pub fn failed(spec: &CheckSpec, cause: Failure) -> Self {
        Self {
            cause: Some(cause),
            ..Self::with_state(spec, CheckState::Failed)
        }
    }

    pub fn error(spec: &CheckSpec, message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::with_state(spec, CheckState::Error)
        }
    }

    pub fn skipped(spec: &CheckSpec, prerequisite: impl Into<String>) -> Self {
        Self {
            skipped_because: Some(prerequisite.into()),
            ..Self::with_state(spec, CheckState::Skipped)
        }
    }

    fn with_state(spec: &CheckSpec, state: CheckState) -> Self {
        Self {
            name: spec.name.clone(),
            description: spec.description.clone(),
            state,
            cause: None,
            error: None,
            skipped_because: None,
            log: Vec::new(),
            duration_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub skipped: usize,
}

/// Outcomes of one run, in declaration order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultSet {
    pub slug: String,
    pub language: String,
    pub version: String,
    pub results: Vec<CheckOutcome>,
}

impl ResultSet {
    pub fn summary(&self) -> Summary {
        let mut summary = Summary {
            total: self.results.len(),
            ..Summary::default()
        };
        for outcome in &self.results {
            match outcome.state {
                CheckState::Passed => summary.passed += 1,
                CheckState::Failed => summary.failed += 1,
                CheckState::Error => summary.errors += 1,
                CheckState::Skipped => summary.skipped += 1,
            }
        }
        summary
    }

    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|outcome| outcome.state.is_passed())
    }

    /// Equality ignoring timing fields
    pub fn same_results(&self, other: &ResultSet) -> bool {
        let strip = |set: &ResultSet| {
            let mut set = set.clone();
            for outcome in &mut set.results {
                outcome.duration_ms = 0;
            }
            set
        };
        strip(self) == strip(other)
    }
}
