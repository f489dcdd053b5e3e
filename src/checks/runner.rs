//! Check runner
//!
//! Checks run one at a time in the set's execution order. Each body gets a
//! fresh workspace copy and runs in its own task so a panic or a hang is
//! contained: a panic becomes an `error` outcome, a hang is aborted when the
//! check's timeout expires and becomes a `failed` outcome.

use std::any::Any;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::{CheckContext, CheckFailure, CheckOutcome, CheckSpec, CheckSpecSet, Failure, ResultSet};
use crate::core::CheckState;
use crate::engine::Workspace;
use crate::languages::LanguageAdapter;

/// How long an aborted check body gets to unwind
const ABORT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Used for checks that declare no timeout of their own
    pub default_timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(60),
        }
    }
}

/// Execute every check of `set` against copies of `template`. Always
/// yields one outcome per check, in declaration order.
pub async fn run_checks(
    set: &CheckSpecSet,
    template: &Path,
    language: Arc<dyn LanguageAdapter>,
    options: &RunOptions,
) -> ResultSet {
    let checks = set.checks();
    let mut outcomes: Vec<Option<CheckOutcome>> = vec![None; checks.len()];
    let mut states: HashMap<&str, CheckState> = HashMap::with_capacity(checks.len());

    for &index in set.execution_order() {
        let spec = &checks[index];
        let unmet = spec
            .requires
            .iter()
            .find(|name| states.get(name.as_str()) != Some(&CheckState::Passed));

        let outcome = match unmet {
            Some(prerequisite) => {
                info!("Skipping {}: {} did not pass", spec.name, prerequisite);
                CheckOutcome::skipped(spec, prerequisite.clone())
            }
            None => run_one(spec, set.problem(), template, language.clone(), options).await,
        };

        states.insert(spec.name.as_str(), outcome.state);
        outcomes[index] = Some(outcome);
    }

    ResultSet {
        slug: set.slug().to_string(),
        language: language.name().to_string(),
        version: set.version().to_string(),
        results: outcomes.into_iter().flatten().collect(),
    }
}

async fn run_one(
    spec: &CheckSpec,
    problem: &str,
    template: &Path,
    language: Arc<dyn LanguageAdapter>,
    options: &RunOptions,
) -> CheckOutcome {
    info!("Running check {}", spec.name);
    let started = Instant::now();
    let timeout = spec.timeout.unwrap_or(options.default_timeout);

    let workspace = match Workspace::materialize(template, &spec.fixtures).await {
        Ok(workspace) => workspace,
        Err(e) => {
            warn!("Could not prepare workspace for {}: {:#}", spec.name, e);
            return CheckOutcome::error(spec, format!("failed to prepare workspace: {:#}", e));
        }
    };

    let ctx = CheckContext::new(workspace.path(), language, problem, timeout);
    let log = ctx.log_handle();
    let body = spec.body.clone();
    let mut handle = tokio::spawn(async move { body.run(ctx).await });

    let result = match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) if join_error.is_panic() => Err(CheckFailure::Error(format!(
            "check raised an unexpected error: {}",
            panic_message(join_error.into_panic())
        ))),
        Ok(Err(join_error)) => Err(CheckFailure::Error(format!(
            "check was cancelled: {}",
            join_error
        ))),
        Err(_) => {
            handle.abort();
            // Let the body's child processes be killed before the
            // workspace is removed.
            if tokio::time::timeout(ABORT_GRACE, handle).await.is_err() {
                warn!("Check {} did not stop after abort", spec.name);
            }
            Err(Failure::new(format!("check timed out after {}", describe_duration(timeout))).into())
        }
    };
    drop(workspace);

    let mut outcome = match result {
        Ok(()) => CheckOutcome::passed(spec),
        Err(CheckFailure::Failed(failure)) => CheckOutcome::failed(spec, failure),
        Err(CheckFailure::Error(message)) => CheckOutcome::error(spec, message),
    };
    outcome.log = log.lines();
    outcome.duration_ms = started.elapsed().as_millis() as u64;

    info!("Check {} {}", spec.name, outcome.state);
    debug!("Check {} took {}ms", spec.name, outcome.duration_ms);
    outcome
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}

pub(crate) fn describe_duration(duration: Duration) -> String {
    if duration.subsec_millis() == 0 {
        let secs = duration.as_secs();
        format!("{} second{}", secs, if secs == 1 { "" } else { "s" })
    } else {
        format!("{:.1} seconds", duration.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::steps::{Step, StepsBody};
    use crate::checks::CheckResult;
    use crate::engine::Fixture;
    use crate::languages::{adapter_for, all_adapters};
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    fn c_adapter() -> Arc<dyn LanguageAdapter> {
        adapter_for(&all_adapters().unwrap(), "c").unwrap()
    }

    fn options() -> RunOptions {
        RunOptions {
            default_timeout: Duration::from_secs(30),
        }
    }

    async fn pass(_ctx: CheckContext) -> CheckResult {
        Ok(())
    }

    async fn fail(_ctx: CheckContext) -> CheckResult {
        Err(Failure::new("wrong answer").into())
    }

    async fn explode(_ctx: CheckContext) -> CheckResult {
        panic!("check body exploded")
    }

    async fn hang(_ctx: CheckContext) -> CheckResult {
        std::future::pending().await
    }

    fn set(checks: Vec<CheckSpec>) -> CheckSpecSet {
        CheckSpecSet::new("cs50/hello", "v1", "hello", checks).unwrap()
    }

    fn hello_set() -> CheckSpecSet {
        set(vec![
            CheckSpec::new("exists", StepsBody::new(vec![Step::Exists { file: None }]))
                .with_description("hello.c exists"),
            CheckSpec::new("compiles", StepsBody::new(vec![Step::Build]))
                .with_description("hello.c compiles")
                .requires(["exists"]),
        ])
    }

    fn has_cc() -> bool {
        std::process::Command::new("cc")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn test_one_outcome_per_check_in_declaration_order() {
        let template = TempDir::new().unwrap();
        let checks = set(vec![
            CheckSpec::from_fn("third", pass).requires(["second"]),
            CheckSpec::from_fn("first", pass),
            CheckSpec::from_fn("second", pass).requires(["first"]),
        ]);
        let results = run_checks(&checks, template.path(), c_adapter(), &options()).await;
        let names: Vec<&str> = results.results.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["third", "first", "second"]);
        assert!(results.all_passed());
    }

    #[tokio::test]
    async fn test_dependents_of_failed_check_are_skipped_without_running() {
        let template = TempDir::new().unwrap();
        let invoked = Arc::new(AtomicBool::new(false));
        let flag = invoked.clone();
        let checks = set(vec![
            CheckSpec::from_fn("a", fail),
            CheckSpec::from_fn("b", move |_ctx| {
                let flag = flag.clone();
                async move {
                    flag.store(true, Ordering::SeqCst);
                    Err(CheckFailure::Error("dependent body must not run".into()))
                }
            })
            .requires(["a"]),
            CheckSpec::from_fn("c", explode).requires(["b"]),
        ]);

        let results = run_checks(&checks, template.path(), c_adapter(), &options()).await;
        assert_eq!(results.results[0].state, CheckState::Failed);
        assert_eq!(results.results[1].state, CheckState::Skipped);
        assert_eq!(results.results[1].skipped_because.as_deref(), Some("a"));
        assert_eq!(results.results[2].state, CheckState::Skipped);
        assert_eq!(results.results[2].skipped_because.as_deref(), Some("b"));
        assert!(!invoked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_panic_is_error_not_failure() {
        let template = TempDir::new().unwrap();
        let checks = set(vec![
            CheckSpec::from_fn("broken", explode),
            CheckSpec::from_fn("after", pass).requires(["broken"]),
            CheckSpec::from_fn("independent", pass),
        ]);
        let results = run_checks(&checks, template.path(), c_adapter(), &options()).await;
        assert_eq!(results.results[0].state, CheckState::Error);
        assert!(results.results[0]
            .error
            .as_deref()
            .unwrap()
            .contains("check body exploded"));
        assert_eq!(results.results[1].state, CheckState::Skipped);
        assert_eq!(results.results[2].state, CheckState::Passed);
    }

    #[tokio::test]
    async fn test_hanging_check_times_out() {
        let template = TempDir::new().unwrap();
        let checks = set(vec![
            CheckSpec::from_fn("hangs", hang).with_timeout(Duration::from_millis(200)),
            CheckSpec::from_fn("next", pass),
        ]);

        let started = Instant::now();
        let results = run_checks(&checks, template.path(), c_adapter(), &options()).await;
        assert!(started.elapsed() < Duration::from_secs(5));

        let outcome = &results.results[0];
        assert_eq!(outcome.state, CheckState::Failed);
        assert_eq!(
            outcome.cause.as_ref().unwrap().rationale,
            "check timed out after 0.2 seconds"
        );
        assert_eq!(results.results[1].state, CheckState::Passed);
    }

    #[tokio::test]
    async fn test_results_are_deterministic() {
        let template = TempDir::new().unwrap();
        let checks = hello_set();
        let first = run_checks(&checks, template.path(), c_adapter(), &options()).await;
        let second = run_checks(&checks, template.path(), c_adapter(), &options()).await;
        assert!(first.same_results(&second));
    }

    #[tokio::test]
    async fn test_workspaces_are_isolated() {
        let template = TempDir::new().unwrap();
        fs::write(template.path().join("hello.c"), "original").unwrap();

        let checks = set(vec![
            CheckSpec::from_fn("writes", |ctx: CheckContext| async move {
                fs::write(ctx.workspace().join("hello.c"), "changed").unwrap();
                fs::write(ctx.workspace().join("scratch.txt"), "leak").unwrap();
                Ok(())
            }),
            CheckSpec::from_fn("reads", |ctx: CheckContext| async move {
                let content = fs::read_to_string(ctx.workspace().join("hello.c")).unwrap();
                if content != "original" || ctx.workspace().join("scratch.txt").exists() {
                    return Err(CheckFailure::Failed(Failure::new("state leaked between checks")));
                }
                Ok(())
            })
            .requires(["writes"]),
        ]);

        let results = run_checks(&checks, template.path(), c_adapter(), &options()).await;
        assert!(results.all_passed(), "{:?}", results);
        assert_eq!(
            fs::read_to_string(template.path().join("hello.c")).unwrap(),
            "original"
        );
    }

    #[tokio::test]
    async fn test_fixtures_are_copied() {
        let template = TempDir::new().unwrap();
        let specs = TempDir::new().unwrap();
        fs::write(specs.path().join("names.txt"), "Emma").unwrap();

        let checks = set(vec![CheckSpec::from_fn("fixture", |ctx: CheckContext| async move {
            ctx.require_exists("data/names.txt")
        })
        .with_fixtures(vec![Fixture {
            source: specs.path().join("names.txt"),
            dest: PathBuf::from("data/names.txt"),
        }])]);

        let results = run_checks(&checks, template.path(), c_adapter(), &options()).await;
        assert!(results.all_passed());
        assert!(!template.path().join("data").exists());
    }

    #[tokio::test]
    async fn test_hello_empty_workspace() {
        let template = TempDir::new().unwrap();
        let results = run_checks(&hello_set(), template.path(), c_adapter(), &options()).await;

        assert_eq!(results.results[0].state, CheckState::Failed);
        assert_eq!(
            results.results[0].cause.as_ref().unwrap().rationale,
            "hello.c not found"
        );
        assert_eq!(results.results[1].state, CheckState::Skipped);
        let summary = results.summary();
        assert_eq!((summary.passed, summary.total), (0, 2));
    }

    #[tokio::test]
    async fn test_hello_valid_source() {
        if !has_cc() {
            eprintln!("skipping: cc not on PATH");
            return;
        }
        let template = TempDir::new().unwrap();
        fs::write(
            template.path().join("hello.c"),
            "#include <stdio.h>\nint main(void) { printf(\"hello, world\\n\"); }\n",
        )
        .unwrap();

        let results = run_checks(&hello_set(), template.path(), c_adapter(), &options()).await;
        assert_eq!(results.results[0].state, CheckState::Passed);
        assert_eq!(results.results[1].state, CheckState::Passed);
        assert!(!template.path().join("hello").exists());
    }

    #[tokio::test]
    async fn test_compile_error_fails_with_log() {
        if !has_cc() {
            eprintln!("skipping: cc not on PATH");
            return;
        }
        let template = TempDir::new().unwrap();
        fs::write(template.path().join("hello.c"), "int main(void) { return 0 }\n").unwrap();

        let results = run_checks(&hello_set(), template.path(), c_adapter(), &options()).await;
        let compiles = &results.results[1];
        assert_eq!(compiles.state, CheckState::Failed);
        assert_eq!(
            compiles.cause.as_ref().unwrap().rationale,
            "code failed to compile"
        );
        assert!(compiles.log.len() > 1);
    }

    #[test]
    fn test_describe_duration() {
        assert_eq!(describe_duration(Duration::from_secs(60)), "60 seconds");
        assert_eq!(describe_duration(Duration::from_secs(1)), "1 second");
        assert_eq!(describe_duration(Duration::from_millis(1500)), "1.5 seconds");
    }
}
