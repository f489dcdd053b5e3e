//! Declarative check bodies read from `checks.toml`

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::time::Duration;

use super::runner::describe_duration;
use super::{CheckBody, CheckContext, CheckFailure, CheckResult, Failure};
use crate::core::utils::{compare_output, output_contains};
use crate::languages::RunRequest;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// A file must exist; defaults to the entry file of the active language
    Exists {
        #[serde(default)]
        file: Option<String>,
    },
    Build,
    Run(RunStep),
    /// A workspace file must match a regular expression
    Contains { file: String, pattern: String },
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunStep {
    pub args: Vec<String>,
    pub stdin: Option<String>,
    /// Expected substring of stdout, compared line-normalised
    pub stdout: Option<String>,
    /// Expected stdout, ignoring trailing whitespace
    pub stdout_exact: Option<String>,
    pub stdout_regex: Option<String>,
    /// Expected substring of stderr
    pub stderr: Option<String>,
    pub exit: Option<i32>,
    /// Seconds; defaults to the check timeout
    pub timeout: Option<u64>,
}

impl Step {
    /// Reject steps that could never run, e.g. a bad regular expression
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Step::Contains { pattern, .. } => compile_regex(pattern).map(|_| ()),
            Step::Run(run) => {
                if let Some(pattern) = &run.stdout_regex {
                    compile_regex(pattern)?;
                }
                if run.timeout == Some(0) {
                    return Err("run timeout must be positive".to_string());
                }
                Ok(())
            }
            Step::Exists { .. } | Step::Build => Ok(()),
        }
    }
}

fn compile_regex(pattern: &str) -> Result<Regex, String> {
    Regex::new(pattern).map_err(|e| format!("invalid pattern {:?}: {}", pattern, e))
}

/// Runs a list of steps, stopping at the first that does not pass
#[derive(Debug, Clone)]
pub struct StepsBody {
    steps: Vec<Step>,
}

impl StepsBody {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }
}

#[async_trait]
impl CheckBody for StepsBody {
    async fn run(&self, ctx: CheckContext) -> CheckResult {
        for step in &self.steps {
            match step {
                Step::Exists { file } => {
                    let file = file.clone().unwrap_or_else(|| ctx.entry_file());
                    ctx.require_exists(&file)?;
                }
                Step::Build => ctx.build().await?,
                Step::Run(run) => run_step(&ctx, run).await?,
                Step::Contains { file, pattern } => contains_step(&ctx, file, pattern)?,
            }
        }
        Ok(())
    }
}

async fn run_step(ctx: &CheckContext, step: &RunStep) -> CheckResult {
    let timeout = step
        .timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| ctx.timeout());
    let mut request = RunRequest::new(timeout).with_args(step.args.iter().cloned());
    if let Some(stdin) = &step.stdin {
        let mut input = stdin.clone();
        if !input.ends_with('\n') {
            input.push('\n');
        }
        request = request.with_stdin(input);
    }

    let result = ctx.run(&request).await?;

    if result.timed_out {
        return Err(Failure::new("timed out while waiting for program to exit")
            .with_help(format!("the program did not finish within {}", describe_duration(timeout)))
            .into());
    }

    if let Some(expected) = &step.stdout {
        ctx.log(format!("checking for output \"{}\"...", expected));
        if !output_contains(&result.stdout, expected) {
            return Err(mismatch(expected, &result.stdout));
        }
    }

    if let Some(expected) = &step.stdout_exact {
        ctx.log("checking for exact output...");
        if !compare_output(&result.stdout, expected) {
            return Err(mismatch(expected, &result.stdout));
        }
    }

    if let Some(pattern) = &step.stdout_regex {
        ctx.log(format!("checking that output matches {}...", pattern));
        let re = compile_regex(pattern).map_err(CheckFailure::Error)?;
        if !re.is_match(&result.stdout) {
            return Err(mismatch(pattern, &result.stdout));
        }
    }

    if let Some(expected) = &step.stderr {
        ctx.log(format!("checking for error output \"{}\"...", expected));
        if !output_contains(&result.stderr, expected) {
            return Err(mismatch(expected, &result.stderr));
        }
    }

    if let Some(expected) = step.exit {
        ctx.log(format!("checking that program exited with status {}...", expected));
        match result.exit_code {
            Some(code) if code == expected => {}
            Some(code) => {
                return Err(Failure::mismatch(
                    format!("expected exit code {}, not {}", expected, code),
                    &expected.to_string(),
                    &code.to_string(),
                )
                .into())
            }
            None => {
                return Err(Failure::new(format!(
                    "expected exit code {}, but the program was killed",
                    expected
                ))
                .into())
            }
        }
    }

    Ok(())
}

fn contains_step(ctx: &CheckContext, file: &str, pattern: &str) -> CheckResult {
    ctx.require_exists(file)?;
    let re = compile_regex(pattern).map_err(CheckFailure::Error)?;
    let content = std::fs::read_to_string(ctx.workspace().join(file))
        .map_err(|e| CheckFailure::Error(format!("failed to read {}: {}", file, e)))?;
    if re.is_match(&content) {
        Ok(())
    } else {
        Err(Failure::new(format!("{} does not contain {}", file, pattern)).into())
    }
}

fn mismatch(expected: &str, actual: &str) -> CheckFailure {
    let shorten = |s: &str| {
        let first = s.lines().next().unwrap_or("");
        if first.chars().count() > 40 || s.lines().count() > 1 {
            format!("{}...", first.chars().take(40).collect::<String>())
        } else {
            first.to_string()
        }
    };
    Failure::mismatch(
        format!("expected \"{}\", not \"{}\"", shorten(expected), shorten(actual)),
        expected,
        actual,
    )
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages::{adapter_for, all_adapters};

    #[derive(Deserialize)]
    struct Wrapper {
        step: Vec<Step>,
    }

    #[test]
    fn test_parse_steps() {
        let parsed: Wrapper = toml::from_str(
            r#"
[[step]]
action = "exists"

[[step]]
action = "build"

[[step]]
action = "run"
stdin = "Emma"
stdout = "hello, Emma"
exit = 0

[[step]]
action = "contains"
file = "hello.c"
pattern = "printf"
"#,
        )
        .unwrap();

        assert_eq!(parsed.step.len(), 4);
        assert_eq!(parsed.step[0], Step::Exists { file: None });
        assert_eq!(parsed.step[1], Step::Build);
        match &parsed.step[2] {
            Step::Run(run) => {
                assert_eq!(run.stdin.as_deref(), Some("Emma"));
                assert_eq!(run.stdout.as_deref(), Some("hello, Emma"));
                assert_eq!(run.exit, Some(0));
                assert!(run.args.is_empty());
            }
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn test_unknown_action_rejected() {
        let parsed: Result<Wrapper, _> = toml::from_str("[[step]]\naction = \"compile\"\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_validate_rejects_bad_regex() {
        let step = Step::Contains {
            file: "hello.c".into(),
            pattern: "(".into(),
        };
        assert!(step.validate().is_err());
        let step = Step::Run(RunStep {
            stdout_regex: Some("^hello, .+$".into()),
            ..RunStep::default()
        });
        assert!(step.validate().is_ok());
    }

    const GREETER: &str = r#"import sys
name = input()
print("hello, " + name)
print("warning: " + name, file=sys.stderr)
sys.exit(int(sys.argv[1]) if len(sys.argv) > 1 else 0)
"#;

    fn has_python() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Run `steps` against `hello.py` containing `source`
    async fn run_steps(source: &str, steps: Vec<Step>, timeout: Duration) -> (CheckResult, Vec<String>) {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("hello.py"), source).unwrap();
        let python = adapter_for(&all_adapters().unwrap(), "python").unwrap();
        let ctx = CheckContext::new(dir.path(), python, "hello", timeout);
        let log = ctx.log_handle();
        let result = StepsBody::new(steps).run(ctx).await;
        (result, log.lines())
    }

    fn run(step: RunStep) -> Vec<Step> {
        vec![Step::Run(RunStep {
            stdin: Some("Emma".into()),
            ..step
        })]
    }

    fn failure(result: CheckResult) -> Failure {
        match result {
            Err(CheckFailure::Failed(failure)) => failure,
            other => panic!("expected a failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_matchers_pass() {
        if !has_python() {
            eprintln!("skipping: python3 not on PATH");
            return;
        }
        let steps = run(RunStep {
            stdout: Some("hello, Emma".into()),
            stdout_exact: Some("hello, Emma\n".into()),
            stdout_regex: Some(r"^hello, [A-Z]\w+".into()),
            stderr: Some("warning: Emma".into()),
            exit: Some(0),
            ..RunStep::default()
        });
        let (result, log) = run_steps(GREETER, steps, Duration::from_secs(10)).await;
        assert!(result.is_ok(), "{:?}", result);
        assert!(log.contains(&"running hello.py...".to_string()), "{:?}", log);
        assert!(log.contains(&"sending input Emma...".to_string()), "{:?}", log);
    }

    #[tokio::test]
    async fn test_run_stdout_mismatch() {
        if !has_python() {
            eprintln!("skipping: python3 not on PATH");
            return;
        }
        let steps = run(RunStep {
            stdout: Some("hello, Rodrigo".into()),
            ..RunStep::default()
        });
        let cause = failure(run_steps(GREETER, steps, Duration::from_secs(10)).await.0);
        assert_eq!(cause.rationale, "expected \"hello, Rodrigo\", not \"hello, Emma\"");
        assert_eq!(cause.expected.as_deref(), Some("hello, Rodrigo"));
        assert_eq!(cause.actual.as_deref().map(str::trim_end), Some("hello, Emma"));
    }

    #[tokio::test]
    async fn test_run_exact_and_regex_mismatch() {
        if !has_python() {
            eprintln!("skipping: python3 not on PATH");
            return;
        }
        let exact = run(RunStep {
            stdout_exact: Some("hello".into()),
            ..RunStep::default()
        });
        let cause = failure(run_steps(GREETER, exact, Duration::from_secs(10)).await.0);
        assert_eq!(cause.expected.as_deref(), Some("hello"));

        let regex = run(RunStep {
            stdout_regex: Some("^bye".into()),
            ..RunStep::default()
        });
        let cause = failure(run_steps(GREETER, regex, Duration::from_secs(10)).await.0);
        assert_eq!(cause.expected.as_deref(), Some("^bye"));
    }

    #[tokio::test]
    async fn test_run_stderr_mismatch() {
        if !has_python() {
            eprintln!("skipping: python3 not on PATH");
            return;
        }
        let steps = run(RunStep {
            stderr: Some("error: Emma".into()),
            ..RunStep::default()
        });
        let cause = failure(run_steps(GREETER, steps, Duration::from_secs(10)).await.0);
        assert_eq!(cause.actual.as_deref().map(str::trim_end), Some("warning: Emma"));
    }

    #[tokio::test]
    async fn test_run_exit_code() {
        if !has_python() {
            eprintln!("skipping: python3 not on PATH");
            return;
        }
        let matching = run(RunStep {
            args: vec!["3".into()],
            exit: Some(3),
            ..RunStep::default()
        });
        assert!(run_steps(GREETER, matching, Duration::from_secs(10)).await.0.is_ok());

        let wrong = run(RunStep {
            args: vec!["3".into()],
            exit: Some(0),
            ..RunStep::default()
        });
        let cause = failure(run_steps(GREETER, wrong, Duration::from_secs(10)).await.0);
        assert_eq!(cause.rationale, "expected exit code 0, not 3");
    }

    #[tokio::test]
    async fn test_run_killed_program() {
        if !has_python() {
            eprintln!("skipping: python3 not on PATH");
            return;
        }
        let source = "import os, signal\nos.kill(os.getpid(), signal.SIGKILL)\n";
        let steps = run(RunStep {
            exit: Some(0),
            ..RunStep::default()
        });
        let cause = failure(run_steps(source, steps, Duration::from_secs(10)).await.0);
        assert_eq!(cause.rationale, "expected exit code 0, but the program was killed");
    }

    #[tokio::test]
    async fn test_run_times_out() {
        if !has_python() {
            eprintln!("skipping: python3 not on PATH");
            return;
        }
        let source = "while True:\n    pass\n";
        let steps = run(RunStep {
            stdout: Some("never".into()),
            ..RunStep::default()
        });
        let started = std::time::Instant::now();
        let cause = failure(run_steps(source, steps, Duration::from_millis(500)).await.0);
        assert_eq!(cause.rationale, "timed out while waiting for program to exit");
        assert_eq!(
            cause.help.as_deref(),
            Some("the program did not finish within 0.5 seconds")
        );
        assert!(started.elapsed() < Duration::from_secs(5));

        let steps = run(RunStep {
            timeout: Some(1),
            ..RunStep::default()
        });
        let cause = failure(run_steps(source, steps, Duration::from_secs(30)).await.0);
        assert_eq!(cause.help.as_deref(), Some("the program did not finish within 1 second"));
    }

    #[tokio::test]
    async fn test_contains_step() {
        let steps = vec![Step::Contains {
            file: "hello.py".into(),
            pattern: r"print\(".into(),
        }];
        let (result, _) = run_steps(GREETER, steps, Duration::from_secs(10)).await;
        assert!(result.is_ok());

        let steps = vec![Step::Contains {
            file: "hello.py".into(),
            pattern: "printf".into(),
        }];
        let cause = failure(run_steps(GREETER, steps, Duration::from_secs(10)).await.0);
        assert_eq!(cause.rationale, "hello.py does not contain printf");
    }

    #[test]
    fn test_mismatch_rationale() {
        match mismatch("hello, Emma", "hello, world\n") {
            CheckFailure::Failed(failure) => {
                assert_eq!(failure.rationale, "expected \"hello, Emma\", not \"hello, world\"");
                assert_eq!(failure.expected.as_deref(), Some("hello, Emma"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
