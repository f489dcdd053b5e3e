//! Build step for compiled languages

use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::core::utils::{head_tail_lines, strip_ansi};
use crate::engine::executer::{execute, ExecutionSpec, ExecutionStatus};
use crate::error::ToolchainError;

/// Diagnostics longer than this keep only their head and tail
const MAX_DIAGNOSTIC_LINES: usize = 40;

/// Result of a compilation attempt
#[derive(Debug, Clone, PartialEq)]
pub struct BuildResult {
    pub success: bool,
    /// Compiler output (or a synthesized reason) when the build failed
    pub message: Option<String>,
}

impl BuildResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }

    /// Compiler diagnostics with ANSI escapes removed, head and tail kept
    pub fn diagnostic_lines(&self) -> Vec<String> {
        match &self.message {
            Some(message) => head_tail_lines(&strip_ansi(message), MAX_DIAGNOSTIC_LINES),
            None => Vec::new(),
        }
    }
}

/// Run `compile_cmd` in `source_dir`. A non-zero exit is a failed build,
/// not an error; only a toolchain that cannot be started is an error.
pub async fn compile(
    source_dir: &Path,
    compile_cmd: &[String],
    time_limit: Duration,
) -> Result<BuildResult, ToolchainError> {
    if compile_cmd.is_empty() {
        return Ok(BuildResult::ok());
    }

    debug!("Compiling with {:?} in {:?}", compile_cmd, source_dir);

    let spec = ExecutionSpec::new(source_dir)
        .with_command(compile_cmd)
        .with_timeout(time_limit);

    let result = execute(&spec).await?;

    if result.is_success() {
        return Ok(BuildResult::ok());
    }

    let error_msg = if !result.stderr.trim().is_empty() {
        result.stderr
    } else if !result.stdout.trim().is_empty() {
        result.stdout
    } else {
        match result.status {
            ExecutionStatus::TimeLimitExceeded => "Compilation timed out".to_string(),
            ExecutionStatus::Signaled(_) => "Compiler crashed".to_string(),
            ExecutionStatus::Exited(code) => {
                format!("Compilation failed with exit code {}", code)
            }
        }
    };

    Ok(BuildResult::failed(error_msg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_successful_build() {
        let dir = TempDir::new().unwrap();
        let result = compile(dir.path(), &sh("true"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result, BuildResult::ok());
    }

    #[tokio::test]
    async fn test_failed_build_keeps_diagnostics() {
        let dir = TempDir::new().unwrap();
        let result = compile(
            dir.path(),
            &sh("printf '\\033[1mhello.c:1: error\\033[0m\\n' >&2; exit 1"),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert!(!result.success);
        assert_eq!(result.diagnostic_lines(), vec!["hello.c:1: error"]);
    }

    #[tokio::test]
    async fn test_silent_failure_synthesizes_message() {
        let dir = TempDir::new().unwrap();
        let result = compile(dir.path(), &sh("exit 4"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(
            result.message.as_deref(),
            Some("Compilation failed with exit code 4")
        );
    }

    #[tokio::test]
    async fn test_empty_command_is_noop() {
        let dir = TempDir::new().unwrap();
        let result = compile(dir.path(), &[], Duration::from_secs(1)).await.unwrap();
        assert!(result.success);
    }
}
