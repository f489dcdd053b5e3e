//! Process execution with an enforced wall-clock limit
//!
//! Every command runs as the leader of its own process group. When the limit
//! expires, or when the caller drops the execution future (a check that timed
//! out), the whole group is killed so no descendant outlives the check.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::ToolchainError;

/// Upper bound on captured bytes per stream; the rest is drained and dropped
const MAX_CAPTURE_BYTES: usize = 4 * 1024 * 1024;

/// How long to wait for pipes to close after the process is gone
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionStatus {
    /// Program exited normally with given exit code
    Exited(i32),
    /// Wall-clock limit exceeded; the process group was killed
    TimeLimitExceeded,
    /// Killed by signal
    Signaled(i32),
}

#[derive(Debug)]
pub struct ExecutionOutcome {
    /// Execution status
    pub status: ExecutionStatus,
    /// Wall time in milliseconds
    pub time_ms: u64,
    /// Stdout content (lossy UTF-8)
    pub stdout: String,
    /// Stderr content (lossy UTF-8)
    pub stderr: String,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, ExecutionStatus::Exited(0))
    }

    pub fn timed_out(&self) -> bool {
        matches!(self.status, ExecutionStatus::TimeLimitExceeded)
    }
}

/// Wall-clock limit applied when the caller sets none
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ExecutionSpec {
    pub work_dir: PathBuf,
    pub command: Vec<String>,
    pub timeout: Duration,
    pub stdin: Option<String>,
}

impl ExecutionSpec {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            command: vec![],
            timeout: DEFAULT_TIMEOUT,
            stdin: None,
        }
    }

    pub fn with_command(mut self, command: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }
}

/// Run a command to completion or until its wall-clock limit expires
pub async fn execute(spec: &ExecutionSpec) -> Result<ExecutionOutcome, ToolchainError> {
    let (program, args) = spec
        .command
        .split_first()
        .ok_or_else(|| ToolchainError::EmptyCommand(spec.work_dir.display().to_string()))?;

    debug!("Executing {:?} in {:?}", spec.command, spec.work_dir);

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(&spec.work_dir)
        .stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ToolchainError::NotFound {
                program: program.clone(),
            }
        } else {
            ToolchainError::Spawn {
                program: program.clone(),
                source,
            }
        }
    })?;

    let mut group = ProcessGroupGuard::new(child.id());
    let started = Instant::now();

    if let (Some(input), Some(mut stdin)) = (spec.stdin.clone(), child.stdin.take()) {
        // A program that never reads stdin must not block us; EPIPE is fine.
        tokio::spawn(async move {
            let _ = stdin.write_all(input.as_bytes()).await;
        });
    }

    let stdout_task = child.stdout.take().map(|s| tokio::spawn(read_capped(s)));
    let stderr_task = child.stderr.take().map(|s| tokio::spawn(read_capped(s)));

    let exit = match tokio::time::timeout(spec.timeout, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        Ok(Err(source)) => {
            return Err(ToolchainError::Io {
                program: program.clone(),
                source,
            })
        }
        Err(_) => {
            debug!(
                "{} exceeded {:?}, killing process group",
                program, spec.timeout
            );
            None
        }
    };

    // Reap stragglers (and on timeout, the program itself) so the pipes close.
    group.kill();
    if exit.is_none() {
        let _ = child.kill().await;
    }
    let time_ms = started.elapsed().as_millis() as u64;

    let stdout = collect(stdout_task).await;
    let stderr = collect(stderr_task).await;

    let status = match exit {
        Some(status) => status_from_exit(status),
        None => ExecutionStatus::TimeLimitExceeded,
    };

    debug!(
        "{} finished: status={:?}, time_ms={}, stdout={}B, stderr={}B",
        program,
        status,
        time_ms,
        stdout.len(),
        stderr.len()
    );

    Ok(ExecutionOutcome {
        status,
        time_ms,
        stdout,
        stderr,
    })
}

fn status_from_exit(status: ExitStatus) -> ExecutionStatus {
    if let Some(code) = status.code() {
        return ExecutionStatus::Exited(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExecutionStatus::Signaled(signal);
        }
    }
    ExecutionStatus::Exited(-1)
}

async fn read_capped<R: AsyncRead + Unpin>(mut reader: R) -> Vec<u8> {
    let mut captured = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = MAX_CAPTURE_BYTES.saturating_sub(captured.len());
                captured.extend_from_slice(&buf[..n.min(room)]);
            }
        }
    }
    captured
}

async fn collect(task: Option<tokio::task::JoinHandle<Vec<u8>>>) -> String {
    let Some(mut task) = task else {
        return String::new();
    };
    match tokio::time::timeout(PIPE_DRAIN_GRACE, &mut task).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(Err(e)) => {
            warn!("Output reader task failed: {}", e);
            String::new()
        }
        Err(_) => {
            // A descendant escaped the process group and still holds the pipe.
            warn!("Output pipe still open after process exit, discarding");
            task.abort();
            String::new()
        }
    }
}

/// Kills a child's whole process group exactly once, at the latest on drop
struct ProcessGroupGuard {
    #[cfg(unix)]
    pgid: Option<nix::unistd::Pid>,
}

impl ProcessGroupGuard {
    #[cfg(unix)]
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.map(|pid| nix::unistd::Pid::from_raw(pid as i32)),
        }
    }

    #[cfg(not(unix))]
    fn new(_pid: Option<u32>) -> Self {
        Self {}
    }

    fn kill(&mut self) {
        #[cfg(unix)]
        if let Some(pgid) = self.pgid.take() {
            use nix::errno::Errno;
            use nix::sys::signal::{killpg, Signal};

            match killpg(pgid, Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => warn!("Failed to kill process group {}: {}", pgid, e),
            }
        }
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}
