//! Submission state machine
//!
//! ```text
//! pending -> uploading -> queued -> evaluating -> succeeded | failed
//! ```
//! Any non-terminal state may also end in `timed_out` (deadline elapsed) or
//! `cancelled` (declined, cancelled by the caller, or not waited for in
//! async mode). The upload is issued exactly once; polling never cancels
//! the remote job.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

use super::files::{collect_files, submission_paths};
use super::{RemoteCheckResult, SubmissionApi, UploadRequest};
use crate::error::SubmitError;
use crate::languages::LanguageAdapter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionState {
    Pending,
    Uploading,
    Queued,
    Evaluating,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl SubmissionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubmissionState::Succeeded
                | SubmissionState::Failed
                | SubmissionState::TimedOut
                | SubmissionState::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: SubmissionState) -> bool {
        use SubmissionState::*;

        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, TimedOut) | (_, Cancelled) => true,
            (Pending, Uploading) => true,
            (Uploading, Queued) => true,
            (Queued, Queued | Evaluating | Succeeded | Failed) => true,
            (Evaluating, Evaluating | Succeeded | Failed) => true,
            _ => false,
        }
    }

    /// Map a server status string; unknown strings yield None
    pub fn from_remote(status: &str) -> Option<Self> {
        match status.trim().to_lowercase().as_str() {
            "pending" | "queued" => Some(SubmissionState::Queued),
            "running" | "evaluating" => Some(SubmissionState::Evaluating),
            "success" | "succeeded" => Some(SubmissionState::Succeeded),
            "failure" | "failed" | "error" | "timeout" => Some(SubmissionState::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubmissionState::Pending => "pending",
            SubmissionState::Uploading => "uploading",
            SubmissionState::Queued => "queued",
            SubmissionState::Evaluating => "evaluating",
            SubmissionState::Succeeded => "succeeded",
            SubmissionState::Failed => "failed",
            SubmissionState::TimedOut => "timed_out",
            SubmissionState::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Submission {
    pub slug: String,
    pub language: String,
    pub files: Vec<String>,
    pub idempotency_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission_id: Option<String>,
    pub state: SubmissionState,
    /// Per-check detail reported by the server on a terminal state
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<RemoteCheckResult>,
    /// Status queries issued
    pub polls: u32,
}

impl Submission {
    fn new(slug: &str, language: &str) -> Self {
        Self {
            slug: slug.to_string(),
            language: language.to_string(),
            files: Vec::new(),
            idempotency_key: uuid::Uuid::new_v4().to_string(),
            submission_id: None,
            state: SubmissionState::Pending,
            results: Vec::new(),
            polls: 0,
        }
    }

    pub fn transition(&mut self, next: SubmissionState) -> Result<(), SubmitError> {
        if !self.state.can_transition_to(next) {
            return Err(SubmitError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        if self.state != next {
            info!("Submission {} -> {}", self.state, next);
        }
        self.state = next;
        Ok(())
    }
}

/// Status query cadence: `fast` for the first `fast_polls` queries, then `slow`
#[derive(Debug, Clone, Copy)]
pub struct PollSchedule {
    pub fast: Duration,
    pub fast_polls: u32,
    pub slow: Duration,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            fast: Duration::from_secs(1),
            fast_polls: 5,
            slow: Duration::from_secs(2),
        }
    }
}

impl PollSchedule {
    /// Delay before poll number `poll` (0-based)
    pub fn delay(&self, poll: u32) -> Duration {
        if poll < self.fast_polls {
            self.fast
        } else {
            self.slow
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubmitOptions {
    pub slug: String,
    pub message: Option<String>,
    /// Extra file patterns beyond the adapter's sources
    pub extra_files: Vec<String>,
    /// Return right after the upload instead of polling
    pub async_mode: bool,
    /// Total time allowed for polling
    pub timeout: Duration,
    pub schedule: PollSchedule,
}

impl SubmitOptions {
    pub fn new(slug: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            message: None,
            extra_files: Vec::new(),
            async_mode: false,
            timeout: Duration::from_secs(60),
            schedule: PollSchedule::default(),
        }
    }
}

/// Collect, confirm, upload and (unless in async mode) poll to a terminal
/// state. `confirm` sees the file list; returning false cancels before
/// anything is sent. Setting `cancel` to true stops polling.
pub async fn submit<C>(
    workspace: &Path,
    adapter: &dyn LanguageAdapter,
    api: &dyn SubmissionApi,
    options: &SubmitOptions,
    confirm: C,
    mut cancel: watch::Receiver<bool>,
) -> Result<Submission, SubmitError>
where
    C: FnOnce(&[String]) -> bool,
{
    let mut submission = Submission::new(&options.slug, adapter.name());

    let paths = submission_paths(workspace, adapter, &options.extra_files)?;
    let files = collect_files(workspace, &paths)?;
    submission.files = files.iter().map(|f| f.path.clone()).collect();
    debug!("Submission files: {:?}", submission.files);

    if !confirm(&submission.files) {
        submission.transition(SubmissionState::Cancelled)?;
        return Ok(submission);
    }

    submission.transition(SubmissionState::Uploading)?;
    let request = UploadRequest {
        slug: options.slug.clone(),
        language: adapter.name().to_string(),
        message: options.message.clone(),
        idempotency_key: submission.idempotency_key.clone(),
        files,
    };
    let ack = api.upload(&request).await?;
    info!("Uploaded submission {}", ack.submission_id);
    submission.submission_id = Some(ack.submission_id.clone());

    if options.async_mode {
        // Not tracked locally any further; the server keeps evaluating.
        submission.transition(SubmissionState::Cancelled)?;
        return Ok(submission);
    }

    submission.transition(SubmissionState::Queued)?;
    poll(&mut submission, &ack.submission_id, api, options, &mut cancel).await?;
    Ok(submission)
}

async fn poll(
    submission: &mut Submission,
    submission_id: &str,
    api: &dyn SubmissionApi,
    options: &SubmitOptions,
    cancel: &mut watch::Receiver<bool>,
) -> Result<(), SubmitError> {
    let deadline = Instant::now() + options.timeout;

    loop {
        let now = Instant::now();
        if now >= deadline {
            warn!(
                "Gave up waiting for submission {} after {}s",
                submission_id,
                options.timeout.as_secs()
            );
            return submission.transition(SubmissionState::TimedOut);
        }

        let delay = options.schedule.delay(submission.polls).min(deadline - now);
        tokio::select! {
            _ = sleep(delay) => {}
            _ = cancelled(cancel) => {
                return submission.transition(SubmissionState::Cancelled);
            }
        }
        if Instant::now() >= deadline {
            continue;
        }

        submission.polls += 1;
        debug!("Polling submission {} (#{})", submission_id, submission.polls);

        let report = tokio::select! {
            report = api.status(submission_id) => report,
            _ = sleep_until(deadline) => {
                warn!(
                    "Status query for {} still pending at the {}s deadline",
                    submission_id,
                    options.timeout.as_secs()
                );
                return submission.transition(SubmissionState::TimedOut);
            }
            _ = cancelled(cancel) => {
                return submission.transition(SubmissionState::Cancelled);
            }
        };
        let report = match report {
            Ok(report) => report,
            Err(e) => {
                warn!("Status query for {} failed: {}", submission_id, e);
                continue;
            }
        };

        let Some(next) = SubmissionState::from_remote(&report.status) else {
            warn!("Unknown submission status {:?}", report.status);
            continue;
        };
        if next == SubmissionState::Queued && submission.state == SubmissionState::Evaluating {
            debug!("Ignoring stale queued status");
            continue;
        }

        if next.is_terminal() {
            submission.results = report.result.map(|r| r.results).unwrap_or_default();
        }
        submission.transition(next)?;
        if next.is_terminal() {
            return Ok(());
        }
    }
}

/// Resolves once the cancel flag is set. A dropped sender never cancels.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
