//! Rendering of check results and submissions
//!
//! Rendering is pure: these functions only build strings. Writing them
//! out is up to the caller.

use std::fmt::Write as _;

use serde_json::json;

use crate::api::{Submission, SubmissionState};
use crate::checks::{CheckOutcome, ResultSet};
use crate::core::CheckState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Format {
    /// Markers and messages for people
    #[default]
    Human,
    /// A single JSON document
    Json,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    /// Include each check's log lines
    pub show_log: bool,
}

pub fn render(results: &ResultSet, format: Format) -> String {
    render_with(results, format, &RenderOptions::default())
}

pub fn render_with(results: &ResultSet, format: Format, options: &RenderOptions) -> String {
    match format {
        Format::Human => render_human(results, options),
        Format::Json => render_json(results, options),
    }
}

fn render_human(results: &ResultSet, options: &RenderOptions) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Results for {} ({}, version {})",
        results.slug,
        results.language,
        short_version(&results.version)
    );

    for outcome in &results.results {
        let _ = writeln!(out, "{} {}", outcome.state.marker(), outcome.description);
        for line in detail_lines(outcome) {
            let _ = writeln!(out, "    {}", line);
        }
        if options.show_log && !outcome.log.is_empty() {
            let _ = writeln!(out, "    log:");
            for line in &outcome.log {
                let _ = writeln!(out, "      {}", line);
            }
        }
    }

    let summary = results.summary();
    let _ = writeln!(
        out,
        "Results: {}/{} passed ({} failed, {} errors, {} skipped)",
        summary.passed, summary.total, summary.failed, summary.errors, summary.skipped
    );
    out
}

fn detail_lines(outcome: &CheckOutcome) -> Vec<String> {
    let mut lines = Vec::new();
    match outcome.state {
        CheckState::Passed => {}
        CheckState::Failed => {
            if let Some(cause) = &outcome.cause {
                lines.push(cause.rationale.clone());
                if let Some(help) = &cause.help {
                    lines.push(help.clone());
                }
                if let (Some(expected), Some(actual)) = (&cause.expected, &cause.actual) {
                    lines.push(format!("expected: {}", indent_payload(expected)));
                    lines.push(format!("actual:   {}", indent_payload(actual)));
                }
            }
        }
        CheckState::Error => {
            if let Some(message) = &outcome.error {
                lines.push(format!("error: {}", message));
            }
        }
        CheckState::Skipped => {
            if let Some(prerequisite) = &outcome.skipped_because {
                lines.push(format!("skipped: requires \"{}\" to pass", prerequisite));
            }
        }
    }
    lines
}

fn indent_payload(payload: &str) -> String {
    payload.trim_end().replace('\n', "\n              ")
}

fn short_version(version: &str) -> &str {
    version.get(..12).unwrap_or(version)
}

fn render_json(results: &ResultSet, options: &RenderOptions) -> String {
    let mut outcomes = results.results.clone();
    if !options.show_log {
        for outcome in &mut outcomes {
            outcome.log.clear();
        }
    }
    let document = json!({
        "slug": results.slug,
        "language": results.language,
        "version": results.version,
        "results": outcomes,
        "summary": results.summary(),
    });
    serde_json::to_string_pretty(&document).unwrap_or_else(|_| "{}".to_string())
}

pub fn render_submission(submission: &Submission, format: Format) -> String {
    match format {
        Format::Json => serde_json::to_string_pretty(submission).unwrap_or_else(|_| "{}".to_string()),
        Format::Human => render_submission_human(submission),
    }
}

fn render_submission_human(submission: &Submission) -> String {
    let mut out = String::new();
    let id = submission.submission_id.as_deref().unwrap_or("-");
    let headline = match submission.state {
        SubmissionState::Succeeded => format!("Submission {} passed", id),
        SubmissionState::Failed => format!("Submission {} did not pass", id),
        SubmissionState::TimedOut => format!(
            "Submission {} is still being evaluated; check back later",
            id
        ),
        SubmissionState::Cancelled if submission.submission_id.is_some() => {
            format!("Submitted {} as {}; results will be available later", submission.slug, id)
        }
        SubmissionState::Cancelled => "Submission cancelled".to_string(),
        other => format!("Submission {} is {}", id, other),
    };
    let _ = writeln!(out, "{}", headline);

    for result in &submission.results {
        let marker = if result.passed {
            CheckState::Passed.marker()
        } else {
            CheckState::Failed.marker()
        };
        let label = result.description.as_deref().unwrap_or(&result.name);
        let _ = writeln!(out, "{} {}", marker, label);
    }
    if !submission.results.is_empty() {
        let passed = submission.results.iter().filter(|r| r.passed).count();
        let _ = writeln!(out, "Results: {}/{} passed", passed, submission.results.len());
    }
    out
}
