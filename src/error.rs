//! Error types for exercheck
//!
//! Load-time and detection errors are fatal to a run. Toolchain errors are
//! converted into per-check outcomes by the runner. Submission errors carry
//! enough information for the caller to decide whether to retry.

use std::path::PathBuf;
use thiserror::Error;

/// Exit code: every check passed, or the submission was accepted.
pub const EXIT_SUCCESS: u8 = 0;
/// Exit code: at least one check did not pass, or evaluation did not succeed.
pub const EXIT_NOT_PASSED: u8 = 1;
/// Exit code: usage, load, detection or transport error.
pub const EXIT_ERROR: u8 = 2;

/// Errors raised while resolving a check specification set
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("invalid check specification: {reason}")]
    InvalidCheckSpec { reason: String },

    #[error("check '{check}' requires unknown check '{prerequisite}'{}", suggestion_suffix(.suggestion))]
    UnknownPrerequisite {
        check: String,
        prerequisite: String,
        suggestion: Option<String>,
    },

    #[error("circular prerequisites: {}", .cycle.join(" -> "))]
    CyclicPrerequisites { cycle: Vec<String> },

    #[error("check '{0}' is declared more than once")]
    DuplicateCheck(String),

    #[error("unknown check '{target}'{}", suggestion_suffix(.suggestion))]
    UnknownTarget {
        target: String,
        suggestion: Option<String>,
    },

    #[error("invalid slug '{0}': expected 'course/stage'")]
    InvalidSlug(String),

    #[error("could not find checks for '{slug}'. Use --local to point at a checks directory")]
    NotFound { slug: String },

    #[error("failed to fetch checks for '{slug}': {source}")]
    Fetch {
        slug: String,
        #[source]
        source: ApiError,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn suggestion_suffix(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(name) => format!(" (did you mean '{}'?)", name),
        None => String::new(),
    }
}

/// Errors raised while selecting the language of a workspace
#[derive(Error, Debug, PartialEq)]
pub enum DetectError {
    #[error(
        "could not decide between {}; pass --language to choose one",
        .candidates.join(", ")
    )]
    AmbiguousLanguage { candidates: Vec<String> },

    #[error("no source files of a supported language found in {dir}; pass --language to choose one")]
    NoLanguageDetected { dir: PathBuf },

    #[error("unsupported language '{name}' (supported: {})", .supported.join(", "))]
    UnknownLanguage { name: String, supported: Vec<String> },
}

/// Errors raised when a language toolchain cannot be invoked at all
#[derive(Error, Debug)]
pub enum ToolchainError {
    #[error("{program} not found; make sure it is installed and on PATH")]
    NotFound { program: String },

    #[error("no command configured for {0}")]
    EmptyCommand(String),

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while running {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors returned by the remote evaluation service
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    /// The request never produced a response. Safe to retry.
    #[error("network error: {0}")]
    Network(String),

    #[error("{message} ({code}, HTTP {status})")]
    Http {
        status: u16,
        code: String,
        message: String,
    },

    #[error("invalid response from server: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// Whether re-invoking the same call may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Network(_) => true,
            ApiError::Http { status, .. } => *status >= 500 || *status == 429,
            ApiError::InvalidResponse(_) => false,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Http { status: 401, .. })
    }
}

/// Errors raised by the submission state machine
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("upload failed: {0}")]
    Api(#[from] ApiError),

    #[error("no files found to submit")]
    NoFiles,

    #[error("file too large: {path} ({size} bytes, max {max})")]
    FileTooLarge { path: String, size: u64, max: u64 },

    #[error("invalid file pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("total submission size exceeds limit ({total} bytes, max {max})")]
    TotalTooLarge { total: u64, max: u64 },

    #[error("invalid submission transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SubmitError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SubmitError::Api(e) => e.is_retryable(),
            _ => false,
        }
    }
}
