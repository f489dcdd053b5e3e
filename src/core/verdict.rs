use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome state of a single check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckState {
    /// The body ran to completion
    Passed,
    /// The body signalled that the student's code is wrong
    Failed,
    /// A prerequisite did not pass; the body never ran
    Skipped,
    /// The body itself broke (panic, toolchain missing, check defect)
    Error,
}

impl CheckState {
    pub fn is_passed(&self) -> bool {
        matches!(self, CheckState::Passed)
    }

    /// Symbol used by the human-readable report
    pub fn marker(&self) -> &'static str {
        match self {
            CheckState::Passed => ":)",
            CheckState::Failed => ":(",
            CheckState::Skipped => ":|",
            CheckState::Error => "!!",
        }
    }
}

impl fmt::Display for CheckState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckState::Passed => "passed",
            CheckState::Failed => "failed",
            CheckState::Skipped => "skipped",
            CheckState::Error => "error",
        };
        write!(f, "{}", s)
    }
}
