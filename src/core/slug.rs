use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::LoadError;

/// Course/exercise identifier used to locate a check specification set
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slug {
    /// Course part (`cs50` in `cs50/hello`), absent for bare stage slugs
    pub course: Option<String>,
    /// Stage part (`hello` in `cs50/hello`)
    pub stage: String,
}

impl Slug {
    /// Parse `course/stage`, a bare `stage`, or `course/nested/stage`
    /// (everything after the first segment is the stage).
    pub fn parse(raw: &str) -> Result<Self, LoadError> {
        let trimmed = raw.trim().trim_matches('/');
        if trimmed.is_empty() {
            return Err(LoadError::InvalidSlug(raw.to_string()));
        }
        if trimmed
            .split('/')
            .any(|part| part.is_empty() || part == "." || part == "..")
        {
            return Err(LoadError::InvalidSlug(raw.to_string()));
        }

        match trimmed.split_once('/') {
            Some((course, stage)) => Ok(Self {
                course: Some(course.to_string()),
                stage: stage.to_string(),
            }),
            None => Ok(Self {
                course: None,
                stage: trimmed.to_string(),
            }),
        }
    }

    /// Last path segment of the stage, used as the default problem name
    pub fn problem(&self) -> &str {
        self.stage.rsplit('/').next().unwrap_or(&self.stage)
    }

    /// Course and stage, required for remote operations
    pub fn remote_parts(&self) -> Result<(&str, &str), LoadError> {
        match &self.course {
            Some(course) => Ok((course, &self.stage)),
            None => Err(LoadError::InvalidSlug(self.to_string())),
        }
    }
}

impl fmt::Display for Slug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.course {
            Some(course) => write!(f, "{}/{}", course, self.stage),
            None => write!(f, "{}", self.stage),
        }
    }
}
