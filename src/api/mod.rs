//! Remote evaluation service
//!
//! - `client`: HTTP client (`reqwest`) for the upload, status and checks endpoints
//! - `files`: collection and encoding of submission files
//! - `submit`: the submission state machine

pub mod client;
pub mod files;
pub mod submit;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

pub use client::ApiClient;
pub use files::{collect_files, SubmitFile};
pub use submit::{submit, Submission, SubmissionState, SubmitOptions};

/// Body of `POST /api/submit`
#[derive(Debug, Clone, Serialize)]
pub struct UploadRequest {
    pub slug: String,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub idempotency_key: String,
    pub files: Vec<SubmitFile>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadAck {
    pub submission_id: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Per-check detail the server reports once evaluation is done
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCheckResult {
    pub name: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RemoteResult {
    #[serde(default)]
    pub results: Vec<RemoteCheckResult>,
}

/// Body of `GET /api/submissions/{id}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusReport {
    pub status: String,
    #[serde(default)]
    pub result: Option<RemoteResult>,
}

/// Body of `GET /api/courses/{course}/stages/{stage}/checks`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChecksBundle {
    pub version: String,
    pub files: Vec<BundleFile>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BundleFile {
    pub path: String,
    /// Base64-encoded file content
    pub content: String,
}

/// Submission endpoints, abstracted so the state machine can be driven
/// without a server
#[async_trait]
pub trait SubmissionApi: Send + Sync {
    async fn upload(&self, request: &UploadRequest) -> Result<UploadAck, ApiError>;

    async fn status(&self, submission_id: &str) -> Result<StatusReport, ApiError>;
}

/// Source of check specification bundles
#[async_trait]
pub trait SpecFetcher: Send + Sync {
    async fn fetch_checks(
        &self,
        course: &str,
        stage: &str,
        language: &str,
    ) -> Result<ChecksBundle, ApiError>;
}
