//! HTTP client for the evaluation service
//!
//! Successful responses may be wrapped in `{ "success": true, "data": ... }`;
//! error responses carry `{ "error": { "code", "message" } }`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::{ChecksBundle, SpecFetcher, StatusReport, SubmissionApi, UploadAck, UploadRequest};
use crate::error::ApiError;

/// Per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    token: Option<SecretString>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.token.is_some())
            .finish()
    }
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, token: Option<SecretString>) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("exercheck/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);
        let request = self.authorize(self.http.get(&url).query(query));
        let response = request.send().await.map_err(network_error)?;
        handle_response(response).await
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);
        let request = self.authorize(self.http.post(&url).json(body));
        let response = request.send().await.map_err(network_error)?;
        handle_response(response).await
    }
}

fn network_error(err: reqwest::Error) -> ApiError {
    ApiError::Network(err.to_string())
}

async fn handle_response<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let status = response.status();
    let body = response.text().await.map_err(network_error)?;
    let value: Value = serde_json::from_str(&body).map_err(|_| {
        if status.is_success() {
            ApiError::InvalidResponse("response is not valid JSON".to_string())
        } else {
            ApiError::Http {
                status: status.as_u16(),
                code: "UNKNOWN_ERROR".to_string(),
                message: status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string(),
            }
        }
    })?;

    if !status.is_success() {
        let error = value.get("error");
        let field = |name: &str, default: &str| {
            error
                .and_then(|e| e.get(name))
                .and_then(Value::as_str)
                .unwrap_or(default)
                .to_string()
        };
        return Err(ApiError::Http {
            status: status.as_u16(),
            code: field("code", "UNKNOWN_ERROR"),
            message: field("message", "Unknown error"),
        });
    }

    let data = match value {
        Value::Object(mut map) if map.contains_key("data") => map.remove("data").unwrap_or(Value::Null),
        other => other,
    };
    serde_json::from_value(data).map_err(|e| ApiError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl SubmissionApi for ApiClient {
    async fn upload(&self, request: &UploadRequest) -> Result<UploadAck, ApiError> {
        self.post_json("/api/submit", request).await
    }

    async fn status(&self, submission_id: &str) -> Result<StatusReport, ApiError> {
        self.get_json(&format!("/api/submissions/{}", submission_id), &[])
            .await
    }
}

#[async_trait]
impl SpecFetcher for ApiClient {
    async fn fetch_checks(
        &self,
        course: &str,
        stage: &str,
        language: &str,
    ) -> Result<ChecksBundle, ApiError> {
        self.get_json(
            &format!("/api/courses/{}/stages/{}/checks", course, stage),
            &[("language", language)],
        )
        .await
    }
}
