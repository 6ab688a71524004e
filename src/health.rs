//! Backend health check
//!
//! The answer service exposes `GET /api/health`, which returns
//! `{"status":"ok"}` when it is configured and `{"error": ...}` with a 500
//! when credentials are missing. The result gates whether capture may start.

use serde::Deserialize;
use url::Url;

use crate::Result;
use crate::answer::endpoint;

/// Health endpoint path
pub const HEALTH_PATH: &str = "/api/health";

/// Readiness of the answer backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendStatus {
    /// Backend is configured and reachable
    Ready,
    /// Backend is missing configuration or unreachable
    Misconfigured(String),
}

impl BackendStatus {
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl std::fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready => write!(f, "ok"),
            Self::Misconfigured(reason) => write!(f, "not ready: {reason}"),
        }
    }
}

/// Health check response body
#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: Option<String>,
    error: Option<String>,
}

/// Checks the answer backend
#[derive(Debug, Clone)]
pub struct HealthClient {
    client: reqwest::Client,
    url: Url,
}

impl HealthClient {
    /// Create a health client for the service at `base_url`
    ///
    /// # Errors
    ///
    /// Returns error if the health URL cannot be built
    pub fn new(client: reqwest::Client, base_url: &Url) -> Result<Self> {
        Ok(Self {
            client,
            url: endpoint(base_url, HEALTH_PATH)?,
        })
    }

    /// Query the backend
    ///
    /// Never fails: transport errors and unexpected bodies are reported as
    /// [`BackendStatus::Misconfigured`].
    pub async fn check(&self) -> BackendStatus {
        let response = match self.client.get(self.url.clone()).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(url = %self.url, error = %e, "health check failed");
                return BackendStatus::Misconfigured(format!("backend unreachable: {e}"));
            }
        };

        let status = response.status();
        let body: Option<HealthResponse> = response.json().await.ok();
        tracing::debug!(%status, "health check response");

        match body {
            Some(HealthResponse {
                status: Some(s), ..
            }) if status.is_success() && s == "ok" => BackendStatus::Ready,
            Some(HealthResponse {
                error: Some(error), ..
            }) => BackendStatus::Misconfigured(error),
            _ => BackendStatus::Misconfigured(format!("unexpected health response ({status})")),
        }
    }
}
