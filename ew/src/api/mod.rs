//! Minimal JSON API client
//!
//! Stand-in for the console's REST layer: enough to issue guarded GETs and to
//! classify throttling and auth failures.

use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::ServerConfig;
use crate::guard::Throttled;
use crate::http;

/// Errors from API calls
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("Unauthorized ({status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("API error {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ApiError::RateLimited { .. })
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized { .. })
    }
}

impl Throttled for ApiError {
    fn is_throttled(&self) -> bool {
        self.is_rate_limit()
    }
}

/// JSON-over-HTTP client for the console API
pub struct ApiClient {
    http: Client,
    config: ServerConfig,
    token: Option<String>,
}

impl ApiClient {
    pub fn from_config(config: &ServerConfig) -> Result<Self, ApiError> {
        debug!(base_url = %config.base_url, "ApiClient::from_config: called");
        let http = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            http,
            config: config.clone(),
            token: config.token(),
        })
    }

    /// GET `path` relative to the base URL and decode the JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.config.url(path);
        debug!(%url, "get_json: called");

        let mut request = self.http.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status().as_u16();

        if status == 429 {
            let retry_after = http::retry_after(response.headers());
            debug!(?retry_after, "get_json: rate limited (429)");
            return Err(ApiError::RateLimited { retry_after });
        }

        if status == 401 || status == 403 {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Unauthorized { status, message });
        }

        if !response.status().is_success() {
            let message = response.text().await.unwrap_or_default();
            debug!(status, "get_json: API error");
            return Err(ApiError::Status { status, message });
        }

        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }
}
