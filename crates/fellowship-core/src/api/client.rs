//! REST client for the portal backend.
//!
//! This module provides `HttpBackend`, the production `RemoteBackend`
//! implementation. Transport failures and gateway errors come back as
//! transient `ApiError`s so the caller can fall back to local state.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client, Method, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::models::{CommentRecord, ContentRecord, Profile};

use super::{ApiError, RemoteBackend};

// ============================================================================
// Constants
// ============================================================================

/// Default HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// HTTP backend client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
    token: Option<String>,
    initial_backoff_ms: u64,
}

impl HttpBackend {
    /// Create a new backend client rooted at `base_url`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid backend URL: {}", base_url))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Backend URL cannot be used as a base: {}", base_url);
        }

        Ok(Self {
            client,
            base_url,
            token: None,
            initial_backoff_ms: INITIAL_BACKOFF_MS,
        })
    }

    /// Set the bearer token for authenticated requests
    pub fn set_token(&mut self, token: String) {
        self.token = Some(token);
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn auth_headers(&self) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        if let Some(ref token) = self.token {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ApiError::Validation(format!("Invalid token header: {}", e)))?;
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Send a request, backing off on 429, and decode the JSON body.
    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> Result<T, ApiError> {
        let mut retries = 0;
        let mut backoff_ms = self.initial_backoff_ms;

        loop {
            let mut request = self
                .client
                .request(method.clone(), url.clone())
                .headers(self.auth_headers()?);
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await?;
            let status = response.status();

            if status.is_success() {
                let text = response.text().await?;
                debug!(%url, %status, "Backend request succeeded");
                return serde_json::from_str(&text).map_err(|e| {
                    ApiError::InvalidResponse(format!(
                        "Failed to parse response from {}: {}",
                        url, e
                    ))
                });
            }

            if status.as_u16() == 429 {
                retries += 1;
                if retries > MAX_RATE_LIMIT_RETRIES {
                    return Err(ApiError::RateLimited);
                }
                warn!(%url, retry = retries, backoff_ms, "Rate limited, backing off");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms *= 2; // Exponential backoff
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &body));
        }
    }
}

#[async_trait]
impl RemoteBackend for HttpBackend {
    async fn fetch_profile(&self, identity: &str) -> Result<Profile, ApiError> {
        let url = self.endpoint(&["profiles", identity]);
        self.send(Method::GET, url, None).await
    }

    async fn update_profile(&self, identity: &str, patch: &Value) -> Result<Profile, ApiError> {
        let url = self.endpoint(&["profiles", identity]);
        self.send(Method::PATCH, url, Some(patch)).await
    }

    async fn create_content(
        &self,
        owner: &str,
        payload: &Value,
    ) -> Result<ContentRecord, ApiError> {
        let url = self.endpoint(&["users", owner, "content"]);
        self.send(Method::POST, url, Some(payload)).await
    }

    async fn create_comment(
        &self,
        owner: &str,
        payload: &Value,
    ) -> Result<CommentRecord, ApiError> {
        let url = self.endpoint(&["users", owner, "comments"]);
        self.send(Method::POST, url, Some(payload)).await
    }

    async fn ping(&self) -> Result<(), ApiError> {
        let url = self.endpoint(&["health"]);
        let _: Value = self.send(Method::GET, url, None).await?;
        Ok(())
    }
}
