//! HTTP JSON implementation of the provisioning API.

use reqwest::{header, Client, Method, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, trace};

use crate::error::{ProviderError, Result, StratusError};
use crate::model::AttrValue;

use super::api::{Provisioner, ResourceHandle};
use async_trait::async_trait;

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for transient failures.
const MAX_RETRIES: u32 = 3;

/// Delay between retries in milliseconds.
const RETRY_DELAY_MS: u64 = 1000;

/// HTTP client for the provisioning API.
#[derive(Debug, Clone)]
pub struct HttpProvisioner {
    /// HTTP client.
    client: Client,
    /// API base URL.
    base_url: String,
    /// Bearer token.
    api_token: String,
}

/// Resource payload returned by create and update calls.
#[derive(Debug, Deserialize)]
struct ResourceResponse {
    remote_id: String,
    #[serde(default)]
    outputs: BTreeMap<String, String>,
}

impl HttpProvisioner {
    /// Creates a new provisioning API client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(base_url: &str, api_token: &str) -> Result<Self> {
        Self::with_timeout(base_url, api_token, DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a client with a custom timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_timeout(base_url: &str, api_token: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ProviderError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
        })
    }

    /// Executes a request with retries for transient failures.
    async fn execute<T: for<'de> Deserialize<'de>>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Option<T>> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                debug!("Retry attempt {attempt} of {MAX_RETRIES}");
                tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS * u64::from(attempt)))
                    .await;
            }

            match self.execute_once::<T>(method.clone(), path, body.as_ref()).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if e.is_retryable() {
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            StratusError::Provider(ProviderError::NetworkError {
                message: String::from("Max retries exceeded"),
            })
        }))
    }

    /// Executes a single request and maps the status to an error.
    async fn execute_once<T: for<'de> Deserialize<'de>>(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Option<T>> {
        let url = format!("{}{path}", self.base_url);
        trace!("Provisioning API request: {method} {url}");

        let mut request = self
            .client
            .request(method, &url)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_token));

        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            StratusError::Provider(ProviderError::NetworkError {
                message: format!("Request failed: {e}"),
            })
        })?;

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or_default();
            let retry_after = if retry_after == 0 { 60 } else { retry_after };

            return Err(StratusError::Provider(ProviderError::RateLimited {
                retry_after_secs: retry_after,
            }));
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(StratusError::Provider(ProviderError::AuthenticationFailed {
                message: String::from("Invalid API token"),
            }));
        }

        if status == StatusCode::NOT_FOUND {
            return Err(StratusError::Provider(ProviderError::NotFound {
                remote_id: path.rsplit('/').next().unwrap_or_default().to_string(),
            }));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StratusError::Provider(ProviderError::api_error(
                status.as_u16(),
                body,
            )));
        }

        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let parsed: T = response.json().await.map_err(|e| {
            StratusError::Provider(ProviderError::InvalidResponse {
                message: format!("Failed to parse response: {e}"),
            })
        })?;

        Ok(Some(parsed))
    }

    /// Validates the token by calling the account endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails for a non-auth reason.
    pub async fn validate_token(&self) -> Result<bool> {
        #[derive(Deserialize)]
        struct Account {
            #[serde(rename = "id")]
            _id: String,
        }

        match self.execute::<Account>(Method::GET, "/v1/account", None).await {
            Ok(_) => Ok(true),
            Err(StratusError::Provider(ProviderError::AuthenticationFailed { .. })) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Provisioner for HttpProvisioner {
    async fn create(
        &self,
        kind: &str,
        name: &str,
        attributes: &BTreeMap<String, AttrValue>,
    ) -> Result<ResourceHandle> {
        info!("Creating {kind} resource: {name}");

        let body = serde_json::json!({
            "kind": kind,
            "name": name,
            "attributes": attributes,
        });

        let response: ResourceResponse = self
            .execute(Method::POST, "/v1/resources", Some(body))
            .await?
            .ok_or_else(|| {
                StratusError::Provider(ProviderError::InvalidResponse {
                    message: String::from("Empty response to create"),
                })
            })?;

        info!("Created {kind} resource: {name} (ID: {})", response.remote_id);

        Ok(ResourceHandle {
            remote_id: response.remote_id,
            outputs: response.outputs,
        })
    }

    async fn update(
        &self,
        kind: &str,
        remote_id: &str,
        attributes: &BTreeMap<String, AttrValue>,
    ) -> Result<ResourceHandle> {
        info!("Updating {kind} resource: {remote_id}");

        let body = serde_json::json!({ "attributes": attributes });
        let path = format!("/v1/resources/{kind}/{remote_id}");

        let response: ResourceResponse = self
            .execute(Method::PATCH, &path, Some(body))
            .await?
            .ok_or_else(|| {
                StratusError::Provider(ProviderError::InvalidResponse {
                    message: String::from("Empty response to update"),
                })
            })?;

        Ok(ResourceHandle {
            remote_id: response.remote_id,
            outputs: response.outputs,
        })
    }

    async fn delete(&self, kind: &str, remote_id: &str) -> Result<()> {
        info!("Deleting {kind} resource: {remote_id}");

        let path = format!("/v1/resources/{kind}/{remote_id}");

        match self
            .execute::<serde_json::Value>(Method::DELETE, &path, None)
            .await
        {
            Ok(_) => Ok(()),
            // Already gone counts as deleted.
            Err(StratusError::Provider(ProviderError::NotFound { .. })) => {
                debug!("{kind} resource {remote_id} already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
