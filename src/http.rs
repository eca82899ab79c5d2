//! Shared HTTP plumbing for the model service clients.
//!
//! One POST, no retries. Transport and status failures are mapped onto
//! [`ServiceError`] here so the embedding and generation providers only
//! deal with payload shapes.

use std::time::Duration;

use knowledge_chat_core::error::ServiceError;
use reqwest::StatusCode;

/// Longest response body quoted back in a [`ServiceError::Rejected`].
const MAX_ERROR_BODY: usize = 500;

pub struct JsonClient {
    client: reqwest::Client,
    service: &'static str,
    timeout_secs: u64,
    bearer: Option<String>,
}

impl JsonClient {
    /// `service` names the remote in error messages (`"embedding"` or
    /// `"generation"`).
    pub fn new(service: &'static str, timeout_secs: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            service,
            timeout_secs,
            bearer: None,
        })
    }

    pub fn with_bearer(mut self, token: String) -> Self {
        self.bearer = Some(token);
        self
    }

    pub async fn post(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, ServiceError> {
        let mut request = self.client.post(url).json(body);
        if let Some(token) = &self.bearer {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.transport_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(self.service, status, &text));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| match e.is_timeout() {
                true => self.timeout(),
                false => ServiceError::malformed(self.service, e.to_string()),
            })
    }

    fn timeout(&self) -> ServiceError {
        ServiceError::Timeout {
            service: self.service.to_string(),
            timeout_secs: self.timeout_secs,
        }
    }

    fn transport_error(&self, url: &str, err: reqwest::Error) -> ServiceError {
        if err.is_timeout() {
            return self.timeout();
        }
        ServiceError::Unavailable {
            service: self.service.to_string(),
            reason: format!("cannot reach {}: {}", url, err),
        }
    }
}

/// Classify a non-success HTTP status.
pub fn status_error(service: &str, status: StatusCode, body: &str) -> ServiceError {
    let body: String = body.trim().chars().take(MAX_ERROR_BODY).collect();
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ServiceError::Unavailable {
            service: service.to_string(),
            reason: format!("HTTP {}: {}", status.as_u16(), body),
        }
    } else {
        ServiceError::Rejected {
            service: service.to_string(),
            status: status.as_u16(),
            body,
        }
    }
}
