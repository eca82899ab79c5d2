//! Failure taxonomy for calls to the external model services.
//!
//! Every provider maps its transport and protocol failures onto
//! [`ServiceError`] so callers can tell a slow server from a dead one from
//! a broken one without parsing messages.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// The request did not complete within the configured timeout.
    #[error("{service} request timed out after {timeout_secs}s")]
    Timeout { service: String, timeout_secs: u64 },

    /// Connection refused, DNS failure, HTTP 429 or 5xx.
    #[error("{service} service is unavailable: {reason}")]
    Unavailable { service: String, reason: String },

    /// HTTP 4xx other than 429: the request itself is wrong (unknown model,
    /// bad key). Retrying will not help.
    #[error("{service} service rejected the request (HTTP {status}): {body}")]
    Rejected {
        service: String,
        status: u16,
        body: String,
    },

    /// The service answered but the payload could not be understood.
    #[error("{service} service returned a malformed response: {reason}")]
    MalformedResponse { service: String, reason: String },

    #[error("{service} provider is disabled")]
    Disabled { service: String },
}

impl ServiceError {
    /// Stable snake_case code used in structured results and HTTP bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Timeout { .. } => "timeout",
            ServiceError::Unavailable { .. } => "unavailable",
            ServiceError::Rejected { .. } => "rejected",
            ServiceError::MalformedResponse { .. } => "malformed_response",
            ServiceError::Disabled { .. } => "disabled",
        }
    }

    /// Whether a caller could reasonably try the same request again later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ServiceError::Timeout { .. } | ServiceError::Unavailable { .. }
        )
    }

    pub fn malformed(service: &str, reason: impl Into<String>) -> Self {
        ServiceError::MalformedResponse {
            service: service.to_string(),
            reason: reason.into(),
        }
    }
}
