//! Client-facing error taxonomy for the chat endpoint
//!
//! All of these are produced before the first streamed byte. Once a stream
//! has started, failures end the stream instead.
//!
//! | Variant | Status |
//! |---|---|
//! | `Validation` | 400 |
//! | `MethodNotAllowed` | 405 |
//! | `RateLimited` | 429 + `Retry-After` |
//! | `MissingConfig` | 500 |
//! | `UpstreamUnavailable` | 502 |

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::gate::insert_quota_headers;

/// Errors surfaced to chat clients
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChatError {
    /// Bad input shape or size
    #[error("{0}")]
    Validation(String),

    /// Only POST is accepted
    #[error("Method not allowed")]
    MethodNotAllowed,

    /// Rejected by the rate gate
    #[error("Too many requests, retry in {retry_after_secs} seconds")]
    RateLimited { limit: u32, retry_after_secs: u64 },

    /// Required configuration (the upstream API key) is absent
    #[error("Chat service is not configured")]
    MissingConfig,

    /// Upstream refused or could not be reached. Detail stays in the logs.
    #[error("The assistant is temporarily unavailable")]
    UpstreamUnavailable,
}

impl ChatError {
    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::Validation(_) => StatusCode::BAD_REQUEST,
            ChatError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ChatError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ChatError::MissingConfig => StatusCode::INTERNAL_SERVER_ERROR,
            ChatError::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
        }
    }

    /// Machine-readable error type used in the response body and logs
    pub fn category(&self) -> &'static str {
        match self {
            ChatError::Validation(_) => "validation_error",
            ChatError::MethodNotAllowed => "method_not_allowed",
            ChatError::RateLimited { .. } => "rate_limited",
            ChatError::MissingConfig => "missing_config",
            ChatError::UpstreamUnavailable => "upstream_unavailable",
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "type": self.category(),
                "message": self.to_string(),
            }
        });

        let mut response = (self.status(), Json(body)).into_response();

        if let ChatError::RateLimited {
            limit,
            retry_after_secs,
        } = self
        {
            let headers = response.headers_mut();
            insert_quota_headers(headers, limit, 0);
            headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        } else if matches!(self, ChatError::MethodNotAllowed) {
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static("POST"));
        }

        response
    }
}
