//! Error types and handling for the studio proxy server.
//!
//! This module provides a unified error type [`AppError`] covering every failure
//! class a route can hit, and converts it into the outward `{"error": "..."}`
//! envelope with the matching HTTP status.

use crate::core::error_types::{ErrorCategoryCode, TRANSPORT_ERROR_MESSAGE};
use crate::core::logging::get_request_id;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::error::Error as _;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the application.
///
/// Every route returns `Result<_, AppError>`; nothing escapes to the transport
/// layer unconverted.
#[derive(Error, Debug)]
pub enum AppError {
    /// Client provided missing or invalid input
    #[error("{0}")]
    BadRequest(String),

    /// A required upstream credential is not configured
    #[error("{provider} is not configured: missing {setting}")]
    MissingCredential {
        provider: &'static str,
        setting: &'static str,
    },

    /// The upstream could not be reached or the connection failed mid-request
    #[error("Transport error talking to {provider}: {source}")]
    Transport {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The upstream did not answer within the allotted time
    #[error("Timed out after {after:?} waiting for {provider}")]
    Timeout {
        provider: &'static str,
        after: Duration,
    },

    /// The upstream answered with a non-2xx status
    #[error("{message}")]
    Upstream {
        provider: &'static str,
        status: StatusCode,
        message: String,
    },

    /// The upstream answered 2xx but the payload did not match its contract
    #[error("Invalid response shape from {provider}: {detail}")]
    InvalidShape {
        provider: &'static str,
        detail: String,
    },

    /// Generic internal server errors with custom message
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn invalid_shape(provider: &'static str, detail: impl Into<String>) -> Self {
        Self::InvalidShape {
            provider,
            detail: detail.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Upstream { status, .. } => *status,
            AppError::MissingCredential { .. }
            | AppError::Transport { .. }
            | AppError::Timeout { .. }
            | AppError::InvalidShape { .. }
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn category(&self) -> ErrorCategoryCode {
        match self {
            AppError::BadRequest(_) => ErrorCategoryCode::ClientInput,
            AppError::MissingCredential { .. } => ErrorCategoryCode::Configuration,
            AppError::Transport { .. } | AppError::Timeout { .. } => {
                ErrorCategoryCode::Transport
            }
            AppError::Upstream { status, .. } => {
                ErrorCategoryCode::for_upstream_status(status.as_u16())
            }
            AppError::InvalidShape { .. } => ErrorCategoryCode::InvalidShape,
            AppError::Internal(_) => ErrorCategoryCode::Internal,
        }
    }

    /// Message shown to the client. Transport internals stay in the server log.
    pub fn client_message(&self) -> String {
        match self {
            AppError::Transport { .. } | AppError::Timeout { .. } => {
                TRANSPORT_ERROR_MESSAGE.to_string()
            }
            AppError::MissingCredential { provider, .. } => {
                format!("Server configuration error: {} is not configured", provider)
            }
            other => other.to_string(),
        }
    }

    fn log(&self) {
        let request_id = get_request_id();
        let category = self.category();
        match self {
            AppError::BadRequest(message) => {
                tracing::debug!(request_id = %request_id, category = %category, "{}", message);
            }
            AppError::MissingCredential { provider, setting } => {
                tracing::error!(
                    request_id = %request_id,
                    category = %category,
                    provider = %provider,
                    setting = %setting,
                    "Upstream credential missing; refusing to call provider"
                );
            }
            AppError::Transport { provider, source } => {
                tracing::error!(
                    request_id = %request_id,
                    category = %category,
                    provider = %provider,
                    error = %source,
                    error_source = ?source.source(),
                    is_timeout = source.is_timeout(),
                    is_connect = source.is_connect(),
                    "HTTP request failed to provider"
                );
            }
            AppError::Timeout { provider, after } => {
                tracing::error!(
                    request_id = %request_id,
                    category = %category,
                    provider = %provider,
                    timeout_ms = after.as_millis() as u64,
                    "Upstream did not answer in time"
                );
            }
            AppError::Upstream {
                provider,
                status,
                message,
            } => {
                tracing::warn!(
                    request_id = %request_id,
                    category = %category,
                    provider = %provider,
                    status = status.as_u16(),
                    "Upstream rejected request: {}",
                    message
                );
            }
            AppError::InvalidShape { provider, detail } => {
                tracing::error!(
                    request_id = %request_id,
                    category = %category,
                    provider = %provider,
                    "Invalid upstream response shape: {}",
                    detail
                );
            }
            AppError::Internal(message) => {
                tracing::error!(request_id = %request_id, category = %category, "{}", message);
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.log();
        let status = self.status();
        let body = Json(json!({ "error": self.client_message() }));
        (status, body).into_response()
    }
}

/// Convenience type alias for Results using [`AppError`].
pub type Result<T> = std::result::Result<T, AppError>;
