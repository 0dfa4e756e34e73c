//! Unified upstream request execution.
//!
//! Every integration funnels its outbound call through [`invoke`]: one POST,
//! no retries, credential attached here and nowhere else. Non-2xx answers are
//! turned into [`AppError::Upstream`] before the caller sees the response, so
//! callers only ever decode success bodies.

use crate::core::config::ApiKey;
use crate::core::error_types::ErrorCategoryCode;
use crate::core::logging::get_request_id;
use crate::core::metrics::get_metrics;
use crate::core::{AppError, Result};
use axum::http::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::{Duration, Instant};

/// The three upstream services this proxy talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Stability,
    Imgbb,
}

impl Provider {
    pub const fn name(self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Stability => "stability",
            Provider::Imgbb => "imgbb",
        }
    }

    /// Environment variable an operator sets to configure the credential.
    pub const fn key_setting(self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Stability => "STABILITY_KEY",
            Provider::Imgbb => "IMGBB_API_KEY",
        }
    }
}

/// Resolve a provider credential, failing with a configuration error when absent.
pub fn require_credential(key: Option<&ApiKey>, provider: Provider) -> Result<&str> {
    key.map(ApiKey::expose).ok_or(AppError::MissingCredential {
        provider: provider.name(),
        setting: provider.key_setting(),
    })
}

/// Where the credential goes on the outbound request.
#[derive(Clone, Copy)]
pub enum UpstreamAuth<'a> {
    /// `Authorization: Bearer <key>`
    Bearer(&'a str),
    /// A multipart form field carrying the key
    FormField { name: &'static str, key: &'a str },
}

/// Outbound payload encoding.
pub enum UpstreamBody {
    Json(Value),
    Multipart(reqwest::multipart::Form),
}

impl UpstreamBody {
    pub fn json<T: Serialize>(payload: &T) -> Result<Self> {
        serde_json::to_value(payload)
            .map(UpstreamBody::Json)
            .map_err(|e| AppError::Internal(format!("Failed to encode upstream payload: {}", e)))
    }
}

/// A fully assembled upstream request.
pub struct UpstreamCall<'a> {
    pub provider: Provider,
    pub url: String,
    pub auth: UpstreamAuth<'a>,
    pub body: UpstreamBody,
    /// Optional `Accept` header
    pub accept: Option<&'static str>,
    /// Total deadline; `None` leaves only the client's connect timeout
    pub timeout: Option<Duration>,
    /// Prefix of the synthesized message when a rejection carries no readable error
    pub failure_message: &'static str,
}

/// Perform exactly one upstream call.
///
/// Returns the response only for 2xx statuses; every other outcome is an
/// [`AppError`] ready to be rendered.
pub async fn invoke(client: &reqwest::Client, call: UpstreamCall<'_>) -> Result<reqwest::Response> {
    let provider = call.provider;
    let request_id = get_request_id();

    let mut request = client.post(&call.url);
    if let Some(accept) = call.accept {
        request = request.header(reqwest::header::ACCEPT, accept);
    }
    if let Some(timeout) = call.timeout {
        request = request.timeout(timeout);
    }
    if let UpstreamAuth::Bearer(key) = call.auth {
        request = request.bearer_auth(key);
    }

    request = match call.body {
        UpstreamBody::Json(payload) => request.json(&payload),
        UpstreamBody::Multipart(mut form) => {
            if let UpstreamAuth::FormField { name, key } = call.auth {
                form = form.text(name, key.to_string());
            }
            request.multipart(form)
        }
    };

    let start = Instant::now();
    let response = request.send().await.map_err(|source| {
        let err = AppError::Transport {
            provider: provider.name(),
            source,
        };
        record_failure(provider, err.category());
        err
    })?;

    let latency = start.elapsed();
    get_metrics()
        .upstream_latency
        .with_label_values(&[provider.name()])
        .observe(latency.as_secs_f64());

    let status = response.status().as_u16();
    tracing::debug!(
        request_id = %request_id,
        provider = %provider.name(),
        url = %call.url,
        status = status,
        latency_ms = latency.as_millis() as u64,
        method = "POST",
        "HTTP request completed"
    );

    if (200..300).contains(&status) {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let err = AppError::Upstream {
        provider: provider.name(),
        status: StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
        message: rejection_message(status, &body, call.failure_message),
    };
    record_failure(provider, err.category());
    Err(err)
}

/// Read a 2xx body and decode it into the integration's typed payload.
pub async fn decode_json<T: DeserializeOwned>(
    response: reqwest::Response,
    provider: Provider,
) -> Result<T> {
    let bytes = read_body(response, provider).await?;
    serde_json::from_slice::<T>(&bytes).map_err(|e| shape_error(provider, e.to_string()))
}

/// Read a 2xx body in full.
pub async fn read_body(response: reqwest::Response, provider: Provider) -> Result<bytes::Bytes> {
    response.bytes().await.map_err(|source| {
        let err = AppError::Transport {
            provider: provider.name(),
            source,
        };
        record_failure(provider, err.category());
        err
    })
}

/// Build a shape error and count it.
pub fn shape_error(provider: Provider, detail: impl Into<String>) -> AppError {
    let err = AppError::invalid_shape(provider.name(), detail);
    record_failure(provider, err.category());
    err
}

/// Build and count a timeout for a call that outlived its deadline.
pub fn upstream_timeout(provider: Provider, after: Duration) -> AppError {
    let err = AppError::Timeout {
        provider: provider.name(),
        after,
    };
    record_failure(provider, err.category());
    err
}

pub(crate) fn record_failure(provider: Provider, category: ErrorCategoryCode) {
    get_metrics()
        .upstream_errors
        .with_label_values(&[provider.name(), category.as_str()])
        .inc();
}

/// Message for a non-2xx upstream answer.
///
/// Uses the provider's own error text when the body is JSON and carries one,
/// otherwise a synthesized message that names the status code.
pub fn rejection_message(status: u16, body: &str, fallback: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|json| extract_error_message(&json))
        .unwrap_or_else(|| format!("{} (upstream returned HTTP {})", fallback, status))
}

/// Extract canonical error message from provider error payload.
///
/// Understands `{"error": {"message": ...}}` (OpenAI, ImgBB),
/// `{"error": "..."}`, `{"message": "..."}` and Stability's
/// `{"errors": ["...", ...]}`.
pub fn extract_error_message(body: &Value) -> Option<String> {
    body.get("error")
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(|s| s.to_string())
        .or_else(|| {
            body.get("error")
                .and_then(|e| e.as_str())
                .map(|s| s.to_string())
        })
        .or_else(|| {
            body.get("message")
                .and_then(|m| m.as_str())
                .map(|s| s.to_string())
        })
        .or_else(|| {
            let errors: Vec<&str> = body
                .get("errors")?
                .as_array()?
                .iter()
                .filter_map(Value::as_str)
                .collect();
            if errors.is_empty() {
                None
            } else {
                Some(errors.join("; "))
            }
        })
}
