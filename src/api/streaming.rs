//! Streaming chat relay.
//!
//! The upstream SSE body is read by a spawned producer task that decodes
//! assistant text fragments and pushes them onto a bounded channel. The
//! outward response body drains the receiving end. Closing either side ends
//! the other:
//!
//! - upstream EOF, `data: [DONE]` or an upstream failure drops the sender and
//!   the outward body finishes after the last queued fragment;
//! - the client going away drops the outward body and with it the receiver;
//!   the producer sees the closed channel, stops reading and drops the
//!   upstream connection without draining it.
//!
//! The channel bound is the backpressure: the producer cannot run more than
//! [`RELAY_CHANNEL_CAPACITY`] fragments ahead of the client.

use crate::api::models::StreamChunk;
use crate::api::upstream::{extract_error_message, record_failure, Provider};
use crate::core::config::StreamFormat;
use crate::core::error_types::{ErrorCategoryCode, TRANSPORT_ERROR_MESSAGE};
use crate::core::metrics::get_metrics;
use axum::body::{Body, Bytes};
use axum::http::{header, StatusCode};
use axum::response::Response;
use futures::stream::{Stream, StreamExt};
use serde_json::Value;
use std::fmt::Display;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Fragments the producer may queue ahead of the client.
pub const RELAY_CHANNEL_CAPACITY: usize = 16;

/// Why a relay ended before the upstream finished cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("Upstream stream failed: {0}")]
    Upstream(String),

    /// Connection-level failure; details stay in the server log
    #[error("{}", TRANSPORT_ERROR_MESSAGE)]
    Transport,

    #[error("Upstream stream stalled for more than {0:?}")]
    IdleTimeout(Duration),
}

/// One item on the relay channel.
pub type RelayItem = std::result::Result<String, RelayError>;

/// How the producer task finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Completed,
    ClientDisconnected,
    UpstreamFailed,
}

#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub provider: Provider,
    pub capacity: usize,
    /// Maximum wait for the next upstream chunk
    pub idle_timeout: Option<Duration>,
    /// Request ID for log lines emitted from the producer task
    pub request_id: String,
}

impl RelayOptions {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            capacity: RELAY_CHANNEL_CAPACITY,
            idle_timeout: None,
            request_id: String::new(),
        }
    }
}

/// A running relay: the consumer end of the channel plus the producer task.
pub struct ChatRelay {
    pub fragments: mpsc::Receiver<RelayItem>,
    pub task: JoinHandle<RelayOutcome>,
}

/// Start relaying an upstream SSE byte stream.
pub fn spawn_relay<S, E>(upstream: S, options: RelayOptions) -> ChatRelay
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let (tx, rx) = mpsc::channel(options.capacity.max(1));
    let task = tokio::spawn(run_relay(upstream, tx, options));
    ChatRelay {
        fragments: rx,
        task,
    }
}

async fn run_relay<S, E>(
    upstream: S,
    tx: mpsc::Sender<RelayItem>,
    options: RelayOptions,
) -> RelayOutcome
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let mut upstream = Box::pin(upstream);
    let mut decoder = SseDecoder::default();
    let mut relayed = 0usize;

    let outcome = 'relay: loop {
        let next = tokio::select! {
            biased;
            _ = tx.closed() => break 'relay RelayOutcome::ClientDisconnected,
            next = next_chunk(&mut upstream, options.idle_timeout) => next,
        };

        let (events, upstream_done) = match next {
            Ok(Some(Ok(bytes))) => (decoder.push(&bytes), false),
            Ok(Some(Err(e))) => {
                tracing::error!(
                    request_id = %options.request_id,
                    provider = %options.provider.name(),
                    error = %e,
                    "Upstream stream read failed"
                );
                let _ = tx.send(Err(RelayError::Transport)).await;
                break 'relay RelayOutcome::UpstreamFailed;
            }
            Ok(None) => (decoder.finish(), true),
            Err(_) => {
                let limit = options.idle_timeout.unwrap_or_default();
                let _ = tx.send(Err(RelayError::IdleTimeout(limit))).await;
                break 'relay RelayOutcome::UpstreamFailed;
            }
        };

        for event in events {
            match event {
                SseEvent::Fragment(text) => {
                    if tx.send(Ok(text)).await.is_err() {
                        break 'relay RelayOutcome::ClientDisconnected;
                    }
                    relayed += 1;
                }
                SseEvent::Done => break 'relay RelayOutcome::Completed,
                SseEvent::Error(message) => {
                    let _ = tx.send(Err(RelayError::Upstream(message))).await;
                    break 'relay RelayOutcome::UpstreamFailed;
                }
            }
        }

        if upstream_done {
            break 'relay RelayOutcome::Completed;
        }
    };

    // Dropping the pinned upstream here releases the upstream connection
    drop(upstream);

    let provider = options.provider;
    get_metrics()
        .stream_fragments
        .with_label_values(&[provider.name()])
        .inc_by(relayed as u64);

    match outcome {
        RelayOutcome::Completed => tracing::debug!(
            request_id = %options.request_id,
            provider = %provider.name(),
            fragments = relayed,
            "Stream relay completed"
        ),
        RelayOutcome::ClientDisconnected => {
            get_metrics().client_disconnects_total.inc();
            tracing::info!(
                request_id = %options.request_id,
                provider = %provider.name(),
                fragments = relayed,
                "Client disconnected during streaming; upstream read aborted"
            );
        }
        RelayOutcome::UpstreamFailed => {
            record_failure(provider, ErrorCategoryCode::Stream);
            tracing::warn!(
                request_id = %options.request_id,
                provider = %provider.name(),
                fragments = relayed,
                "Upstream stream ended with an error"
            );
        }
    }

    outcome
}

type NextChunk<E> =
    std::result::Result<Option<std::result::Result<Bytes, E>>, tokio::time::error::Elapsed>;

async fn next_chunk<S, E>(
    upstream: &mut std::pin::Pin<Box<S>>,
    idle: Option<Duration>,
) -> NextChunk<E>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
{
    match idle {
        Some(limit) => tokio::time::timeout(limit, upstream.next()).await,
        None => Ok(upstream.next().await),
    }
}

/// Decoded SSE event of an OpenAI-style chat completion stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Fragment(String),
    Done,
    Error(String),
}

/// Incremental decoder for `data:` lines of a chat completion stream.
///
/// Bytes are buffered until a full line is available, so chunk boundaries
/// (including ones inside a multi-byte character) do not affect the output.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feed a chunk and return the events completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = decode_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let line = std::mem::take(&mut self.buffer);
        decode_line(&line).into_iter().collect()
    }
}

fn decode_line(raw: &[u8]) -> Option<SseEvent> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches(['\n', '\r']);
    let data = line.strip_prefix("data:")?.trim_start();

    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }

    let json: Value = match serde_json::from_str(data) {
        Ok(json) => json,
        Err(e) => {
            tracing::debug!(error = %e, "Skipping undecodable SSE data line");
            return None;
        }
    };

    if json.get("error").is_some() {
        let message =
            extract_error_message(&json).unwrap_or_else(|| "Upstream reported an error".to_string());
        return Some(SseEvent::Error(message));
    }

    let chunk: StreamChunk = serde_json::from_value(json).ok()?;
    let text: String = chunk
        .choices
        .into_iter()
        .filter_map(|choice| choice.delta.content)
        .collect();

    if text.is_empty() {
        None
    } else {
        Some(SseEvent::Fragment(text))
    }
}

/// Content type of every outward chat stream.
const STREAM_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

fn encode_fragment(format: StreamFormat, text: &str) -> Bytes {
    match format {
        StreamFormat::Text => Bytes::from(text.to_string()),
        StreamFormat::DataStream => Bytes::from(format!("0:{}\n", json_string(text))),
    }
}

fn encode_error(format: StreamFormat, error: &RelayError) -> Option<Bytes> {
    match format {
        StreamFormat::Text => None,
        StreamFormat::DataStream => Some(Bytes::from(format!(
            "3:{}\n",
            json_string(&error.to_string())
        ))),
    }
}

fn encode_finish(format: StreamFormat) -> Option<Bytes> {
    match format {
        StreamFormat::Text => None,
        StreamFormat::DataStream => Some(Bytes::from_static(b"d:{\"finishReason\":\"stop\"}\n")),
    }
}

fn json_string(text: &str) -> String {
    Value::String(text.to_string()).to_string()
}

/// Build the outward streaming response draining `fragments`.
pub fn relay_response(fragments: mpsc::Receiver<RelayItem>, format: StreamFormat) -> Response {
    let stream = async_stream::stream! {
        let mut fragments = fragments;
        while let Some(item) = fragments.recv().await {
            match item {
                Ok(text) => yield Ok::<Bytes, std::io::Error>(encode_fragment(format, &text)),
                Err(error) => {
                    match encode_error(format, &error) {
                        Some(part) => yield Ok(part),
                        // Plain text has no error frame; abort the body so the client sees truncation
                        None => yield Err(std::io::Error::other(error.to_string())),
                    }
                    return;
                }
            }
        }
        if let Some(part) = encode_finish(format) {
            yield Ok(part);
        }
    };

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, STREAM_CONTENT_TYPE)
        .header(header::CACHE_CONTROL, "no-cache");
    if format == StreamFormat::DataStream {
        builder = builder.header("x-vercel-ai-data-stream", "v1");
    }

    builder
        .body(Body::from_stream(stream))
        .unwrap_or_default()
}
