//! Studio Proxy Server - backend for a sketch-to-image studio
//!
//! This library proxies browser requests to three upstream services and
//! reshapes their answers:
//!
//! - **OpenAI**: streaming chat (sketch analysis and prompt refinement),
//!   buffered completion, and image description via the vision API
//! - **Stability AI**: text-to-image and image-to-image generation, returned
//!   as a base64 data URL
//! - **ImgBB**: image hosting, returned as a public URL
//!
//! Credentials stay on the server; the browser never sees them.
//!
//! # Architecture
//!
//! - [`core`]: config, errors, logging, metrics, middleware
//! - [`api`]: validation, the upstream invoker, the streaming relay and the
//!   per-provider routes
//!
//! # Configuration
//!
//! Provider keys (each optional; a missing key fails only that provider's routes):
//! - `OPENAI_API_KEY`
//! - `STABILITY_KEY`
//! - `IMGBB_API_KEY`
//!
//! Optional environment variables:
//! - `HOST`: Server bind address (default: 0.0.0.0)
//! - `PORT`: Server port (default: 3000)
//! - `VERIFY_SSL`: Verify SSL certificates for upstream (default: true)
//! - `REQUEST_TIMEOUT_SECS`: Total timeout of buffered upstream calls (default: 60)
//! - `STREAM_IDLE_TIMEOUT_SECS`: Max gap between streamed chunks (default: 60)
//! - `CONFIG_PATH`: YAML config file to load instead of the environment alone

pub mod api;
pub mod core;

// Re-export commonly used types for convenience
pub use api::{build_router, AppState};
pub use crate::core::{AppConfig, AppError, Result};
