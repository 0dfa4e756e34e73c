//! API layer for the studio proxy server.
//!
//! Each upstream integration is a route module (`openai`, `imgbb`,
//! `stability`) built from the same three stages: [`validation`] of the
//! inbound request, one [`upstream`] call, and normalization of the result
//! into either a success envelope, a [`streaming`] relay or an `AppError`.

pub mod handlers;
pub mod imgbb;
pub mod models;
pub mod openai;
pub mod routes;
pub mod stability;
pub mod streaming;
pub mod upstream;
pub mod validation;

// Re-export commonly used types
pub use handlers::{create_http_client, health, metrics_handler, AppState};
pub use models::{ContentResponse, DescriptionResponse, ImageDataUrlResponse, UrlResponse};
pub use routes::build_router;
pub use streaming::{relay_response, spawn_relay, ChatRelay, RelayOptions, RelayOutcome};
pub use upstream::Provider;
