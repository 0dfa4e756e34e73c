//! Shared constants for error categories used in logs and metrics.

use std::fmt;

pub const ERROR_CATEGORY_CLIENT_INPUT: &str = "client_input";
pub const ERROR_CATEGORY_CONFIGURATION: &str = "configuration";
pub const ERROR_CATEGORY_TRANSPORT: &str = "transport";
pub const ERROR_CATEGORY_UPSTREAM_4XX: &str = "upstream_4xx";
pub const ERROR_CATEGORY_UPSTREAM_5XX: &str = "upstream_5xx";
pub const ERROR_CATEGORY_INVALID_SHAPE: &str = "invalid_shape";
pub const ERROR_CATEGORY_STREAM: &str = "stream";
pub const ERROR_CATEGORY_INTERNAL: &str = "internal";

/// Client-facing message for any transport-level upstream failure.
pub const TRANSPORT_ERROR_MESSAGE: &str = "Failed to reach upstream provider";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategoryCode {
    ClientInput,
    Configuration,
    Transport,
    Upstream4xx,
    Upstream5xx,
    InvalidShape,
    Stream,
    Internal,
}

impl ErrorCategoryCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClientInput => ERROR_CATEGORY_CLIENT_INPUT,
            Self::Configuration => ERROR_CATEGORY_CONFIGURATION,
            Self::Transport => ERROR_CATEGORY_TRANSPORT,
            Self::Upstream4xx => ERROR_CATEGORY_UPSTREAM_4XX,
            Self::Upstream5xx => ERROR_CATEGORY_UPSTREAM_5XX,
            Self::InvalidShape => ERROR_CATEGORY_INVALID_SHAPE,
            Self::Stream => ERROR_CATEGORY_STREAM,
            Self::Internal => ERROR_CATEGORY_INTERNAL,
        }
    }

    /// Category of an upstream rejection with the given HTTP status.
    pub fn for_upstream_status(status: u16) -> Self {
        if status >= 500 {
            Self::Upstream5xx
        } else {
            Self::Upstream4xx
        }
    }
}

impl fmt::Display for ErrorCategoryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
