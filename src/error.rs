// =============================================================================
// Error taxonomy — network, auth, rate-limit, data and storage failures
// =============================================================================

use serde::Serialize;
use thiserror::Error;

/// Coarse bucket an error falls into; this is what the dashboard shows and
/// what decides the HTTP status at the API boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Auth,
    RateLimit,
    Data,
    Storage,
}

impl ErrorCategory {
    /// Whether failures in this category are pushed to the user.
    pub fn is_user_visible(self) -> bool {
        matches!(self, Self::Network | Self::Auth | Self::RateLimit)
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Auth => "auth",
            Self::RateLimit => "rate_limit",
            Self::Data => "data",
            Self::Storage => "storage",
        };
        f.write_str(s)
    }
}

/// Failure of a call against the market-data API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("API key missing, invalid or expired: {0}")]
    Auth(String),

    #[error("rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("malformed response: {0}")]
    Data(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ApiError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Network(_) | Self::Timeout => ErrorCategory::Network,
            Self::Auth(_) => ErrorCategory::Auth,
            Self::RateLimited(_) => ErrorCategory::RateLimit,
            Self::Data(_) => ErrorCategory::Data,
            Self::Storage(_) => ErrorCategory::Storage,
        }
    }
}

/// Failure of the durable cache backend. Always recovered locally.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage quota exceeded ({needed} bytes needed, {quota} allowed)")]
    QuotaExceeded { needed: u64, quota: u64 },

    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage record could not be (de)serialised: {0}")]
    Serialization(#[from] serde_json::Error),
}
