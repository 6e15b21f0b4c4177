//! Error types for outbound fetches.
//!
//! The split matters operationally: transient failures (rate limit, server
//! errors, network faults) are retried with backoff, everything else fails
//! the call immediately.

use thiserror::Error;

/// Errors that can occur when fetching from an external source.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Upstream asked us to slow down (HTTP 429).
    #[error("rate limited by upstream")]
    RateLimited,

    /// Server-side failure (HTTP 5xx).
    #[error("server error: HTTP {status}")]
    Server {
        /// HTTP status code.
        status: u16,
    },

    /// Client-side failure (other 4xx), not retryable.
    #[error("client error: HTTP {status}: {message}")]
    Client {
        /// HTTP status code.
        status: u16,
        /// Response body, if any.
        message: String,
    },

    /// Network error.
    #[error("network error: {0}")]
    Network(String),

    /// Request timeout.
    #[error("request timeout: {0}")]
    Timeout(String),

    /// Response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Retry ceiling reached; carries the last transient error.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The final error observed.
        #[source]
        last: Box<FetchError>,
    },
}

impl FetchError {
    /// Returns true if the request should be retried with backoff.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Server { .. } | Self::Network(_) | Self::Timeout(_)
        )
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::Network(format!("connection failed: {err}"))
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Result type alias for fetch operations.
pub type Result<T> = std::result::Result<T, FetchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_is_transient() {
        assert!(FetchError::RateLimited.is_transient());
    }

    #[test]
    fn test_server_error_is_transient() {
        assert!(FetchError::Server { status: 503 }.is_transient());
    }

    #[test]
    fn test_network_and_timeout_are_transient() {
        assert!(FetchError::Network("connection refused".to_string()).is_transient());
        assert!(FetchError::Timeout("deadline exceeded".to_string()).is_transient());
    }

    #[test]
    fn test_client_error_is_fatal() {
        let err = FetchError::Client {
            status: 401,
            message: "bad key".to_string(),
        };
        assert!(!err.is_transient());
        assert!(err.to_string().contains("401"));
    }

    #[test]
    fn test_exhausted_keeps_last_error() {
        let err = FetchError::Exhausted {
            attempts: 4,
            last: Box::new(FetchError::Server { status: 502 }),
        };
        assert!(!err.is_transient());
        assert!(err.to_string().contains("4 attempts"));
        assert!(err.to_string().contains("502"));
    }
}
