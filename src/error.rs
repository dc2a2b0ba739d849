//! Failure Taxonomy
//!
//! Every failure in this crate falls into one of four buckets, and each
//! bucket has a defined degraded path instead of being fatal:
//!
//! - [`ClientError::TransportUnavailable`]: the backend's base endpoint is
//!   unreachable at the transport level. The liveness probe latches the
//!   process into permanent fallback on this one.
//! - [`ClientError::SubscriptionDropped`]: a live subscription failed
//!   mid-stream. Sessions retry these forever; callers never see them.
//! - [`ClientError::OperationFailed`]: a single request (list, create,
//!   send, ...) failed. Exactly that call is served from the fallback
//!   source; no global state changes.
//! - [`ClientError::Cancelled`]: the caller asked to stop. A clean
//!   termination marker, not a failure.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClientError>;

/// All failure modes of the streaming/session core.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The backend base endpoint could not be reached at all.
    #[error("backend unreachable at {url}: {reason}")]
    TransportUnavailable {
        /// Base endpoint that was probed.
        url: String,
        /// Transport-level failure description.
        reason: String,
    },

    /// A live subscription ended abnormally and will be retried.
    #[error("subscription dropped: {0}")]
    SubscriptionDropped(String),

    /// A single request failed; the call falls back, nothing else changes.
    #[error("operation failed: {0}")]
    OperationFailed(String),

    /// Cooperative cancellation was signalled by the caller.
    #[error("cancelled")]
    Cancelled,
}

impl ClientError {
    /// Whether this is the clean cancellation marker.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClientError::Cancelled)
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            ClientError::TransportUnavailable {
                url: err
                    .url()
                    .map_or_else(|| "<unknown>".to_string(), ToString::to_string),
                reason: err.to_string(),
            }
        } else {
            ClientError::OperationFailed(err.to_string())
        }
    }
}

#[cfg(feature = "websocket")]
impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::SubscriptionDropped(err.to_string())
    }
}
