use std::time::Duration;

use darelay_resilience::Retryable;
use thiserror::Error;

/// Errors raised by ingest transports and channels.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Establishing the transport failed.
    #[error("connect to {endpoint}: {reason}")]
    Connect {
        /// Endpoint we tried to reach or bind.
        endpoint: String,
        /// Transport-specific reason.
        reason: String,
    },

    /// An established transport failed while sending or receiving.
    #[error("transport: {0}")]
    Transport(String),

    /// No transport has been established yet.
    #[error("channel not connected")]
    NotConnected,

    /// The channel was closed and cannot be reused.
    #[error("channel closed")]
    Closed,

    /// The transport does not support the requested operation.
    #[error("unsupported on this transport: {0}")]
    Unsupported(&'static str),

    /// An acknowledgement was sent with no request awaiting one.
    #[error("no pending request to acknowledge")]
    NoPendingRequest,
}

impl IngestError {
    pub(crate) fn connect(endpoint: &str, reason: impl ToString) -> Self {
        Self::Connect {
            endpoint: endpoint.to_owned(),
            reason: reason.to_string(),
        }
    }
}

impl Retryable for IngestError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::Transport(_))
    }
}

/// Wrapper result type.
pub type IngestResult<T> = Result<T, IngestError>;

/// Failure of a handler run through [`crate::IngestChannel::process`].
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The handler did not finish in time and was aborted.
    #[error("handler timed out after {0:?}")]
    Timeout(Duration),

    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),

    /// The channel was reset or closed while the handler ran.
    #[error("handler cancelled")]
    Cancelled,

    /// The handler returned an error.
    #[error("handler failed: {0}")]
    Handler(#[from] anyhow::Error),
}
