//! Error taxonomy surfaced by a pipelined connection.
//!
//! Callers only ever see [`ConnectionError`]: either a local admission
//! rejection or a [`ClassifiedError`] produced by the lifecycle tracker.
//! Raw [`TransportError`]s stay reachable through `source()` for diagnostics.

use std::sync::Arc;
use thiserror::Error;

use crate::lifecycle::ConnectionId;

/// Failure reported by the raw transport collaborator.
///
/// Cloneable so a single cause can be broadcast to every pending exchange.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The channel was already torn down.
    #[error("channel closed")]
    Closed,

    /// Socket-level I/O failure (reset, broken pipe, ...).
    #[error("I/O error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    /// The peer violated framing or protocol rules.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(Arc::new(err))
    }
}

/// Why a connection stopped serving exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// The peer announced a graceful close before the channel went away.
    GracefulCloseInterrupted,
    /// The channel went away without any prior in-band signal.
    AbruptChannelClosed,
}

impl CloseReason {
    /// Human-readable reason tag.
    pub fn tag(&self) -> &'static str {
        match self {
            CloseReason::GracefulCloseInterrupted => "graceful peer close, request interrupted",
            CloseReason::AbruptChannelClosed => "abrupt channel close",
        }
    }

    /// Marker prefix carried by the closed-channel cause.
    pub fn marker(&self) -> &'static str {
        match self {
            CloseReason::GracefulCloseInterrupted => "PROTOCOL_CLOSING_INBOUND",
            CloseReason::AbruptChannelClosed => "CHANNEL_CLOSED_INBOUND",
        }
    }

    /// Short label used for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            CloseReason::GracefulCloseInterrupted => "graceful",
            CloseReason::AbruptChannelClosed => "abrupt",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// The closed-channel cause wrapped by every [`ClassifiedError`].
#[derive(Debug, Clone, Error)]
#[error("{}: {detail}", .reason.marker())]
pub struct ChannelClosedError {
    reason: CloseReason,
    detail: String,
    #[source]
    cause: Option<TransportError>,
}

impl ChannelClosedError {
    pub(crate) fn new(reason: CloseReason, cause: Option<TransportError>) -> Self {
        let detail = match (&reason, &cause) {
            (CloseReason::GracefulCloseInterrupted, None) => {
                "channel closed after the peer signalled a graceful close".to_string()
            }
            (CloseReason::GracefulCloseInterrupted, Some(e)) => {
                format!("channel closed after the peer signalled a graceful close ({})", e)
            }
            (CloseReason::AbruptChannelClosed, None) => "channel closed unexpectedly".to_string(),
            (CloseReason::AbruptChannelClosed, Some(e)) => {
                format!("channel closed unexpectedly ({})", e)
            }
        };
        Self { reason, detail, cause }
    }

    pub fn reason(&self) -> CloseReason {
        self.reason
    }

    /// The transport error that tore the channel down, if one was reported.
    pub fn transport_error(&self) -> Option<&TransportError> {
        self.cause.as_ref()
    }
}

/// Uniform, retry-tagged failure delivered to callers.
#[derive(Debug, Clone, Error)]
#[error("connection closed: {reason} (retryable: {retryable})")]
pub struct ClassifiedError {
    reason: CloseReason,
    retryable: bool,
    #[source]
    cause: ChannelClosedError,
}

impl ClassifiedError {
    pub(crate) fn new(reason: CloseReason, retryable: bool, cause: ChannelClosedError) -> Self {
        Self {
            reason,
            retryable,
            cause,
        }
    }

    pub fn reason(&self) -> CloseReason {
        self.reason
    }

    pub fn retryable(&self) -> bool {
        self.retryable
    }

    /// The closed-channel error this classification wraps.
    pub fn channel_closed(&self) -> &ChannelClosedError {
        &self.cause
    }
}

/// Admission rejected: the connection already carries its maximum number of
/// pipelined exchanges.
#[derive(Debug, Clone, Error)]
#[error("max pipelined requests exceeded: {max} already in flight on {connection}")]
pub struct LimitExceeded {
    pub max: usize,
    pub connection: ConnectionId,
}

/// Coarse classification of everything [`ConnectionError`] can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    LimitExceeded,
    GracefulCloseInterrupted,
    AbruptChannelClosed,
}

/// The only error type returned by [`crate::Connection::request`].
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    /// Local admission rejection; no I/O was performed.
    #[error(transparent)]
    LimitExceeded(#[from] LimitExceeded),

    /// The connection closed (or is closing) underneath the exchange.
    #[error(transparent)]
    Closed(#[from] ClassifiedError),
}

impl ConnectionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConnectionError::LimitExceeded(_) => ErrorKind::LimitExceeded,
            ConnectionError::Closed(e) => match e.reason() {
                CloseReason::GracefulCloseInterrupted => ErrorKind::GracefulCloseInterrupted,
                CloseReason::AbruptChannelClosed => ErrorKind::AbruptChannelClosed,
            },
        }
    }

    /// Whether the request may be retried on another connection.
    ///
    /// Admission rejections are not retryable on this connection.
    pub fn is_retryable(&self) -> bool {
        match self {
            ConnectionError::LimitExceeded(_) => false,
            ConnectionError::Closed(e) => e.retryable(),
        }
    }

    pub fn as_classified(&self) -> Option<&ClassifiedError> {
        match self {
            ConnectionError::Closed(e) => Some(e),
            ConnectionError::LimitExceeded(_) => None,
        }
    }
}

/// Result type for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_channel_closed_markers() {
        let graceful = ChannelClosedError::new(CloseReason::GracefulCloseInterrupted, None);
        assert!(graceful.to_string().starts_with("PROTOCOL_CLOSING_INBOUND"));

        let abrupt = ChannelClosedError::new(CloseReason::AbruptChannelClosed, None);
        assert!(abrupt.to_string().starts_with("CHANNEL_CLOSED_INBOUND"));
    }

    #[test]
    fn test_cause_chain_preserves_transport_text() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let cause = ChannelClosedError::new(CloseReason::AbruptChannelClosed, Some(io.into()));
        let err = ClassifiedError::new(CloseReason::AbruptChannelClosed, true, cause);

        let closed = err.source().expect("classified error has a cause");
        assert!(closed.to_string().contains("reset by peer"));
        let transport = closed.source().expect("closed-channel error has a cause");
        assert!(transport.to_string().contains("reset by peer"));
    }

    #[test]
    fn test_error_kind_and_retryable() {
        let limit = ConnectionError::from(LimitExceeded {
            max: 2,
            connection: ConnectionId::next(),
        });
        assert_eq!(limit.kind(), ErrorKind::LimitExceeded);
        assert!(!limit.is_retryable());
        assert!(limit.to_string().contains("2 already in flight"));

        let cause = ChannelClosedError::new(CloseReason::GracefulCloseInterrupted, None);
        let closed = ConnectionError::from(ClassifiedError::new(
            CloseReason::GracefulCloseInterrupted,
            true,
            cause,
        ));
        assert_eq!(closed.kind(), ErrorKind::GracefulCloseInterrupted);
        assert!(closed.is_retryable());
    }
}
