//! Close-reason classification.
//!
//! Turns "the channel went away" into a [`ClassifiedError`]. The only input
//! besides the raw cause is whether the peer announced a graceful close
//! before teardown.

use crate::error::{ChannelClosedError, ClassifiedError, CloseReason, TransportError};

/// Classify a channel teardown.
///
/// Both outcomes are retryable.
pub fn classify(closing_observed: bool, cause: Option<TransportError>) -> ClassifiedError {
    let reason = if closing_observed {
        CloseReason::GracefulCloseInterrupted
    } else {
        CloseReason::AbruptChannelClosed
    };
    ClassifiedError::new(reason, true, ChannelClosedError::new(reason, cause))
}
