//! Exchange phase state machine.
//!
//! # Transitions
//! ```text
//! Dispatched → HeadersReceived → PayloadDraining → Completed
//!     │               │                 │
//!     └───────────────┴─────────────────┴──────→ Failed
//! ```
//! Phases only move forward; a settled exchange never changes again.

use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

use crate::error::ClassifiedError;

/// Sequence id of an exchange, monotonic per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct ExchangeId(u64);

impl ExchangeId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "exchange-{}", self.0)
    }
}

/// Per-connection source of [`ExchangeId`]s.
#[derive(Debug, Default)]
pub struct ExchangeSequence(AtomicU64);

impl ExchangeSequence {
    pub fn next(&self) -> ExchangeId {
        ExchangeId(self.0.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Lifecycle phase of one request/response exchange.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub enum Phase {
    Dispatched = 0,
    HeadersReceived = 1,
    PayloadDraining = 2,
    Completed = 3,
    Failed = 4,
}

impl Phase {
    /// Completed and Failed are terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }

    /// Whether the exchange still holds an admission slot.
    pub fn holds_slot(&self) -> bool {
        !self.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid exchange transition {from:?} → {to:?}")]
pub struct TransitionError {
    pub from: Phase,
    pub to: Phase,
}

/// Value snapshot of an exchange.
#[derive(Debug, Clone)]
pub struct ExchangeState {
    id: ExchangeId,
    phase: Phase,
    error: Option<ClassifiedError>,
}

impl ExchangeState {
    pub fn new(id: ExchangeId) -> Self {
        Self {
            id,
            phase: Phase::Dispatched,
            error: None,
        }
    }

    pub fn id(&self) -> ExchangeId {
        self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Terminal error; only set once the exchange has failed.
    pub fn error(&self) -> Option<&ClassifiedError> {
        self.error.as_ref()
    }

    /// Move to a later, non-failed phase.
    ///
    /// Use [`ExchangeState::fail`] to fail an exchange so the error is
    /// recorded together with the phase.
    pub fn advance(&mut self, to: Phase) -> Result<(), TransitionError> {
        if to == Phase::Failed || self.phase.is_terminal() || to <= self.phase {
            return Err(TransitionError {
                from: self.phase,
                to,
            });
        }
        self.phase = to;
        Ok(())
    }

    pub fn fail(&mut self, error: ClassifiedError) -> Result<(), TransitionError> {
        if self.phase.is_terminal() {
            return Err(TransitionError {
                from: self.phase,
                to: Phase::Failed,
            });
        }
        self.phase = Phase::Failed;
        self.error = Some(error);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::classify::classify;

    fn state() -> ExchangeState {
        ExchangeState::new(ExchangeSequence::default().next())
    }

    #[test]
    fn sequence_is_monotonic() {
        let seq = ExchangeSequence::default();
        let a = seq.next();
        let b = seq.next();
        assert!(b > a);
        assert_eq!(a.as_u64(), 1);
    }

    #[test]
    fn phases_move_forward_only() {
        let mut s = state();
        s.advance(Phase::HeadersReceived).unwrap();
        s.advance(Phase::PayloadDraining).unwrap();
        assert!(s.advance(Phase::HeadersReceived).is_err());
        assert!(s.advance(Phase::PayloadDraining).is_err());
        s.advance(Phase::Completed).unwrap();
        assert!(s.phase().is_terminal());
        assert!(s.error().is_none());
    }

    #[test]
    fn headers_may_skip_straight_to_completed() {
        let mut s = state();
        s.advance(Phase::HeadersReceived).unwrap();
        s.advance(Phase::Completed).unwrap();
        assert_eq!(s.phase(), Phase::Completed);
    }

    #[test]
    fn terminal_phases_are_final() {
        let mut s = state();
        s.fail(classify(false, None)).unwrap();
        assert_eq!(s.phase(), Phase::Failed);
        assert!(s.error().is_some());

        let err = s.advance(Phase::Completed).unwrap_err();
        assert_eq!(err.from, Phase::Failed);
        assert!(s.fail(classify(true, None)).is_err());

        let mut done = state();
        done.advance(Phase::Completed).unwrap();
        assert!(done.fail(classify(false, None)).is_err());
        assert!(done.error().is_none());
    }

    #[test]
    fn advance_rejects_failed() {
        let mut s = state();
        assert!(s.advance(Phase::Failed).is_err());
        assert_eq!(s.phase(), Phase::Dispatched);
    }
}
