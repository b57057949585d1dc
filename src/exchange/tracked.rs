//! Tracked exchange: phase state plus the admission slot it holds.
//!
//! Whoever moves the exchange into a terminal phase first (the draining
//! caller, the response future, or the close watcher) takes the ticket and
//! releases the slot. Everyone else observes the settled phase.

use dashmap::DashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

use crate::admission::AdmitTicket;
use crate::error::ClassifiedError;
use crate::exchange::state::{ExchangeId, ExchangeState, Phase};
use crate::lifecycle::TerminalSignal;
use crate::observability::metrics;

/// Exchanges currently holding a slot on a connection.
pub type ExchangeRegistry = DashMap<ExchangeId, Arc<Exchange>>;

struct Slot {
    state: ExchangeState,
    ticket: Option<AdmitTicket>,
}

/// One in-flight request/response exchange.
pub struct Exchange {
    id: ExchangeId,
    slot: Mutex<Slot>,
    settled: Notify,
}

impl Exchange {
    pub fn new(id: ExchangeId, ticket: AdmitTicket) -> Arc<Self> {
        Arc::new(Self {
            id,
            slot: Mutex::new(Slot {
                state: ExchangeState::new(id),
                ticket: Some(ticket),
            }),
            settled: Notify::new(),
        })
    }

    pub fn id(&self) -> ExchangeId {
        self.id
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> ExchangeState {
        self.lock().state.clone()
    }

    pub fn phase(&self) -> Phase {
        self.lock().state.phase()
    }

    /// The terminal error, if the exchange has failed.
    pub fn failure(&self) -> Option<ClassifiedError> {
        self.lock().state.error().cloned()
    }

    /// Response headers arrived.
    ///
    /// Fails with the terminal error if the exchange was already failed.
    pub fn headers_received(&self) -> Result<(), ClassifiedError> {
        self.advance(Phase::HeadersReceived)
    }

    /// The caller started consuming the payload.
    pub fn draining(&self) {
        let mut slot = self.lock();
        if slot.state.phase() == Phase::HeadersReceived {
            let _ = slot.state.advance(Phase::PayloadDraining);
        }
    }

    /// The payload was drained to its end.
    pub fn complete(&self) -> Result<(), ClassifiedError> {
        self.advance(Phase::Completed)
    }

    /// Fail the exchange, returning the error the caller should see.
    ///
    /// An exchange that already failed keeps its first error.
    pub fn fail(&self, error: ClassifiedError) -> ClassifiedError {
        let mut slot = self.lock();
        if let Some(existing) = slot.state.error() {
            return existing.clone();
        }
        match slot.state.fail(error.clone()) {
            Ok(()) => self.settle(slot),
            Err(e) => {
                tracing::trace!(exchange_id = %self.id, error = %e, "Late failure ignored");
            }
        }
        error
    }

    fn advance(&self, to: Phase) -> Result<(), ClassifiedError> {
        let mut slot = self.lock();
        if let Some(err) = slot.state.error() {
            return Err(err.clone());
        }
        if let Err(e) = slot.state.advance(to) {
            debug_assert!(false, "{} on {}", e, self.id);
            return Ok(());
        }
        if to.is_terminal() {
            self.settle(slot);
        }
        Ok(())
    }

    /// Release the slot. Called exactly once, on the terminal transition.
    fn settle(&self, mut slot: MutexGuard<'_, Slot>) {
        let phase = slot.state.phase();
        let ticket = slot.ticket.take();
        drop(slot);
        drop(ticket);

        let outcome = match phase {
            Phase::Completed => "completed",
            _ => "failed",
        };
        tracing::debug!(exchange_id = %self.id, outcome, "Exchange settled");
        metrics::record_exchange(outcome);
        self.settled.notify_one();
    }

    /// Resolves once the exchange reaches a terminal phase.
    pub async fn settled(&self) {
        if self.phase().is_terminal() {
            return;
        }
        self.settled.notified().await;
    }
}

impl std::fmt::Debug for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exchange")
            .field("id", &self.id)
            .field("phase", &self.phase())
            .finish()
    }
}

/// Force-fail the exchange if the connection closes before it settles,
/// then drop it from the registry.
///
/// This is what releases slots of responses nobody drains.
pub async fn release_on_close(
    exchange: Arc<Exchange>,
    terminal: TerminalSignal,
    registry: Arc<ExchangeRegistry>,
) {
    tokio::select! {
        biased;
        _ = exchange.settled() => {}
        error = terminal => {
            exchange.fail(error);
        }
    }
    registry.remove(&exchange.id());
}
