//! Pipelining depth limiter.
//!
//! # Responsibilities
//! - Bound the number of in-flight exchanges on one connection
//! - Reject excess requests synchronously with [`LimitExceeded`]
//! - Hand out tickets that give the slot back exactly once

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::error::LimitExceeded;
use crate::lifecycle::ConnectionId;
use crate::observability::metrics;

/// Fixed-capacity admission gate for pipelined exchanges.
#[derive(Debug)]
pub struct PipelineLimiter {
    connection: ConnectionId,
    max: NonZeroUsize,
    in_flight: AtomicUsize,
    /// Woken whenever the in-flight count drops to zero.
    idle: Notify,
}

impl PipelineLimiter {
    pub fn new(connection: ConnectionId, max: NonZeroUsize) -> Self {
        Self {
            connection,
            max,
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
        }
    }

    /// Try to take a slot.
    ///
    /// The capacity check and the increment happen in one compare-and-swap,
    /// so concurrent callers can never push the count past `max`.
    pub fn try_admit(self: &Arc<Self>) -> Result<AdmitTicket, LimitExceeded> {
        let max = self.max.get();
        let mut current = self.in_flight.load(Ordering::Acquire);
        loop {
            if current >= max {
                tracing::debug!(
                    connection_id = %self.connection,
                    in_flight = current,
                    max,
                    "Pipelined request rejected"
                );
                metrics::record_rejected("limit_exceeded");
                return Err(LimitExceeded {
                    max,
                    connection: self.connection,
                });
            }
            match self.in_flight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        metrics::record_admitted();
        metrics::record_slot_taken();
        Ok(AdmitTicket {
            limiter: Arc::clone(self),
        })
    }

    /// Give a slot back. Equivalent to dropping the ticket.
    pub fn release(&self, ticket: AdmitTicket) {
        debug_assert!(
            std::ptr::eq(self, Arc::as_ptr(&ticket.limiter)),
            "ticket released on a limiter that did not issue it"
        );
        drop(ticket);
    }

    fn release_slot(&self) {
        let previous = self.in_flight.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "pipeline slot released more often than admitted");
        let now = previous.saturating_sub(1);
        metrics::record_slot_released();
        if now == 0 {
            self.idle.notify_waiters();
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn max(&self) -> NonZeroUsize {
        self.max
    }

    /// Wait until no exchange holds a slot.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Proof of admission for one exchange.
///
/// The slot is released when the ticket is dropped, so it can only ever be
/// released once.
#[must_use = "dropping the ticket releases the pipeline slot immediately"]
#[derive(Debug)]
pub struct AdmitTicket {
    limiter: Arc<PipelineLimiter>,
}

impl Drop for AdmitTicket {
    fn drop(&mut self) {
        self.limiter.release_slot();
        tracing::trace!(
            connection_id = %self.limiter.connection,
            in_flight = self.limiter.in_flight(),
            "Pipeline slot released"
        );
    }
}
