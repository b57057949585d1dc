//! Connection lifecycle tracking.
//!
//! # Responsibilities
//! - Track connection state (Open → Closing → Closed)
//! - Classify the teardown exactly once
//! - Publish the classified error to every current and future exchange
//!
//! The terminal error is published through a single-fire shared future.
//! Exchanges subscribe by cloning it; firing it once wakes all of them, and
//! subscribers that arrive after the close see it resolved immediately.

use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};
use tokio::sync::oneshot;

use crate::error::{ClassifiedError, CloseReason, TransportError};
use crate::lifecycle::classify::classify;
use crate::lifecycle::ConnectionId;
use crate::observability::metrics;

/// Single-fire signal resolving to the connection's terminal error.
pub type TerminalSignal = Shared<BoxFuture<'static, ClassifiedError>>;

/// Connection lifecycle state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ConnectionState {
    /// Accepting and serving exchanges.
    Open = 0,
    /// The peer announced a graceful close; in-flight exchanges may finish.
    Closing = 1,
    /// Torn down. Terminal.
    Closed = 2,
}

impl From<u8> for ConnectionState {
    fn from(val: u8) -> Self {
        match val {
            0 => ConnectionState::Open,
            1 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Lifecycle state machine for a single connection.
pub struct LifecycleTracker {
    connection: ConnectionId,
    state: AtomicU8,
    /// Serializes the transition into Closed; taken by the single closer.
    terminal_tx: Mutex<Option<oneshot::Sender<ClassifiedError>>>,
    terminal_error: OnceLock<ClassifiedError>,
    terminal: TerminalSignal,
}

impl LifecycleTracker {
    pub fn new(connection: ConnectionId) -> Self {
        let (tx, rx) = oneshot::channel();
        // A tracker dropped without closing means the connection vanished.
        let terminal = async move { rx.await.unwrap_or_else(|_| classify(false, None)) }
            .boxed()
            .shared();

        Self {
            connection,
            state: AtomicU8::new(ConnectionState::Open as u8),
            terminal_tx: Mutex::new(Some(tx)),
            terminal_error: OnceLock::new(),
            terminal,
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from(self.state.load(Ordering::Acquire))
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// Record the peer's intent to close gracefully.
    ///
    /// Returns `true` if this call moved the connection from Open to Closing.
    pub fn mark_closing(&self) -> bool {
        let moved = self
            .state
            .compare_exchange(
                ConnectionState::Open as u8,
                ConnectionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if moved {
            tracing::info!(connection_id = %self.connection, "Peer signalled graceful close");
        }
        moved
    }

    /// Move to Closed and publish the classified terminal error.
    ///
    /// Classification happens once; later calls return the first result.
    pub fn close(&self, cause: Option<TransportError>) -> ClassifiedError {
        let mut tx = self
            .terminal_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = self.terminal_error.get() {
            return existing.clone();
        }

        let previous = ConnectionState::from(
            self.state
                .swap(ConnectionState::Closed as u8, Ordering::AcqRel),
        );
        let error = classify(previous == ConnectionState::Closing, cause);
        let _ = self.terminal_error.set(error.clone());
        if let Some(tx) = tx.take() {
            let _ = tx.send(error.clone());
        }
        drop(tx);

        match error.reason() {
            CloseReason::GracefulCloseInterrupted => tracing::info!(
                connection_id = %self.connection,
                reason = %error.reason(),
                "Connection closed"
            ),
            CloseReason::AbruptChannelClosed => tracing::warn!(
                connection_id = %self.connection,
                reason = %error.reason(),
                cause = %error.channel_closed(),
                "Connection closed"
            ),
        }
        metrics::record_connection_closed(error.reason());
        error
    }

    /// The terminal error, once the connection has closed.
    pub fn terminal_error(&self) -> Option<ClassifiedError> {
        self.terminal_error.get().cloned()
    }

    /// Subscribe to the terminal signal.
    pub fn terminated(&self) -> TerminalSignal {
        self.terminal.clone()
    }

    /// Feed transport notifications into the state machine until the
    /// channel is torn down. A graceful-close notice that is ready together
    /// with the teardown is applied first.
    pub async fn observe<C, D, E>(&self, on_closing: C, on_close: D, transport_error: E)
    where
        C: Future<Output = ()>,
        D: Future<Output = ()>,
        E: Future<Output = TransportError>,
    {
        tokio::pin!(on_closing, on_close, transport_error);
        let mut closing_seen = false;
        loop {
            tokio::select! {
                biased;
                _ = &mut on_closing, if !closing_seen => {
                    closing_seen = true;
                    self.mark_closing();
                }
                _ = &mut on_close => {
                    self.close(None);
                    return;
                }
                err = &mut transport_error => {
                    self.close(Some(err));
                    return;
                }
            }
        }
    }
}

impl std::fmt::Debug for LifecycleTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleTracker")
            .field("connection", &self.connection)
            .field("state", &self.state())
            .field("terminal_error", &self.terminal_error.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn open_closing_closed() {
        let tracker = LifecycleTracker::new(ConnectionId::next());
        assert_eq!(tracker.state(), ConnectionState::Open);
        assert!(tracker.mark_closing());
        assert!(!tracker.mark_closing());
        assert_eq!(tracker.state(), ConnectionState::Closing);

        let err = tracker.close(None);
        assert_eq!(err.reason(), CloseReason::GracefulCloseInterrupted);
        assert_eq!(tracker.state(), ConnectionState::Closed);
        assert!(!tracker.mark_closing(), "closed is terminal");
    }

    #[test]
    fn close_is_classified_once() {
        let tracker = LifecycleTracker::new(ConnectionId::next());
        let first = tracker.close(Some(TransportError::Protocol("bad chunk".into())));
        assert_eq!(first.reason(), CloseReason::AbruptChannelClosed);

        // A late graceful signal and a second close do not reclassify.
        tracker.mark_closing();
        let second = tracker.close(None);
        assert_eq!(second.reason(), CloseReason::AbruptChannelClosed);
        assert!(second.channel_closed().to_string().contains("bad chunk"));
    }

    #[tokio::test]
    async fn late_subscribers_see_terminal_error() {
        let tracker = LifecycleTracker::new(ConnectionId::next());
        let early = tracker.terminated();
        tracker.close(None);
        let late = tracker.terminated();

        let a = tokio::time::timeout(Duration::from_secs(1), early).await.unwrap();
        let b = tokio::time::timeout(Duration::from_secs(1), late).await.unwrap();
        assert_eq!(a.reason(), b.reason());
        assert_eq!(a.reason(), CloseReason::AbruptChannelClosed);
    }

    #[tokio::test]
    async fn observe_routes_transport_signals() {
        let tracker = LifecycleTracker::new(ConnectionId::next());
        let (closing_tx, closing_rx) = oneshot::channel::<()>();
        let (close_tx, close_rx) = oneshot::channel::<()>();

        closing_tx.send(()).unwrap();
        close_tx.send(()).unwrap();
        tracker
            .observe(
                async move {
                    let _ = closing_rx.await;
                },
                async move {
                    // Let the closing notification land first.
                    tokio::task::yield_now().await;
                    let _ = close_rx.await;
                },
                std::future::pending::<TransportError>(),
            )
            .await;

        let err = tracker.terminal_error().unwrap();
        assert_eq!(err.reason(), CloseReason::GracefulCloseInterrupted);
    }
}
