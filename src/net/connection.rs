//! Connection facade.
//!
//! # Responsibilities
//! - Gate requests through the pipelining limiter
//! - Forward admitted requests to the transport and wrap their payloads
//! - Feed transport close/error notifications into the lifecycle tracker
//!
//! Must be constructed and used from within a Tokio runtime: it spawns a
//! task watching the transport and, per exchange, a dispatch task and a close
//! watcher.

use futures_util::future::{self, BoxFuture, FutureExt};
use hyper::body::Bytes;
use hyper::{Request, Response};
use serde::Serialize;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::admission::PipelineLimiter;
use crate::config::{ClosingPolicy, ConnectionConfig, ValidationError};
use crate::error::{ClassifiedError, ConnectionError, ConnectionResult, TransportError};
use crate::exchange::tracked::release_on_close;
use crate::exchange::state::ExchangeSequence;
use crate::exchange::{Exchange, ExchangeId, ExchangeRegistry, ExchangeState, Phase, TrackedPayload};
use crate::lifecycle::classify::classify;
use crate::lifecycle::{ConnectionId, ConnectionState, LifecycleTracker, TerminalSignal};
use crate::observability::metrics;
use crate::transport::{wants_close, RawResponse, Transport};

/// Eventual outcome of [`Connection::request`].
pub type ResponseFuture = BoxFuture<'static, ConnectionResult<Response<TrackedPayload>>>;

/// Point-in-time view of a connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub connection_id: u64,
    pub state: ConnectionState,
    pub in_flight: usize,
    pub max_pipelined_requests: usize,
    pub pending: Vec<PendingExchange>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingExchange {
    pub id: ExchangeId,
    pub phase: Phase,
}

/// A single pipelined connection with bounded in-flight exchanges.
pub struct Connection {
    id: ConnectionId,
    closing_policy: ClosingPolicy,
    transport: Arc<dyn Transport>,
    limiter: Arc<PipelineLimiter>,
    tracker: Arc<LifecycleTracker>,
    exchanges: Arc<ExchangeRegistry>,
    sequence: ExchangeSequence,
    monitor: JoinHandle<()>,
}

impl Connection {
    /// Wrap a transport. Fails if the configured pipelining depth is zero.
    pub fn new<T: Transport>(transport: T, config: ConnectionConfig) -> Result<Self, ValidationError> {
        let max = config.max_pipelined()?;
        let id = ConnectionId::next();
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let tracker = Arc::new(LifecycleTracker::new(id));

        let monitor = {
            let tracker = Arc::clone(&tracker);
            let on_closing = transport.on_closing();
            let on_close = transport.on_close();
            let transport_error = transport.transport_error();
            tokio::spawn(async move {
                tracker.observe(on_closing, on_close, transport_error).await;
            })
        };

        tracing::debug!(
            connection_id = %id,
            max_pipelined_requests = max.get(),
            closing_policy = ?config.closing_policy,
            "Connection opened"
        );

        Ok(Self {
            id,
            closing_policy: config.closing_policy,
            transport,
            limiter: Arc::new(PipelineLimiter::new(id, max)),
            tracker,
            exchanges: Arc::new(ExchangeRegistry::new()),
            sequence: ExchangeSequence::default(),
            monitor,
        })
    }

    /// Issue a request.
    ///
    /// Admission is decided synchronously, before this returns: a rejected
    /// request never reaches the transport, and an admitted one has already
    /// been written. The response payload must be drained (or the connection
    /// must close) before the slot is released.
    pub fn request(&self, request: Request<Bytes>) -> ResponseFuture {
        if self.tracker.is_closed() {
            metrics::record_rejected("closed");
            tracing::debug!(connection_id = %self.id, "Request on closed connection");
            let terminal = self.tracker.terminated();
            return async move { Err(ConnectionError::Closed(terminal.await)) }.boxed();
        }

        if self.closing_policy == ClosingPolicy::Reject
            && self.tracker.state() == ConnectionState::Closing
        {
            metrics::record_rejected("closing");
            tracing::debug!(connection_id = %self.id, "Request rejected while closing");
            return future::ready(Err(ConnectionError::Closed(classify(true, None)))).boxed();
        }

        let ticket = match self.limiter.try_admit() {
            Ok(ticket) => ticket,
            Err(e) => {
                tracing::warn!(connection_id = %self.id, max = e.max, "Pipelining limit reached");
                return future::ready(Err(ConnectionError::LimitExceeded(e))).boxed();
            }
        };
        let exchange = Exchange::new(self.sequence.next(), ticket);
        let terminal = self.tracker.terminated();
        self.exchanges.insert(exchange.id(), Arc::clone(&exchange));
        tokio::spawn(release_on_close(
            Arc::clone(&exchange),
            terminal.clone(),
            Arc::clone(&self.exchanges),
        ));

        // Closed between the first check and admission: the close watcher
        // gives the slot back and the transport is never touched.
        if self.tracker.is_closed() {
            return async move { Err(ConnectionError::Closed(exchange.fail(terminal.await))) }.boxed();
        }

        tracing::debug!(
            connection_id = %self.id,
            exchange_id = %exchange.id(),
            method = %request.method(),
            uri = %request.uri(),
            in_flight = self.limiter.in_flight(),
            "Request dispatched"
        );
        let write = self.transport.write(request);
        let (respond, response) = oneshot::channel();
        tokio::spawn(Self::dispatch(
            write,
            Arc::clone(&exchange),
            Arc::clone(&self.tracker),
            terminal.clone(),
            respond,
        ));

        async move {
            match response.await {
                Ok(result) => result,
                // Dispatch task gone with the runtime; fall back to the close.
                Err(_) => Err(ConnectionError::Closed(exchange.fail(terminal.await))),
            }
        }
        .boxed()
    }

    /// Resolve one write on its own task, so response headers (and any
    /// `Connection: close` they carry) are processed as soon as they arrive
    /// rather than when the caller gets around to polling.
    async fn dispatch(
        write: BoxFuture<'static, Result<RawResponse, TransportError>>,
        exchange: Arc<Exchange>,
        tracker: Arc<LifecycleTracker>,
        terminal: TerminalSignal,
        respond: oneshot::Sender<ConnectionResult<Response<TrackedPayload>>>,
    ) {
        let result = tokio::select! {
            biased;
            result = write => match result {
                Ok(response) => Self::accept_response(response, exchange, tracker, terminal),
                Err(e) => {
                    let error = tracker.close(Some(e));
                    Err(ConnectionError::Closed(exchange.fail(error)))
                }
            },
            error = terminal.clone() => Err(ConnectionError::Closed(exchange.fail(error))),
        };
        // A caller that dropped its future leaves the payload undrained; the
        // slot then comes back when the connection closes.
        let _ = respond.send(result);
    }

    fn accept_response(
        response: RawResponse,
        exchange: Arc<Exchange>,
        tracker: Arc<LifecycleTracker>,
        terminal: TerminalSignal,
    ) -> ConnectionResult<Response<TrackedPayload>> {
        if let Err(error) = exchange.headers_received() {
            return Err(ConnectionError::Closed(error));
        }
        if wants_close(&response) && tracker.mark_closing() {
            tracing::debug!(exchange_id = %exchange.id(), "Response carried Connection: close");
        }
        tracing::debug!(
            exchange_id = %exchange.id(),
            status = %response.status(),
            "Response headers received"
        );

        let (parts, payload) = response.into_parts();
        Ok(Response::from_parts(
            parts,
            TrackedPayload::new(payload, exchange, tracker, terminal),
        ))
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.tracker.state()
    }

    pub fn in_flight(&self) -> usize {
        self.limiter.in_flight()
    }

    pub fn max_pipelined(&self) -> NonZeroUsize {
        self.limiter.max()
    }

    /// Resolves with the terminal error once the connection is Closed.
    pub fn closed(&self) -> impl Future<Output = ClassifiedError> + Send + 'static {
        self.tracker.terminated()
    }

    /// Resolves once no exchange holds a slot.
    pub async fn wait_idle(&self) {
        self.limiter.wait_idle().await
    }

    /// Snapshots of exchanges still holding a slot, oldest first.
    pub fn pending_exchanges(&self) -> Vec<ExchangeState> {
        let mut pending: Vec<ExchangeState> = self
            .exchanges
            .iter()
            .map(|entry| entry.value().snapshot())
            .filter(|state| state.phase().holds_slot())
            .collect();
        pending.sort_by_key(|state| state.id());
        pending
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            connection_id: self.id.as_u64(),
            state: self.state(),
            in_flight: self.in_flight(),
            max_pipelined_requests: self.max_pipelined().get(),
            pending: self
                .pending_exchanges()
                .into_iter()
                .map(|state| PendingExchange {
                    id: state.id(),
                    phase: state.phase(),
                })
                .collect(),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // The transport goes away with the facade; pending exchanges fail.
        self.tracker.close(None);
        self.monitor.abort();
        tracing::trace!(connection_id = %self.id, in_flight = self.in_flight(), "Connection dropped");
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("in_flight", &self.in_flight())
            .field("max_pipelined", &self.max_pipelined())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory;

    #[tokio::test]
    async fn zero_depth_is_rejected() {
        let (transport, _peer) = memory::pair();
        let err = Connection::new(transport, ConnectionConfig::default().with_max_pipelined_requests(0))
            .unwrap_err();
        assert_eq!(err, ValidationError::ZeroPipelineDepth);
    }

    #[tokio::test]
    async fn dropping_the_connection_closes_it() {
        let (transport, _peer) = memory::pair();
        let conn = Connection::new(transport, ConnectionConfig::default()).unwrap();
        let closed = conn.closed();
        drop(conn);

        let error = tokio::time::timeout(std::time::Duration::from_secs(1), closed)
            .await
            .unwrap();
        assert_eq!(error.reason(), crate::error::CloseReason::AbruptChannelClosed);
    }
}
