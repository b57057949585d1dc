//! In-memory transport with a scriptable peer.
//!
//! `pair()` returns the [`MemoryTransport`] handed to a connection and the
//! [`MemoryPeer`] that plays the remote side: it receives written requests,
//! answers them with headers and streamed payload chunks, and can announce a
//! graceful close, tear the channel down, or reset it.

use futures_util::future::{self, BoxFuture, FutureExt};
use futures_util::stream::{self, StreamExt};
use hyper::body::Bytes;
use hyper::{Request, Response};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::TransportError;
use crate::transport::{wants_close, Payload, RawResponse, Transport};

#[derive(Debug, Clone, Default)]
struct PeerSignal {
    closing: bool,
    closed: bool,
    error: Option<TransportError>,
}

/// Create a connected transport/peer pair.
pub fn pair() -> (MemoryTransport, MemoryPeer) {
    let (requests_tx, requests_rx) = mpsc::unbounded_channel();
    let (signal_tx, signal_rx) = watch::channel(PeerSignal::default());
    let signal_tx = Arc::new(signal_tx);
    let writes = Arc::new(AtomicUsize::new(0));

    let transport = MemoryTransport {
        requests: requests_tx,
        signal: signal_rx,
        writes: Arc::clone(&writes),
    };
    let peer = MemoryPeer {
        requests: requests_rx,
        signal: signal_tx,
        writes,
    };
    (transport, peer)
}

/// Client half of an in-memory channel.
pub struct MemoryTransport {
    requests: mpsc::UnboundedSender<Written>,
    signal: watch::Receiver<PeerSignal>,
    writes: Arc<AtomicUsize>,
}

impl Transport for MemoryTransport {
    fn write(&self, request: Request<Bytes>) -> BoxFuture<'static, Result<RawResponse, TransportError>> {
        self.writes.fetch_add(1, Ordering::SeqCst);

        let torn_down = {
            let signal = self.signal.borrow();
            signal.closed || signal.error.is_some()
        };
        if torn_down {
            return future::ready(Err(TransportError::Closed)).boxed();
        }

        let (respond, response) = oneshot::channel();
        if self.requests.send(Written { request, respond }).is_err() {
            return future::ready(Err(TransportError::Closed)).boxed();
        }
        async move { response.await.unwrap_or(Err(TransportError::Closed)) }.boxed()
    }

    fn on_closing(&self) -> BoxFuture<'static, ()> {
        let mut signal = self.signal.clone();
        async move {
            let seen = signal.wait_for(|s| s.closing).await.is_ok();
            if !seen {
                future::pending::<()>().await;
            }
        }
        .boxed()
    }

    fn on_close(&self) -> BoxFuture<'static, ()> {
        let mut signal = self.signal.clone();
        async move {
            // A vanished peer counts as a torn-down channel.
            let _ = signal.wait_for(|s| s.closed).await;
        }
        .boxed()
    }

    fn transport_error(&self) -> BoxFuture<'static, TransportError> {
        let mut signal = self.signal.clone();
        async move {
            let error = match signal.wait_for(|s| s.error.is_some()).await {
                Ok(s) => s.error.clone(),
                Err(_) => None,
            };
            match error {
                Some(e) => e,
                None => future::pending().await,
            }
        }
        .boxed()
    }
}

/// Remote half of an in-memory channel.
pub struct MemoryPeer {
    requests: mpsc::UnboundedReceiver<Written>,
    signal: Arc<watch::Sender<PeerSignal>>,
    writes: Arc<AtomicUsize>,
}

impl MemoryPeer {
    /// Wait for the next written request.
    pub async fn next_request(&mut self) -> Option<PendingRequest> {
        let written = self.requests.recv().await?;
        Some(self.pending(written))
    }

    /// Take a written request if one is already queued.
    pub fn try_next_request(&mut self) -> Option<PendingRequest> {
        let written = self.requests.try_recv().ok()?;
        Some(self.pending(written))
    }

    fn pending(&self, written: Written) -> PendingRequest {
        PendingRequest {
            request: written.request,
            respond: written.respond,
            signal: Arc::clone(&self.signal),
        }
    }

    /// Number of writes the transport has seen, accepted or not.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Announce a graceful close (fires `on_closing`).
    pub fn signal_closing(&self) {
        self.signal.send_modify(|s| s.closing = true);
    }

    /// Tear the channel down (fires `on_close`).
    pub fn close(&self) {
        self.signal.send_modify(|s| s.closed = true);
    }

    /// Fail the channel abruptly (fires `transport_error`).
    pub fn reset(&self, error: impl Into<TransportError>) {
        let error = error.into();
        self.signal.send_modify(|s| s.error = Some(error));
    }
}

/// A request as it travels from the transport to the peer.
struct Written {
    request: Request<Bytes>,
    respond: oneshot::Sender<Result<RawResponse, TransportError>>,
}

/// A request the peer has received but not yet answered.
pub struct PendingRequest {
    request: Request<Bytes>,
    respond: oneshot::Sender<Result<RawResponse, TransportError>>,
    signal: Arc<watch::Sender<PeerSignal>>,
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("method", self.request.method())
            .field("uri", self.request.uri())
            .finish()
    }
}

impl PendingRequest {
    pub fn request(&self) -> &Request<Bytes> {
        &self.request
    }

    /// Send response headers; the payload is streamed through the returned
    /// sender and ends when it is finished or dropped.
    ///
    /// A head carrying `Connection: close` also fires `on_closing`, the way a
    /// decoder announces the peer's intent as soon as it parses the header.
    pub fn respond(self, head: Response<()>) -> PayloadSender {
        if wants_close(&head) {
            self.signal.send_modify(|s| s.closing = true);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let payload: Payload = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (chunk, rx))
        })
        .boxed();

        let (parts, ()) = head.into_parts();
        let _ = self.respond.send(Ok(Response::from_parts(parts, payload)));
        PayloadSender { tx }
    }

    /// Send a complete response in one go.
    pub fn respond_with(self, head: Response<()>, body: impl Into<Bytes>) {
        let payload = self.respond(head);
        payload.send(body);
        payload.finish();
    }

    /// Fail the write instead of answering it.
    pub fn fail(self, error: impl Into<TransportError>) {
        let _ = self.respond.send(Err(error.into()));
    }
}

/// Producer side of a streamed response payload.
#[derive(Debug)]
pub struct PayloadSender {
    tx: mpsc::UnboundedSender<Result<Bytes, TransportError>>,
}

impl PayloadSender {
    pub fn send(&self, chunk: impl Into<Bytes>) {
        let _ = self.tx.send(Ok(chunk.into()));
    }

    /// Terminate the payload with an error.
    pub fn fail(self, error: impl Into<TransportError>) {
        let _ = self.tx.send(Err(error.into()));
    }

    /// End the payload normally.
    pub fn finish(self) {}
}
