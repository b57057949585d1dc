//! Response payload wrapper that holds the admission slot until the payload
//! is really done.

use futures_util::future::FutureExt;
use futures_util::stream::{Stream, StreamExt};
use hyper::body::Bytes;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::error::ClassifiedError;
use crate::exchange::tracked::Exchange;
use crate::lifecycle::{LifecycleTracker, TerminalSignal};
use crate::transport::Payload;

/// Response payload handed to callers.
///
/// The exchange's slot is released when this stream ends, when it yields an
/// error, or when the connection closes under it. Dropping it early does
/// not release anything: the slot stays held until the connection closes.
pub struct TrackedPayload {
    inner: Payload,
    exchange: Arc<Exchange>,
    tracker: Arc<LifecycleTracker>,
    terminal: TerminalSignal,
    done: bool,
}

impl TrackedPayload {
    pub(crate) fn new(
        inner: Payload,
        exchange: Arc<Exchange>,
        tracker: Arc<LifecycleTracker>,
        terminal: TerminalSignal,
    ) -> Self {
        Self {
            inner,
            exchange,
            tracker,
            terminal,
            done: false,
        }
    }

    pub fn exchange(&self) -> &Arc<Exchange> {
        &self.exchange
    }

    /// Drain the whole payload into one buffer.
    pub async fn drain(mut self) -> Result<Bytes, ClassifiedError> {
        let mut body = Vec::new();
        while let Some(chunk) = self.next().await {
            body.extend_from_slice(&chunk?);
        }
        Ok(Bytes::from(body))
    }

    fn finish_with(&mut self, error: ClassifiedError) -> Poll<Option<Result<Bytes, ClassifiedError>>> {
        self.done = true;
        Poll::Ready(Some(Err(self.exchange.fail(error))))
    }
}

impl Stream for TrackedPayload {
    type Item = Result<Bytes, ClassifiedError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        if let Some(error) = this.exchange.failure() {
            return this.finish_with(error);
        }
        this.exchange.draining();

        match this.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(chunk))) => return Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(Some(Err(e))) => {
                // Framing is lost once a payload fails; the channel is done.
                let error = this.tracker.close(Some(e));
                return this.finish_with(error);
            }
            Poll::Ready(None) => {
                this.done = true;
                return match this.exchange.complete() {
                    Ok(()) => Poll::Ready(None),
                    Err(error) => Poll::Ready(Some(Err(error))),
                };
            }
            Poll::Pending => {}
        }

        match this.terminal.poll_unpin(cx) {
            Poll::Ready(error) => this.finish_with(error),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for TrackedPayload {
    fn drop(&mut self) {
        if !self.done && !self.exchange.phase().is_terminal() {
            tracing::trace!(
                exchange_id = %self.exchange.id(),
                "Payload dropped before completion; slot held until the connection closes"
            );
        }
    }
}

impl std::fmt::Debug for TrackedPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedPayload")
            .field("exchange", &self.exchange)
            .field("done", &self.done)
            .finish()
    }
}
