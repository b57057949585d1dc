//! Raw transport collaborator.
//!
//! The connection layer never touches sockets or codecs. It talks to a
//! [`Transport`] that already frames requests and responses, and that
//! reports graceful-close intent, teardown and I/O failure as one-shot
//! notifications.

pub mod memory;

use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use hyper::body::Bytes;
use hyper::header::CONNECTION;
use hyper::{Request, Response};

use crate::error::TransportError;

/// Lazily produced response payload chunks.
pub type Payload = BoxStream<'static, Result<Bytes, TransportError>>;

/// Response headers plus the raw payload handle.
pub type RawResponse = Response<Payload>;

/// A single physical, pipelined request/response channel.
///
/// Responses are delivered in request order; the connection layer relies on
/// that but does not enforce it.
pub trait Transport: Send + Sync + 'static {
    /// Write a request. The returned future resolves once response headers
    /// are available.
    ///
    /// Implementations must put the request on the wire when this method is
    /// called, not when the future is first polled.
    fn write(&self, request: Request<Bytes>) -> BoxFuture<'static, Result<RawResponse, TransportError>>;

    /// Resolves once, when the peer signals intent to close gracefully.
    fn on_closing(&self) -> BoxFuture<'static, ()>;

    /// Resolves once, when the channel is fully torn down.
    fn on_close(&self) -> BoxFuture<'static, ()>;

    /// Resolves once, on abrupt I/O failure.
    fn transport_error(&self) -> BoxFuture<'static, TransportError>;
}

/// Whether a response asks for the connection not to be reused.
pub fn wants_close<B>(response: &Response<B>) -> bool {
    response
        .headers()
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("close"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_connection_close_directive() {
        let close = Response::builder()
            .header(CONNECTION, "keep-alive, Close")
            .body(())
            .unwrap();
        assert!(wants_close(&close));

        let keep = Response::builder()
            .header(CONNECTION, "keep-alive")
            .body(())
            .unwrap();
        assert!(!wants_close(&keep));
        assert!(!wants_close(&Response::new(())));
    }
}
