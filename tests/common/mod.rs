//! Shared utilities for connection integration tests.

#![allow(dead_code)]

use hyper::body::Bytes;
use hyper::header::CONNECTION;
use hyper::{Request, Response};
use std::future::Future;
use std::time::Duration;

use pipeline_conn::config::ClosingPolicy;
use pipeline_conn::transport::memory::{self, MemoryPeer};
use pipeline_conn::{Connection, ConnectionConfig};

/// Upper bound for anything a test awaits.
pub const WAIT: Duration = Duration::from_secs(2);

/// A connection over an in-memory channel, plus the peer driving it.
pub fn connect(max_pipelined: usize) -> (Connection, MemoryPeer) {
    connect_with(ConnectionConfig::default().with_max_pipelined_requests(max_pipelined))
}

pub fn connect_rejecting_while_closing(max_pipelined: usize) -> (Connection, MemoryPeer) {
    connect_with(
        ConnectionConfig::default()
            .with_max_pipelined_requests(max_pipelined)
            .with_closing_policy(ClosingPolicy::Reject),
    )
}

pub fn connect_with(config: ConnectionConfig) -> (Connection, MemoryPeer) {
    let (transport, peer) = memory::pair();
    let connection = Connection::new(transport, config).expect("valid connection config");
    (connection, peer)
}

pub fn get(path: &str) -> Request<Bytes> {
    Request::get(path).body(Bytes::new()).unwrap()
}

pub fn ok() -> Response<()> {
    Response::new(())
}

/// Response head asking for the connection not to be reused.
pub fn close_response() -> Response<()> {
    Response::builder()
        .header(CONNECTION, "close")
        .body(())
        .unwrap()
}

pub fn connection_reset() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset by peer")
}

/// Await with the shared deadline, panicking on timeout.
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(WAIT, future)
        .await
        .expect("timed out waiting for connection")
}

/// Poll `condition` until it holds or the deadline passes.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    within(async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}
