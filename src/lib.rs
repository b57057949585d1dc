//! Admission and lifecycle layer for a single pipelined connection.
//!
//! A [`Connection`] bounds how many request/response exchanges may be in
//! flight on one transport, holds each slot until the response payload is
//! fully drained, and turns transport teardown into a retry-tagged
//! [`ClassifiedError`] delivered to every waiting exchange.

pub mod admission;
pub mod config;
pub mod error;
pub mod exchange;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod transport;

pub use config::{ConnectionConfig, PipelineConfig};
pub use error::{ClassifiedError, CloseReason, ConnectionError, ErrorKind, TransportError};
pub use exchange::TrackedPayload;
pub use lifecycle::ConnectionState;
pub use net::{Connection, ConnectionId};
pub use transport::Transport;
