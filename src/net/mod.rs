//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! caller
//!     → connection.rs request()
//!         → admission (try_admit, synchronous)
//!         → transport write
//!         → response with TrackedPayload
//!
//! transport notifications
//!     → connection.rs monitor task
//!     → lifecycle tracker (Open → Closing → Closed)
//!
//! Connection States:
//!     Open → Closing → Closed
//! ```
//!
//! # Design Decisions
//! - Bounded in-flight exchanges per connection, no queueing
//! - The facade is the only caller of the transport write path
//! - Closed connections fail fast without touching the transport

pub mod connection;

pub use connection::{Connection, ConnectionStats, ResponseFuture};
pub use crate::lifecycle::ConnectionId;
