//! Connection lifecycle subsystem.
//!
//! # Data Flow
//! ```text
//! Transport notifications:
//!     on_closing()       → tracker.rs mark_closing()   Open → Closing
//!     on_close()         → tracker.rs close(None)      * → Closed
//!     transport_error()  → tracker.rs close(Some(e))   * → Closed
//!
//! close():
//!     → classify.rs (graceful vs abrupt, retryable)
//!     → terminal signal fires once
//!     → every pending exchange fails itself and releases its slot
//! ```
//!
//! # Design Decisions
//! - Classification happens once, at the tracker; exchanges never reclassify
//! - Closed is terminal: late subscribers observe the same error
//! - The tracker never retries; retryability is only reported

pub mod classify;
pub mod id;
pub mod tracker;

pub use id::ConnectionId;
pub use tracker::{ConnectionState, LifecycleTracker, TerminalSignal};
