//! Admission subsystem.
//!
//! # Data Flow
//! ```text
//! Connection::request()
//!     → limiter.rs try_admit() (CAS on the in-flight counter)
//!         → Ok(AdmitTicket)  → exchange is dispatched, ticket held by the exchange
//!         → Err(LimitExceeded) → caller fails fast, transport untouched
//!
//! Exchange settles (Completed / Failed)
//!     → ticket dropped → in-flight counter decremented
//! ```
//!
//! # Design Decisions
//! - Admission never suspends and never performs I/O
//! - Check-and-increment is a single compare-and-swap step
//! - A ticket releases its slot exactly once, on drop

pub mod limiter;

pub use limiter::{AdmitTicket, PipelineLimiter};
