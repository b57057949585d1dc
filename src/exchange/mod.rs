//! Exchange completion tracking.
//!
//! # Data Flow
//! ```text
//! admitted request
//!     → tracked.rs Exchange (Dispatched, holds AdmitTicket)
//!     → response headers  → HeadersReceived
//!     → payload.rs TrackedPayload polled → PayloadDraining
//!     → payload ends      → Completed  ─┐
//!     → payload errors    → Failed     ─┼→ ticket dropped, slot released
//!     → connection closes → Failed     ─┘  (tracked.rs release_on_close)
//! ```
//!
//! # Design Decisions
//! - Phases are a tagged variant with one transition function (state.rs)
//! - The first terminal transition owns the ticket; later ones are no-ops
//! - Abandoned payloads keep their slot until the connection closes

pub mod payload;
pub mod state;
pub mod tracked;

pub use payload::TrackedPayload;
pub use state::{ExchangeId, ExchangeState, Phase};
pub use tracked::{Exchange, ExchangeRegistry};
