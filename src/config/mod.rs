//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → PipelineConfig (validated, immutable)
//!     → ConnectionConfig handed to each Connection at construction
//! ```
//!
//! # Design Decisions
//! - Pipelining depth is fixed for a connection's lifetime; no hot reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::{ClosingPolicy, ConnectionConfig, LogFormat, ObservabilityConfig, PipelineConfig};
pub use validation::ValidationError;
