//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML files.

use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;

use crate::config::validation::ValidationError;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    /// Per-connection admission settings.
    pub connection: ConnectionConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,
}

/// Per-connection admission settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Maximum exchanges in flight on one connection (1 = no pipelining).
    pub max_pipelined_requests: usize,

    /// What to do with new requests once the peer announced a graceful close.
    pub closing_policy: ClosingPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_pipelined_requests: 1,
            closing_policy: ClosingPolicy::Admit,
        }
    }
}

impl ConnectionConfig {
    pub fn with_max_pipelined_requests(mut self, max: usize) -> Self {
        self.max_pipelined_requests = max;
        self
    }

    pub fn with_closing_policy(mut self, policy: ClosingPolicy) -> Self {
        self.closing_policy = policy;
        self
    }

    /// Validated pipelining depth.
    pub fn max_pipelined(&self) -> Result<NonZeroUsize, ValidationError> {
        NonZeroUsize::new(self.max_pipelined_requests).ok_or(ValidationError::ZeroPipelineDepth)
    }
}

/// Admission policy while a connection is Closing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClosingPolicy {
    /// Keep admitting; new exchanges race the close.
    #[default]
    Admit,
    /// Fail new requests with a retryable graceful-close error, no write.
    Reject,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Expose Prometheus metrics.
    pub metrics_enabled: bool,

    /// Metrics listener address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "pipeline_conn=info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.connection.max_pipelined_requests, 1);
        assert_eq!(config.connection.closing_policy, ClosingPolicy::Admit);
        assert_eq!(config.observability.log_format, LogFormat::Pretty);
        assert!(!config.observability.metrics_enabled);
    }

    #[test]
    fn test_partial_toml() {
        let config: PipelineConfig = toml::from_str(
            r#"
            [connection]
            max_pipelined_requests = 8
            closing_policy = "reject"
            "#,
        )
        .unwrap();
        assert_eq!(config.connection.max_pipelined().unwrap().get(), 8);
        assert_eq!(config.connection.closing_policy, ClosingPolicy::Reject);
        assert_eq!(config.observability.metrics_address, "127.0.0.1:9090");
    }

    #[test]
    fn test_zero_depth_rejected() {
        let config = ConnectionConfig::default().with_max_pipelined_requests(0);
        assert_eq!(config.max_pipelined(), Err(ValidationError::ZeroPipelineDepth));
    }
}
