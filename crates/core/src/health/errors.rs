//! Health check error types.
//!
//! These describe why a probe failed. They are recorded into provider stats
//! and never returned to callers of the health checker.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HealthCheckError {
    #[error("timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP {status}")]
    Status { status: u16 },

    #[error("request failed: {0}")]
    Transport(String),
}

impl HealthCheckError {
    /// Short machine-readable error type.
    pub fn kind(&self) -> &'static str {
        match self {
            HealthCheckError::Timeout { .. } => "timeout",
            HealthCheckError::Status { .. } => "status",
            HealthCheckError::Transport(_) => "transport",
        }
    }
}
