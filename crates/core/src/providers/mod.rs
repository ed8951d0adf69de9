//! Provider module.
//!
//! This module models a single upstream API and its health:
//! - Per-window request ceilings ([`RateLimitTracker`])
//! - Consecutive-failure circuit breaking ([`CircuitBreaker`])
//! - Runtime stats and the composite availability check ([`Provider`])
//! - Shared handles and the startup registry ([`ProviderRegistry`])

mod circuit_breaker;
mod definition;
mod model;
mod rate_limit;
mod registry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, FailureOutcome,
    DEFAULT_COOLDOWN_SECS, DEFAULT_FAILURE_THRESHOLD, MAX_COOLDOWN_SECS,
};
pub use definition::ProviderDefinition;
pub use model::{
    Provider, ProviderAuth, ProviderSnapshot, ProviderStats, ProviderStatus, Unavailability,
    DEFAULT_TIMEOUT_MS,
};
pub use rate_limit::{
    RateLimitConfig, RateLimitSnapshot, RateLimitTracker, WindowUsage, MAX_WINDOW_DAYS,
};
pub use registry::{ProviderHandle, ProviderRegistry};
