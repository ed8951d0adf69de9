//! SourcePool Core - provider rotation, circuit breaking, health checks and
//! failover.
//!
//! This crate is database-agnostic. Persisted pools are reached through
//! [`pools::SourcePoolRepositoryTrait`], which is implemented by the
//! `storage-sqlite` crate.

pub mod config;
pub mod errors;
pub mod health;
pub mod pools;
pub mod providers;
pub mod rate_limiter;
pub mod rotation;

pub use config::SourcesConfig;
pub use rate_limiter::RateLimiter;

// Re-export error types
pub use errors::Error;
pub use errors::Result;
