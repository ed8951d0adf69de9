//! Core error types for SourcePool.
//!
//! This module defines database-agnostic error types. Storage-specific errors
//! (from Diesel, SQLite, etc.) are converted to these types by the storage layer.
//!
//! Steady-state provider conditions (circuit open, rate limited, offline, an
//! exhausted pool) are not errors: they are absorbed into provider state and
//! surface as "no provider available". Only startup configuration problems and
//! storage failures are reported through [`Error`].

use thiserror::Error;

/// Type alias for Result using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Root error type for the rotation engine.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database operation failed: {0}")]
    Database(#[from] DatabaseError),

    #[error("Invalid configuration: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Failed to load configuration: {0}")]
    ConfigIO(String),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

/// Database-agnostic error type for storage operations.
///
/// This enum uses `String` for all error details, allowing the storage layer
/// to convert storage-specific errors (Diesel, SQLite, etc.) into this format.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to establish a database connection.
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to create or configure the connection pool.
    #[error("Failed to create database pool: {0}")]
    PoolCreationFailed(String),

    /// A database query failed to execute.
    #[error("Database query failed: {0}")]
    QueryFailed(String),

    /// The requested record was not found.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// A unique constraint was violated (e.g., duplicate key).
    #[error("Unique constraint violation: {0}")]
    UniqueViolation(String),

    /// A foreign key constraint was violated.
    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// Database migration failed.
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Internal/unexpected database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

/// Malformed or missing provider/pool definitions.
///
/// These are fatal: a registry or pool is never constructed from an invalid
/// definition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("No providers configured")]
    NoProviders,

    #[error("Pool '{0}' has no members")]
    EmptyPool(String),

    #[error("Duplicate provider id '{0}'")]
    DuplicateProvider(String),

    #[error("Provider '{provider}' field '{field}' is invalid: {message}")]
    InvalidField {
        provider: String,
        field: &'static str,
        message: String,
    },

    #[error("Invalid rate limit '{key}': {message}")]
    InvalidRateLimit { key: String, message: String },

    #[error("Unknown rotation strategy '{0}'")]
    UnknownStrategy(String),

    #[error("Pool '{pool}' references unknown provider '{provider}'")]
    UnknownProvider { pool: String, provider: String },
}

impl ConfigurationError {
    pub(crate) fn invalid_field(
        provider: impl Into<String>,
        field: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidField {
            provider: provider.into(),
            field,
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::ConfigIO(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::ConfigIO(err.to_string())
    }
}

impl From<Error> for String {
    fn from(err: Error) -> Self {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_display() {
        let error = ConfigurationError::invalid_field("coingecko", "base_url", "empty");
        assert_eq!(
            error.to_string(),
            "Provider 'coingecko' field 'base_url' is invalid: empty"
        );

        let error: Error = ConfigurationError::EmptyPool("prices".to_string()).into();
        assert_eq!(
            error.to_string(),
            "Invalid configuration: Pool 'prices' has no members"
        );
    }

    #[test]
    fn test_database_error_wraps() {
        let error: Error = DatabaseError::NotFound("pool".to_string()).into();
        assert!(matches!(error, Error::Database(DatabaseError::NotFound(_))));
    }
}
