//! SQLite storage implementation for SourcePool.
//!
//! This crate provides all database-related functionality using Diesel ORM with SQLite.
//! It implements the repository traits defined in `sourcepool-core` and contains:
//! - Database connection pooling and management
//! - Diesel migrations
//! - The single-writer actor that runs every mutation in one transaction
//! - Database-specific model types (with Diesel derives)
//!
//! ```text
//! sourcepool-core (domain, SourcePoolRepositoryTrait)
//!                  │
//!                  ▼
//!          storage-sqlite (this crate)
//!                  │
//!                  ▼
//!              SQLite DB
//! ```

pub mod db;
pub mod errors;
pub mod pools;
pub mod schema;

// Re-export database utilities
pub use db::{
    create_pool, get_connection, init, run_migrations, spawn_writer, DbConnection, DbPool,
    WriteHandle,
};

// Re-export storage errors and conversion helpers
pub use errors::{IntoCore, StorageError};

pub use pools::SourcePoolRepository;

// Re-export from sourcepool-core for convenience
pub use sourcepool_core::errors::{DatabaseError, Error, Result};
