//! SQLite storage implementation for source pools.

mod model;
mod repository;

pub use model::{PoolMemberDB, RotationHistoryDB, RotationStateDB, SourcePoolDB};
pub use repository::SourcePoolRepository;
