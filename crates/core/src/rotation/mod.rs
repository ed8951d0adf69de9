//! Rotation strategies and the in-process provider pool.

mod pool;
mod selector;
mod strategy;

pub use pool::ProviderPool;
pub use selector::{select, Candidate, Selection};
pub use strategy::RotationStrategy;
