use async_trait::async_trait;

use crate::errors::Result;
use crate::pools::pools_model::{
    MemberOutcome, NewPoolMember, NewSourcePool, PoolMember, PoolSnapshot, RotationChanges,
    RotationHistory, RotationPlan, RotationState, SourcePool,
};

/// Decides a rotation from the snapshot read inside the write transaction.
pub type SelectionFn = Box<dyn FnOnce(&PoolSnapshot) -> RotationPlan + Send + 'static>;

/// Trait for source pool repository operations
#[async_trait]
pub trait SourcePoolRepositoryTrait: Send + Sync {
    fn list_pools(&self) -> Result<Vec<SourcePool>>;
    fn get_pool(&self, pool_id: &str) -> Result<Option<SourcePool>>;
    fn list_members(&self, pool_id: &str) -> Result<Vec<PoolMember>>;
    fn get_rotation_state(&self, pool_id: &str) -> Result<Option<RotationState>>;
    fn recent_history(&self, pool_id: &str, limit: i64) -> Result<Vec<RotationHistory>>;

    async fn create_pool(&self, new_pool: NewSourcePool) -> Result<SourcePool>;
    /// Creates a pool together with its initial members in one write
    /// transaction. Each member's `pool_id` is replaced by the new pool's id.
    /// Nothing is persisted if any member is rejected.
    async fn create_pool_with_members(
        &self,
        new_pool: NewSourcePool,
        members: Vec<NewPoolMember>,
    ) -> Result<SourcePool>;
    /// Inserts a member or updates its priority, weight and enabled flag.
    async fn upsert_member(&self, member: NewPoolMember) -> Result<PoolMember>;
    async fn remove_member(&self, pool_id: String, provider_id: String) -> Result<usize>;
    async fn set_member_enabled(
        &self,
        pool_id: String,
        provider_id: String,
        enabled: bool,
    ) -> Result<usize>;
    async fn record_member_outcome(
        &self,
        pool_id: String,
        provider_id: String,
        outcome: MemberOutcome,
    ) -> Result<usize>;

    /// Loads the pool snapshot, runs `plan`, and applies the resolved
    /// changes, all in one write transaction.
    ///
    /// Returns `None` if the pool does not exist.
    async fn rotate(&self, pool_id: String, plan: SelectionFn) -> Result<Option<RotationChanges>>;
}
