//! Persisted source pools - domain models, manager, and repository trait.

mod pools_model;
mod pools_service;
mod pools_traits;

pub use pools_model::{
    MemberOutcome, MemberStatus, NewPoolMember, NewRotationHistory, NewSourcePool,
    PlannedSelection, PoolDefinition, PoolMember, PoolMemberDefinition, PoolSnapshot, PoolStatus,
    RotationChanges, RotationHistory, RotationPlan, RotationState, SourcePool, REASON_ROTATION,
    STATUS_HISTORY_LIMIT,
};
pub use pools_service::SourcePoolManager;
pub use pools_traits::{SelectionFn, SourcePoolRepositoryTrait};
