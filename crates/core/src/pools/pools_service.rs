//! Persisted pool manager: selection, failover and rotation auditing.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};

use super::pools_model::{
    MemberOutcome, MemberStatus, NewPoolMember, NewSourcePool, PlannedSelection, PoolDefinition,
    PoolMember, PoolSnapshot, PoolStatus, RotationPlan, SourcePool, REASON_ROTATION,
    STATUS_HISTORY_LIMIT,
};
use super::pools_traits::SourcePoolRepositoryTrait;
use crate::errors::{ConfigurationError, Result};
use crate::providers::{ProviderHandle, ProviderRegistry, Unavailability};
use crate::rate_limiter::RateLimiter;
use crate::rotation::{select, Candidate, RotationStrategy};

/// Selection inputs for one pool member.
struct MemberView {
    provider_id: String,
    priority: i32,
    weight: i32,
    use_count: u64,
    avg_response_time: Option<f64>,
}

impl Candidate for MemberView {
    fn priority(&self) -> i32 {
        self.priority
    }

    fn weight(&self) -> i32 {
        self.weight
    }

    fn usage(&self) -> u64 {
        self.use_count
    }

    fn avg_response_time(&self) -> Option<f64> {
        self.avg_response_time
    }
}

/// A provider being failed away from.
struct Failover {
    provider_id: String,
    reason: String,
}

/// Chooses the next provider for a snapshot. Runs inside the write
/// transaction, so it must not block on anything but provider locks.
fn plan_selection(
    snapshot: &PoolSnapshot,
    registry: &ProviderRegistry,
    limiter: &RateLimiter,
    exclude_rate_limited: bool,
    failover: Option<Failover>,
) -> RotationPlan {
    let pool = &snapshot.pool;
    let mut plan = RotationPlan {
        penalize: failover.as_ref().map(|f| f.provider_id.clone()),
        selection: None,
    };

    if !pool.enabled {
        warn!("Pool '{}' is disabled", pool.id);
        return RotationPlan::default();
    }

    let now = Utc::now();
    let mut usable: Vec<(&PoolMember, ProviderHandle, bool)> = Vec::new();
    for member in snapshot.members.iter().filter(|m| m.enabled) {
        if failover
            .as_ref()
            .is_some_and(|f| f.provider_id == member.provider_id)
        {
            continue;
        }
        let Some(handle) = registry.get(&member.provider_id) else {
            debug!(
                "Pool '{}': member '{}' is not a registered provider",
                pool.id, member.provider_id
            );
            continue;
        };
        let rate_limited = match handle.with(|p| p.unavailability_at(now)) {
            Some(Unavailability::CircuitOpen) | Some(Unavailability::Offline) => continue,
            Some(Unavailability::RateLimited) => true,
            None => limiter.is_limited(&handle.name()),
        };
        usable.push((member, handle, rate_limited));
    }

    if exclude_rate_limited && usable.iter().any(|(_, _, limited)| *limited) {
        if usable.iter().all(|(_, _, limited)| *limited) {
            warn!(
                "Pool '{}': every available provider is rate limited, ignoring limits",
                pool.id
            );
        } else {
            usable.retain(|(_, _, limited)| !*limited);
        }
    }

    let candidates: Vec<MemberView> = usable
        .iter()
        .map(|(member, handle, _)| MemberView {
            provider_id: member.provider_id.clone(),
            priority: member.priority,
            weight: member.weight,
            use_count: member.use_count.max(0) as u64,
            avg_response_time: handle.lock().avg_response_time(),
        })
        .collect();

    let cursor = round_robin_cursor(pool.rotation_strategy, &candidates, snapshot);
    let Some(selection) = select(
        pool.rotation_strategy,
        &candidates,
        cursor,
        &mut rand::thread_rng(),
    ) else {
        warn!("Pool '{}' exhausted: no available providers", pool.id);
        return plan;
    };
    let chosen = &candidates[selection.index];

    plan.selection = Some(match failover {
        Some(failed) => PlannedSelection {
            provider_id: chosen.provider_id.clone(),
            notes: Some(format!(
                "Failover from {} to {}: {}",
                failed.provider_id, chosen.provider_id, failed.reason
            )),
            reason: failed.reason,
            from_provider_id: Some(failed.provider_id),
            always_record: true,
        },
        None => PlannedSelection {
            provider_id: chosen.provider_id.clone(),
            reason: REASON_ROTATION.to_string(),
            notes: None,
            from_provider_id: None,
            always_record: false,
        },
    });
    plan
}

/// Round robin continues after the current provider.
fn round_robin_cursor(
    strategy: RotationStrategy,
    candidates: &[MemberView],
    snapshot: &PoolSnapshot,
) -> u64 {
    if strategy != RotationStrategy::RoundRobin {
        return 0;
    }
    snapshot
        .state
        .current_provider_id
        .as_deref()
        .and_then(|current| candidates.iter().position(|c| c.provider_id == current))
        .map(|pos| pos as u64 + 1)
        .unwrap_or(0)
}

/// Pool manager backed by a repository, sharing provider state with the
/// registry and quota state with the rate limiter.
pub struct SourcePoolManager {
    repository: Arc<dyn SourcePoolRepositoryTrait>,
    registry: Arc<ProviderRegistry>,
    limiter: Arc<RateLimiter>,
}

impl SourcePoolManager {
    pub fn new(
        repository: Arc<dyn SourcePoolRepositoryTrait>,
        registry: Arc<ProviderRegistry>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            repository,
            registry,
            limiter,
        }
    }

    /// Selects a provider from the pool, recording a rotation if it changed.
    ///
    /// Returns `None` for unknown, disabled or exhausted pools.
    pub async fn get_next_provider(
        &self,
        pool_id: &str,
        exclude_rate_limited: bool,
    ) -> Result<Option<ProviderHandle>> {
        self.rotate(pool_id, exclude_rate_limited, None).await
    }

    /// Moves the pool off `failed_provider_id`.
    ///
    /// The failed member's failure count is incremented even when no
    /// alternative exists, in which case `None` is returned.
    pub async fn failover(
        &self,
        pool_id: &str,
        failed_provider_id: &str,
        reason: &str,
    ) -> Result<Option<ProviderHandle>> {
        info!(
            "Failover requested for pool '{}' away from '{}': {}",
            pool_id, failed_provider_id, reason
        );
        let failover = Failover {
            provider_id: failed_provider_id.to_string(),
            reason: reason.to_string(),
        };
        let next = self.rotate(pool_id, true, Some(failover)).await?;
        if next.is_none() {
            warn!(
                "Failover for pool '{}' found no alternative to '{}'",
                pool_id, failed_provider_id
            );
        }
        Ok(next)
    }

    async fn rotate(
        &self,
        pool_id: &str,
        exclude_rate_limited: bool,
        failover: Option<Failover>,
    ) -> Result<Option<ProviderHandle>> {
        let registry = self.registry.clone();
        let limiter = self.limiter.clone();
        let changes = self
            .repository
            .rotate(
                pool_id.to_string(),
                Box::new(move |snapshot: &PoolSnapshot| {
                    plan_selection(snapshot, &registry, &limiter, exclude_rate_limited, failover)
                }),
            )
            .await?;

        let Some(changes) = changes else {
            warn!("Pool '{}' not found", pool_id);
            return Ok(None);
        };
        if let Some(history) = &changes.history {
            info!(
                "Pool '{}' rotated {} -> {} ({})",
                pool_id,
                history.from_provider_id.as_deref().unwrap_or("none"),
                history.to_provider_id,
                history.reason
            );
        }

        let Some(handle) = changes
            .selected
            .as_deref()
            .and_then(|id| self.registry.get(id))
        else {
            return Ok(None);
        };
        handle.with(|p| p.record_use());
        self.limiter.record(&handle.name());
        Ok(Some(handle))
    }

    /// Bumps the member's per-pool success counter.
    pub async fn record_success(&self, pool_id: &str, provider_id: &str) -> Result<()> {
        self.record_outcome(pool_id, provider_id, MemberOutcome::Success)
            .await
    }

    /// Bumps the member's per-pool failure counter.
    pub async fn record_failure(&self, pool_id: &str, provider_id: &str) -> Result<()> {
        self.record_outcome(pool_id, provider_id, MemberOutcome::Failure)
            .await
    }

    async fn record_outcome(
        &self,
        pool_id: &str,
        provider_id: &str,
        outcome: MemberOutcome,
    ) -> Result<()> {
        let updated = self
            .repository
            .record_member_outcome(pool_id.to_string(), provider_id.to_string(), outcome)
            .await?;
        if updated == 0 {
            warn!(
                "No member '{}' in pool '{}' to record {:?}",
                provider_id, pool_id, outcome
            );
        }
        Ok(())
    }

    /// Current provider, counters, per-member stats and recent history.
    pub fn get_pool_status(&self, pool_id: &str) -> Result<Option<PoolStatus>> {
        let Some(pool) = self.repository.get_pool(pool_id)? else {
            return Ok(None);
        };
        let state = self.repository.get_rotation_state(pool_id)?;
        let members = self.repository.list_members(pool_id)?;
        let recent_history = self
            .repository
            .recent_history(pool_id, STATUS_HISTORY_LIMIT)?;

        let now = Utc::now();
        let members: Vec<MemberStatus> = members
            .into_iter()
            .map(|member| {
                let handle = self.registry.get(&member.provider_id);
                let (name, unavailability, provider_status, avg_response_time) = match &handle {
                    Some(handle) => handle.with(|p| {
                        (
                            Some(p.name.clone()),
                            p.unavailability_at(now),
                            Some(p.status()),
                            p.avg_response_time(),
                        )
                    }),
                    None => (None, None, None, None),
                };
                let rate_limit = name.as_deref().and_then(|n| self.limiter.snapshot(n));
                let limited = rate_limit.as_ref().is_some_and(|r| r.limited);
                MemberStatus {
                    available: handle.is_some()
                        && member.enabled
                        && unavailability.is_none()
                        && !limited,
                    success_rate: member.success_rate(),
                    provider_id: member.provider_id,
                    name,
                    enabled: member.enabled,
                    priority: member.priority,
                    weight: member.weight,
                    use_count: member.use_count,
                    success_count: member.success_count,
                    failure_count: member.failure_count,
                    last_used: member.last_used,
                    unavailability,
                    provider_status,
                    avg_response_time,
                    rate_limit,
                }
            })
            .collect();

        Ok(Some(PoolStatus {
            current_provider_id: state.as_ref().and_then(|s| s.current_provider_id.clone()),
            rotation_count: state.as_ref().map_or(0, |s| s.rotation_count),
            last_rotation: state.as_ref().and_then(|s| s.last_rotation),
            total_members: members.len(),
            available_members: members.iter().filter(|m| m.available).count(),
            members,
            recent_history,
            pool,
        }))
    }

    pub fn list_pools(&self) -> Result<Vec<SourcePool>> {
        self.repository.list_pools()
    }

    pub async fn create_pool(&self, new_pool: NewSourcePool) -> Result<SourcePool> {
        let pool = self.repository.create_pool(new_pool).await?;
        info!("Created pool '{}' ({})", pool.name, pool.id);
        Ok(pool)
    }

    /// Adds a registered provider to a pool, or updates its membership.
    pub async fn add_member(&self, member: NewPoolMember) -> Result<PoolMember> {
        if self.registry.get(&member.provider_id).is_none() {
            return Err(ConfigurationError::UnknownProvider {
                pool: member.pool_id,
                provider: member.provider_id,
            }
            .into());
        }
        self.repository.upsert_member(member).await
    }

    pub async fn remove_member(&self, pool_id: &str, provider_id: &str) -> Result<bool> {
        let removed = self
            .repository
            .remove_member(pool_id.to_string(), provider_id.to_string())
            .await?;
        Ok(removed > 0)
    }

    pub async fn set_member_enabled(
        &self,
        pool_id: &str,
        provider_id: &str,
        enabled: bool,
    ) -> Result<bool> {
        let updated = self
            .repository
            .set_member_enabled(pool_id.to_string(), provider_id.to_string(), enabled)
            .await?;
        Ok(updated > 0)
    }

    /// Creates configured pools that do not exist yet. Existing pools are
    /// left as they are. Returns the number of pools created.
    pub async fn seed_pools(&self, definitions: &[PoolDefinition]) -> Result<usize> {
        for definition in definitions {
            if definition.members.is_empty() {
                return Err(ConfigurationError::EmptyPool(definition.id.clone()).into());
            }
            if let Some(unknown) = definition
                .members
                .iter()
                .find(|m| self.registry.get(&m.provider_id).is_none())
            {
                return Err(ConfigurationError::UnknownProvider {
                    pool: definition.id.clone(),
                    provider: unknown.provider_id.clone(),
                }
                .into());
            }
        }

        let mut created = 0;
        for definition in definitions {
            if self.repository.get_pool(&definition.id)?.is_some() {
                debug!("Pool '{}' already exists, skipping seed", definition.id);
                continue;
            }
            let members = definition
                .members
                .iter()
                .map(|member| NewPoolMember {
                    pool_id: definition.id.clone(),
                    provider_id: member.provider_id.clone(),
                    priority: member.priority,
                    weight: member.weight,
                    enabled: member.enabled,
                })
                .collect();
            self.repository
                .create_pool_with_members(
                    NewSourcePool {
                        id: Some(definition.id.clone()),
                        name: definition.name.clone(),
                        category: definition.category.clone(),
                        rotation_strategy: definition.rotation_strategy,
                        enabled: definition.enabled,
                    },
                    members,
                )
                .await?;
            created += 1;
        }

        if created > 0 {
            info!("Seeded {} pools", created);
        }
        Ok(created)
    }
}
