//! Persisted pool domain models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::providers::{ProviderStatus, RateLimitSnapshot, Unavailability};
use crate::rotation::RotationStrategy;

/// Number of history rows included in a pool status.
pub const STATUS_HISTORY_LIMIT: i64 = 10;

/// History reason written when selection moves to a different provider.
pub const REASON_ROTATION: &str = "rotation";

/// A named, persisted pool of providers for one category.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SourcePool {
    pub id: String,
    pub name: String,
    pub category: String,
    pub rotation_strategy: RotationStrategy,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input model for creating a pool. A missing id is generated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSourcePool {
    pub id: Option<String>,
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub rotation_strategy: RotationStrategy,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// A provider's membership in a pool, with per-pool counters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PoolMember {
    pub pool_id: String,
    pub provider_id: String,
    pub priority: i32,
    pub weight: i32,
    pub enabled: bool,
    pub use_count: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub last_used: Option<DateTime<Utc>>,
}

impl PoolMember {
    /// Success percentage over recorded outcomes, 0 when none.
    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total <= 0 {
            0.0
        } else {
            self.success_count as f64 / total as f64 * 100.0
        }
    }
}

/// Input model for adding (or updating) a pool member.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPoolMember {
    pub pool_id: String,
    pub provider_id: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_weight")]
    pub weight: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Which provider a pool currently points at.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RotationState {
    pub pool_id: String,
    pub current_provider_id: Option<String>,
    pub last_rotation: Option<DateTime<Utc>>,
    pub rotation_count: i64,
}

impl RotationState {
    pub fn empty(pool_id: impl Into<String>) -> Self {
        Self {
            pool_id: pool_id.into(),
            current_provider_id: None,
            last_rotation: None,
            rotation_count: 0,
        }
    }
}

/// Append-only audit row for a provider switch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RotationHistory {
    pub id: i64,
    pub pool_id: String,
    pub from_provider_id: Option<String>,
    pub to_provider_id: String,
    pub reason: String,
    pub success: bool,
    pub notes: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewRotationHistory {
    pub pool_id: String,
    pub from_provider_id: Option<String>,
    pub to_provider_id: String,
    pub reason: String,
    pub success: bool,
    pub notes: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Which per-pool member counter to bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberOutcome {
    Success,
    Failure,
}

/// Pool, enabled members and rotation state as read inside one transaction.
#[derive(Debug, Clone)]
pub struct PoolSnapshot {
    pub pool: SourcePool,
    pub members: Vec<PoolMember>,
    pub state: RotationState,
}

/// Provider chosen by a selection closure.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedSelection {
    pub provider_id: String,
    pub reason: String,
    pub notes: Option<String>,
    /// Recorded as `from_provider_id` instead of the current provider.
    pub from_provider_id: Option<String>,
    /// Write a history row even if the provider does not change.
    pub always_record: bool,
}

/// What a selection closure decided.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RotationPlan {
    /// Member whose `failure_count` is incremented.
    pub penalize: Option<String>,
    pub selection: Option<PlannedSelection>,
}

/// Rows a [`RotationPlan`] turns into. Storage applies these verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct RotationChanges {
    pub pool_id: String,
    pub penalize: Option<String>,
    pub history: Option<NewRotationHistory>,
    /// New state, present whenever a provider was selected.
    pub state: Option<RotationState>,
    pub selected: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl RotationPlan {
    /// Resolves the plan against the snapshot it was made from.
    ///
    /// The rotation counter only moves when the selected provider differs from
    /// the current one, so repeated selections of the same provider write no
    /// history unless `always_record` is set.
    pub fn resolve(self, snapshot: &PoolSnapshot, now: DateTime<Utc>) -> RotationChanges {
        let pool_id = snapshot.pool.id.clone();
        let mut changes = RotationChanges {
            pool_id: pool_id.clone(),
            penalize: self.penalize,
            history: None,
            state: None,
            selected: None,
            timestamp: now,
        };

        let Some(selection) = self.selection else {
            return changes;
        };

        let previous = &snapshot.state;
        let changed = previous.current_provider_id.as_deref() != Some(selection.provider_id.as_str());

        if changed || selection.always_record {
            changes.history = Some(NewRotationHistory {
                pool_id: pool_id.clone(),
                from_provider_id: selection
                    .from_provider_id
                    .or_else(|| previous.current_provider_id.clone()),
                to_provider_id: selection.provider_id.clone(),
                reason: selection.reason,
                success: true,
                notes: selection.notes,
                timestamp: now,
            });
        }

        changes.state = Some(RotationState {
            pool_id,
            current_provider_id: Some(selection.provider_id.clone()),
            last_rotation: if changed { Some(now) } else { previous.last_rotation },
            rotation_count: previous.rotation_count + i64::from(changed),
        });
        changes.selected = Some(selection.provider_id);
        changes
    }
}

/// Per-member line of a pool status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemberStatus {
    pub provider_id: String,
    pub name: Option<String>,
    pub enabled: bool,
    pub priority: i32,
    pub weight: i32,
    pub use_count: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub success_rate: f64,
    pub last_used: Option<DateTime<Utc>>,
    pub available: bool,
    pub unavailability: Option<Unavailability>,
    pub provider_status: Option<ProviderStatus>,
    pub avg_response_time: Option<f64>,
    pub rate_limit: Option<RateLimitSnapshot>,
}

/// Point-in-time view of a pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatus {
    pub pool: SourcePool,
    pub current_provider_id: Option<String>,
    pub rotation_count: i64,
    pub last_rotation: Option<DateTime<Utc>>,
    pub total_members: usize,
    pub available_members: usize,
    pub members: Vec<MemberStatus>,
    pub recent_history: Vec<RotationHistory>,
}

/// Pool as declared in the sources document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct PoolDefinition {
    pub id: String,
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub rotation_strategy: RotationStrategy,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub members: Vec<PoolMemberDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct PoolMemberDefinition {
    pub provider_id: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_weight")]
    pub weight: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

fn default_weight() -> i32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(current: Option<&str>, count: i64) -> PoolSnapshot {
        let now = Utc::now();
        PoolSnapshot {
            pool: SourcePool {
                id: "pool-1".to_string(),
                name: "Prices".to_string(),
                category: "market_data".to_string(),
                rotation_strategy: RotationStrategy::Priority,
                enabled: true,
                created_at: now,
                updated_at: now,
            },
            members: Vec::new(),
            state: RotationState {
                pool_id: "pool-1".to_string(),
                current_provider_id: current.map(str::to_string),
                last_rotation: None,
                rotation_count: count,
            },
        }
    }

    fn select(id: &str) -> PlannedSelection {
        PlannedSelection {
            provider_id: id.to_string(),
            reason: REASON_ROTATION.to_string(),
            notes: None,
            from_provider_id: None,
            always_record: false,
        }
    }

    #[test]
    fn test_same_provider_writes_no_history() {
        let plan = RotationPlan {
            penalize: None,
            selection: Some(select("a")),
        };
        let changes = plan.resolve(&snapshot(Some("a"), 3), Utc::now());

        assert!(changes.history.is_none());
        assert_eq!(changes.state.unwrap().rotation_count, 3);
        assert_eq!(changes.selected.as_deref(), Some("a"));
    }

    #[test]
    fn test_switch_records_history_and_bumps_count() {
        let now = Utc::now();
        let plan = RotationPlan {
            penalize: None,
            selection: Some(select("b")),
        };
        let changes = plan.resolve(&snapshot(Some("a"), 3), now);

        let history = changes.history.unwrap();
        assert_eq!(history.from_provider_id.as_deref(), Some("a"));
        assert_eq!(history.to_provider_id, "b");
        assert_eq!(history.reason, "rotation");

        let state = changes.state.unwrap();
        assert_eq!(state.rotation_count, 4);
        assert_eq!(state.last_rotation, Some(now));
    }

    #[test]
    fn test_failover_always_records_from_failed() {
        let plan = RotationPlan {
            penalize: Some("a".to_string()),
            selection: Some(PlannedSelection {
                provider_id: "b".to_string(),
                reason: "timeout".to_string(),
                notes: Some("failover".to_string()),
                from_provider_id: Some("a".to_string()),
                always_record: true,
            }),
        };
        // Current already moved to b; the row is still written.
        let changes = plan.resolve(&snapshot(Some("b"), 1), Utc::now());

        let history = changes.history.unwrap();
        assert_eq!(history.from_provider_id.as_deref(), Some("a"));
        assert_eq!(changes.state.unwrap().rotation_count, 1);
        assert_eq!(changes.penalize.as_deref(), Some("a"));
    }

    #[test]
    fn test_empty_plan() {
        let changes = RotationPlan::default().resolve(&snapshot(None, 0), Utc::now());
        assert!(changes.selected.is_none());
        assert!(changes.state.is_none());
        assert!(changes.history.is_none());
    }

    #[test]
    fn test_member_success_rate() {
        let member = PoolMember {
            pool_id: "p".to_string(),
            provider_id: "a".to_string(),
            priority: 0,
            weight: 1,
            enabled: true,
            use_count: 10,
            success_count: 3,
            failure_count: 1,
            last_used: None,
        };
        assert_eq!(member.success_rate(), 75.0);
    }
}
