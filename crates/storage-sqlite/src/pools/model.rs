//! Database models for source pools.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::warn;

use sourcepool_core::pools::{
    NewPoolMember, NewRotationHistory, PoolMember, RotationHistory, RotationState, SourcePool,
};
use sourcepool_core::rotation::RotationStrategy;

pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn parse_ts(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            warn!("Invalid timestamp '{}' in database: {}", value, e);
            DateTime::<Utc>::default()
        })
}

fn parse_opt_ts(value: Option<String>) -> Option<DateTime<Utc>> {
    value.as_deref().map(parse_ts)
}

fn parse_strategy(value: &str) -> RotationStrategy {
    value.parse().unwrap_or_else(|e| {
        warn!("{} in database, using round_robin", e);
        RotationStrategy::RoundRobin
    })
}

#[derive(Queryable, Identifiable, Insertable, Selectable, PartialEq, Debug, Clone)]
#[diesel(table_name = crate::schema::source_pools)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SourcePoolDB {
    pub id: String,
    pub name: String,
    pub category: String,
    pub rotation_strategy: String,
    pub enabled: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<SourcePoolDB> for SourcePool {
    fn from(db: SourcePoolDB) -> Self {
        Self {
            rotation_strategy: parse_strategy(&db.rotation_strategy),
            created_at: parse_ts(&db.created_at),
            updated_at: parse_ts(&db.updated_at),
            id: db.id,
            name: db.name,
            category: db.category,
            enabled: db.enabled,
        }
    }
}

#[derive(Queryable, Insertable, Selectable, PartialEq, Debug, Clone)]
#[diesel(table_name = crate::schema::pool_members)]
#[diesel(primary_key(pool_id, provider_id))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PoolMemberDB {
    pub pool_id: String,
    pub provider_id: String,
    pub priority: i32,
    pub weight: i32,
    pub enabled: bool,
    pub use_count: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub last_used: Option<String>,
}

impl From<PoolMemberDB> for PoolMember {
    fn from(db: PoolMemberDB) -> Self {
        Self {
            pool_id: db.pool_id,
            provider_id: db.provider_id,
            priority: db.priority,
            weight: db.weight,
            enabled: db.enabled,
            use_count: db.use_count,
            success_count: db.success_count,
            failure_count: db.failure_count,
            last_used: parse_opt_ts(db.last_used),
        }
    }
}

impl From<NewPoolMember> for PoolMemberDB {
    fn from(member: NewPoolMember) -> Self {
        Self {
            pool_id: member.pool_id,
            provider_id: member.provider_id,
            priority: member.priority,
            weight: member.weight,
            enabled: member.enabled,
            use_count: 0,
            success_count: 0,
            failure_count: 0,
            last_used: None,
        }
    }
}

#[derive(Queryable, Identifiable, Insertable, AsChangeset, Selectable, PartialEq, Debug, Clone)]
#[diesel(table_name = crate::schema::rotation_state)]
#[diesel(primary_key(pool_id))]
#[diesel(treat_none_as_null = true)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct RotationStateDB {
    pub pool_id: String,
    pub current_provider_id: Option<String>,
    pub last_rotation: Option<String>,
    pub rotation_count: i64,
}

impl From<RotationStateDB> for RotationState {
    fn from(db: RotationStateDB) -> Self {
        Self {
            pool_id: db.pool_id,
            current_provider_id: db.current_provider_id,
            last_rotation: parse_opt_ts(db.last_rotation),
            rotation_count: db.rotation_count,
        }
    }
}

impl From<&RotationState> for RotationStateDB {
    fn from(state: &RotationState) -> Self {
        Self {
            pool_id: state.pool_id.clone(),
            current_provider_id: state.current_provider_id.clone(),
            last_rotation: state.last_rotation.map(format_ts),
            rotation_count: state.rotation_count,
        }
    }
}

#[derive(Queryable, Identifiable, Selectable, PartialEq, Debug, Clone)]
#[diesel(table_name = crate::schema::rotation_history)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct RotationHistoryDB {
    pub id: i32,
    pub pool_id: String,
    pub from_provider_id: Option<String>,
    pub to_provider_id: String,
    pub reason: String,
    pub success: bool,
    pub notes: Option<String>,
    pub timestamp: String,
}

impl From<RotationHistoryDB> for RotationHistory {
    fn from(db: RotationHistoryDB) -> Self {
        Self {
            id: i64::from(db.id),
            timestamp: parse_ts(&db.timestamp),
            pool_id: db.pool_id,
            from_provider_id: db.from_provider_id,
            to_provider_id: db.to_provider_id,
            reason: db.reason,
            success: db.success,
            notes: db.notes,
        }
    }
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::rotation_history)]
pub struct NewRotationHistoryDB {
    pub pool_id: String,
    pub from_provider_id: Option<String>,
    pub to_provider_id: String,
    pub reason: String,
    pub success: bool,
    pub notes: Option<String>,
    pub timestamp: String,
}

impl From<&NewRotationHistory> for NewRotationHistoryDB {
    fn from(history: &NewRotationHistory) -> Self {
        Self {
            pool_id: history.pool_id.clone(),
            from_provider_id: history.from_provider_id.clone(),
            to_provider_id: history.to_provider_id.clone(),
            reason: history.reason.clone(),
            success: history.success,
            notes: history.notes.clone(),
            timestamp: format_ts(history.timestamp),
        }
    }
}
