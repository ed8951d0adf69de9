use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::r2d2::{self, Pool};
use diesel::SqliteConnection;
use std::sync::Arc;
use uuid::Uuid;

use sourcepool_core::pools::{
    MemberOutcome, NewPoolMember, NewSourcePool, PoolMember, PoolSnapshot, RotationChanges,
    RotationHistory, RotationState, SelectionFn, SourcePool, SourcePoolRepositoryTrait,
};
use sourcepool_core::Result;

use super::model::{
    format_ts, NewRotationHistoryDB, PoolMemberDB, RotationHistoryDB, RotationStateDB,
    SourcePoolDB,
};
use crate::db::{get_connection, WriteHandle};
use crate::errors::IntoCore;
use crate::schema::{pool_members, rotation_history, rotation_state, source_pools};

pub struct SourcePoolRepository {
    pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
    writer: WriteHandle,
}

impl SourcePoolRepository {
    pub fn new(
        pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
        writer: WriteHandle,
    ) -> Self {
        SourcePoolRepository { pool, writer }
    }
}

fn load_snapshot(conn: &mut SqliteConnection, pool_id: &str) -> Result<Option<PoolSnapshot>> {
    let Some(pool_db) = source_pools::table
        .find(pool_id)
        .first::<SourcePoolDB>(conn)
        .optional()
        .into_core()?
    else {
        return Ok(None);
    };

    let members = pool_members::table
        .filter(pool_members::pool_id.eq(pool_id))
        .filter(pool_members::enabled.eq(true))
        .order((pool_members::priority.desc(), pool_members::provider_id.asc()))
        .select(PoolMemberDB::as_select())
        .load(conn)
        .into_core()?;

    let state = rotation_state::table
        .find(pool_id)
        .first::<RotationStateDB>(conn)
        .optional()
        .into_core()?
        .map(RotationState::from)
        .unwrap_or_else(|| RotationState::empty(pool_id));

    Ok(Some(PoolSnapshot {
        pool: SourcePool::from(pool_db),
        members: members.into_iter().map(PoolMember::from).collect(),
        state,
    }))
}

fn insert_pool(conn: &mut SqliteConnection, new_pool: NewSourcePool) -> Result<SourcePool> {
    let now = format_ts(Utc::now());
    let pool_db = SourcePoolDB {
        id: new_pool.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
        name: new_pool.name,
        category: new_pool.category,
        rotation_strategy: new_pool.rotation_strategy.as_str().to_string(),
        enabled: new_pool.enabled,
        created_at: now.clone(),
        updated_at: now,
    };

    let result_db = diesel::insert_into(source_pools::table)
        .values(&pool_db)
        .returning(SourcePoolDB::as_returning())
        .get_result(conn)
        .into_core()?;
    Ok(SourcePool::from(result_db))
}

fn apply_changes(conn: &mut SqliteConnection, changes: &RotationChanges) -> Result<()> {
    let pool_id = changes.pool_id.as_str();

    if let Some(penalized) = &changes.penalize {
        diesel::update(
            pool_members::table
                .filter(pool_members::pool_id.eq(pool_id))
                .filter(pool_members::provider_id.eq(penalized)),
        )
        .set(pool_members::failure_count.eq(pool_members::failure_count + 1))
        .execute(conn)
        .into_core()?;
    }

    if let Some(history) = &changes.history {
        diesel::insert_into(rotation_history::table)
            .values(NewRotationHistoryDB::from(history))
            .execute(conn)
            .into_core()?;
    }

    if let Some(state) = &changes.state {
        let state_db = RotationStateDB::from(state);
        diesel::insert_into(rotation_state::table)
            .values(&state_db)
            .on_conflict(rotation_state::pool_id)
            .do_update()
            .set(&state_db)
            .execute(conn)
            .into_core()?;
    }

    if let Some(selected) = &changes.selected {
        diesel::update(
            pool_members::table
                .filter(pool_members::pool_id.eq(pool_id))
                .filter(pool_members::provider_id.eq(selected)),
        )
        .set((
            pool_members::use_count.eq(pool_members::use_count + 1),
            pool_members::last_used.eq(Some(format_ts(changes.timestamp))),
        ))
        .execute(conn)
        .into_core()?;
    }

    Ok(())
}

#[async_trait]
impl SourcePoolRepositoryTrait for SourcePoolRepository {
    fn list_pools(&self) -> Result<Vec<SourcePool>> {
        let mut conn = get_connection(&self.pool)?;
        let pools = source_pools::table
            .order(source_pools::name.asc())
            .load::<SourcePoolDB>(&mut conn)
            .into_core()?;
        Ok(pools.into_iter().map(SourcePool::from).collect())
    }

    fn get_pool(&self, pool_id: &str) -> Result<Option<SourcePool>> {
        let mut conn = get_connection(&self.pool)?;
        let pool = source_pools::table
            .find(pool_id)
            .first::<SourcePoolDB>(&mut conn)
            .optional()
            .into_core()?;
        Ok(pool.map(SourcePool::from))
    }

    fn list_members(&self, pool_id: &str) -> Result<Vec<PoolMember>> {
        let mut conn = get_connection(&self.pool)?;
        let members = pool_members::table
            .filter(pool_members::pool_id.eq(pool_id))
            .order((pool_members::priority.desc(), pool_members::provider_id.asc()))
            .select(PoolMemberDB::as_select())
            .load(&mut conn)
            .into_core()?;
        Ok(members.into_iter().map(PoolMember::from).collect())
    }

    fn get_rotation_state(&self, pool_id: &str) -> Result<Option<RotationState>> {
        let mut conn = get_connection(&self.pool)?;
        let state = rotation_state::table
            .find(pool_id)
            .first::<RotationStateDB>(&mut conn)
            .optional()
            .into_core()?;
        Ok(state.map(RotationState::from))
    }

    fn recent_history(&self, pool_id: &str, limit: i64) -> Result<Vec<RotationHistory>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = rotation_history::table
            .filter(rotation_history::pool_id.eq(pool_id))
            .order(rotation_history::id.desc())
            .limit(limit)
            .select(RotationHistoryDB::as_select())
            .load(&mut conn)
            .into_core()?;
        Ok(rows.into_iter().map(RotationHistory::from).collect())
    }

    async fn create_pool(&self, new_pool: NewSourcePool) -> Result<SourcePool> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<SourcePool> {
                insert_pool(conn, new_pool)
            })
            .await
    }

    async fn create_pool_with_members(
        &self,
        new_pool: NewSourcePool,
        members: Vec<NewPoolMember>,
    ) -> Result<SourcePool> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<SourcePool> {
                let pool = insert_pool(conn, new_pool)?;
                let rows: Vec<PoolMemberDB> = members
                    .into_iter()
                    .map(|member| {
                        PoolMemberDB::from(NewPoolMember {
                            pool_id: pool.id.clone(),
                            ..member
                        })
                    })
                    .collect();
                diesel::insert_into(pool_members::table)
                    .values(&rows)
                    .execute(conn)
                    .into_core()?;
                Ok(pool)
            })
            .await
    }

    async fn upsert_member(&self, member: NewPoolMember) -> Result<PoolMember> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<PoolMember> {
                let member_db = PoolMemberDB::from(member);
                diesel::insert_into(pool_members::table)
                    .values(&member_db)
                    .on_conflict((pool_members::pool_id, pool_members::provider_id))
                    .do_update()
                    .set((
                        pool_members::priority.eq(member_db.priority),
                        pool_members::weight.eq(member_db.weight),
                        pool_members::enabled.eq(member_db.enabled),
                    ))
                    .execute(conn)
                    .into_core()?;

                let stored = pool_members::table
                    .filter(pool_members::pool_id.eq(&member_db.pool_id))
                    .filter(pool_members::provider_id.eq(&member_db.provider_id))
                    .select(PoolMemberDB::as_select())
                    .first(conn)
                    .into_core()?;
                Ok(PoolMember::from(stored))
            })
            .await
    }

    async fn remove_member(&self, pool_id: String, provider_id: String) -> Result<usize> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<usize> {
                diesel::delete(
                    pool_members::table
                        .filter(pool_members::pool_id.eq(pool_id))
                        .filter(pool_members::provider_id.eq(provider_id)),
                )
                .execute(conn)
                .into_core()
            })
            .await
    }

    async fn set_member_enabled(
        &self,
        pool_id: String,
        provider_id: String,
        enabled: bool,
    ) -> Result<usize> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<usize> {
                diesel::update(
                    pool_members::table
                        .filter(pool_members::pool_id.eq(pool_id))
                        .filter(pool_members::provider_id.eq(provider_id)),
                )
                .set(pool_members::enabled.eq(enabled))
                .execute(conn)
                .into_core()
            })
            .await
    }

    async fn record_member_outcome(
        &self,
        pool_id: String,
        provider_id: String,
        outcome: MemberOutcome,
    ) -> Result<usize> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<usize> {
                let target = pool_members::table
                    .filter(pool_members::pool_id.eq(pool_id))
                    .filter(pool_members::provider_id.eq(provider_id));
                let updated = match outcome {
                    MemberOutcome::Success => diesel::update(target)
                        .set(pool_members::success_count.eq(pool_members::success_count + 1))
                        .execute(conn),
                    MemberOutcome::Failure => diesel::update(target)
                        .set(pool_members::failure_count.eq(pool_members::failure_count + 1))
                        .execute(conn),
                };
                updated.into_core()
            })
            .await
    }

    async fn rotate(&self, pool_id: String, plan: SelectionFn) -> Result<Option<RotationChanges>> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<Option<RotationChanges>> {
                let Some(snapshot) = load_snapshot(conn, &pool_id)? else {
                    return Ok(None);
                };
                let changes = plan(&snapshot).resolve(&snapshot, Utc::now());
                apply_changes(conn, &changes)?;
                Ok(Some(changes))
            })
            .await
    }
}
