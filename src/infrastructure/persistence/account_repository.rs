//! SQLite-backed account state store.
//!
//! Per-client linearizability is enforced twice: a per-key async lock
//! serializes mutators in-process, and a `version` CAS column rejects any
//! write that lost a race anyway. Every committed mutation carries an
//! event-log row in the same transaction.

use crate::domain::account::{AccountState, AccountStatus};
use crate::domain::errors::StoreError;
use crate::domain::events::EventSequence;
use crate::domain::repositories::{AccountStateStore, StateMutator};
use crate::domain::types::Venue;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

const CAS_RETRY_MAX: u32 = 3;

pub struct SqliteAccountStore {
    database: Database,
    events: EventSequence,
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SqliteAccountStore {
    pub fn new(database: Database, events: EventSequence) -> Self {
        Self {
            database,
            events,
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, client_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().await;
        locks
            .entry(client_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn fetch(&self, client_id: &str) -> Result<Option<AccountState>, StoreError> {
        let row = sqlx::query("SELECT * FROM account_monitoring WHERE client_id = $1")
            .bind(client_id)
            .fetch_optional(&self.database.pool)
            .await
            .map_err(|e| StoreError::Backend(anyhow!(e).context("Failed to load account state")))?;

        row.map(|r| decode_row(&r)).transpose()
    }

    async fn persist(
        &self,
        before: &AccountState,
        after: &AccountState,
        reason: &str,
    ) -> Result<bool, StoreError> {
        let mut tx = self
            .database
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Backend(anyhow!(e).context("Failed to open transaction")))?;

        let result = sqlx::query(
            r#"
            UPDATE account_monitoring SET
                venue = $1,
                initial_balance = $2,
                daily_start_balance = $3,
                current_balance = $4,
                previous_balance = $5,
                status = $6,
                daily_blocked_at = $7,
                permanent_blocked_at = $8,
                daily_block_reason = $9,
                permanent_block_reason = $10,
                last_balance_update = $11,
                last_risk_check = $12,
                daily_reset_at = $13,
                active = $14,
                session_epoch = $15,
                version = $16,
                updated_at = $17
            WHERE client_id = $18 AND version = $19
            "#,
        )
        .bind(after.venue.to_string())
        .bind(after.initial_balance.to_string())
        .bind(after.daily_start_balance.to_string())
        .bind(after.current_balance.to_string())
        .bind(after.previous_balance.to_string())
        .bind(after.status.as_str())
        .bind(after.daily_blocked_at)
        .bind(after.permanent_blocked_at)
        .bind(after.daily_block_reason.as_deref())
        .bind(after.permanent_block_reason.as_deref())
        .bind(after.last_balance_update)
        .bind(after.last_risk_check)
        .bind(after.daily_reset_at)
        .bind(after.active)
        .bind(after.session_epoch as i64)
        .bind(after.version as i64)
        .bind(after.updated_at)
        .bind(&after.client_id)
        .bind(before.version as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Backend(anyhow!(e).context("Failed to update account state")))?;

        if result.rows_affected() == 0 {
            // Lost the CAS race; caller re-reads and re-applies.
            let _ = tx.rollback().await;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO event_log (event_id, client_id, before_status, after_status, reason, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(self.events.next_id() as i64)
        .bind(&after.client_id)
        .bind(before.status.as_str())
        .bind(after.status.as_str())
        .bind(reason)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Backend(anyhow!(e).context("Failed to append event log")))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Backend(anyhow!(e).context("Failed to commit mutation")))?;

        Ok(true)
    }

    async fn query_states(
        &self,
        sql: &str,
        binds: &[DateTime<Utc>],
    ) -> Result<Vec<AccountState>, StoreError> {
        let mut query = sqlx::query(sql);
        for bind in binds {
            query = query.bind(*bind);
        }

        let rows = query
            .fetch_all(&self.database.pool)
            .await
            .map_err(|e| StoreError::Backend(anyhow!(e).context("Failed to query accounts")))?;

        rows.iter().map(decode_row).collect()
    }
}

#[async_trait]
impl AccountStateStore for SqliteAccountStore {
    async fn load(&self, client_id: &str) -> Result<Option<AccountState>, StoreError> {
        self.fetch(client_id).await
    }

    async fn insert(&self, state: &AccountState) -> Result<(), StoreError> {
        let mut tx = self
            .database
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Backend(anyhow!(e).context("Failed to open transaction")))?;

        sqlx::query(
            r#"
            INSERT INTO account_monitoring (
                client_id, venue,
                initial_balance, daily_start_balance, current_balance, previous_balance,
                status, daily_blocked_at, permanent_blocked_at,
                daily_block_reason, permanent_block_reason,
                last_balance_update, last_risk_check, daily_reset_at,
                active, session_epoch, version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(&state.client_id)
        .bind(state.venue.to_string())
        .bind(state.initial_balance.to_string())
        .bind(state.daily_start_balance.to_string())
        .bind(state.current_balance.to_string())
        .bind(state.previous_balance.to_string())
        .bind(state.status.as_str())
        .bind(state.daily_blocked_at)
        .bind(state.permanent_blocked_at)
        .bind(state.daily_block_reason.as_deref())
        .bind(state.permanent_block_reason.as_deref())
        .bind(state.last_balance_update)
        .bind(state.last_risk_check)
        .bind(state.daily_reset_at)
        .bind(state.active)
        .bind(state.session_epoch as i64)
        .bind(state.version as i64)
        .bind(state.created_at)
        .bind(state.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Backend(anyhow!(e).context("Failed to insert account state")))?;

        sqlx::query(
            r#"
            INSERT INTO event_log (event_id, client_id, before_status, after_status, reason, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(self.events.next_id() as i64)
        .bind(&state.client_id)
        .bind(state.status.as_str())
        .bind(state.status.as_str())
        .bind("monitoring record created")
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Backend(anyhow!(e).context("Failed to append event log")))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Backend(anyhow!(e).context("Failed to commit insert")))?;

        Ok(())
    }

    async fn update(
        &self,
        client_id: &str,
        reason: &str,
        mutator: StateMutator,
    ) -> Result<AccountState, StoreError> {
        let lock = self.lock_for(client_id).await;
        let _guard = lock.lock().await;

        let mut last_seen_version = 0;
        for attempt in 0..CAS_RETRY_MAX {
            let before = self
                .fetch(client_id)
                .await?
                .ok_or_else(|| StoreError::NotFound {
                    client_id: client_id.to_string(),
                })?;
            last_seen_version = before.version;

            let mut after = before.clone();
            mutator(&mut after);
            after.version = before.version + 1;
            after.updated_at = Utc::now();

            if self.persist(&before, &after, reason).await? {
                return Ok(after);
            }

            debug!(
                "SqliteAccountStore: CAS conflict for {} (attempt {}), retrying",
                client_id,
                attempt + 1
            );
        }

        Err(StoreError::PreconditionFailed {
            client_id: client_id.to_string(),
            expected: last_seen_version,
            actual: last_seen_version + 1,
        })
    }

    async fn query_active(&self) -> Result<Vec<AccountState>, StoreError> {
        self.query_states("SELECT * FROM account_monitoring WHERE active = 1", &[])
            .await
    }

    async fn query_needing_daily_reset(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<AccountState>, StoreError> {
        self.query_states(
            r#"
            SELECT * FROM account_monitoring
            WHERE (daily_blocked_at IS NOT NULL AND daily_blocked_at < $1)
               OR (daily_reset_at < $2 AND active = 1)
            "#,
            &[cutoff, cutoff],
        )
        .await
    }

    async fn query_stale(
        &self,
        threshold: DateTime<Utc>,
    ) -> Result<Vec<AccountState>, StoreError> {
        self.query_states(
            r#"
            SELECT * FROM account_monitoring
            WHERE active = 1
              AND last_balance_update IS NOT NULL
              AND last_balance_update < $1
            "#,
            &[threshold],
        )
        .await
    }
}

fn decode_decimal(row: &SqliteRow, column: &str) -> Result<Decimal, StoreError> {
    let raw: String = row
        .try_get(column)
        .map_err(|e| StoreError::Backend(anyhow!(e).context(format!("missing column {}", column))))?;
    Decimal::from_str(&raw)
        .with_context(|| format!("undecodable decimal in {}: {}", column, raw))
        .map_err(StoreError::Backend)
}

fn decode_row(row: &SqliteRow) -> Result<AccountState, StoreError> {
    let venue_raw: String = row
        .try_get("venue")
        .map_err(|e| StoreError::Backend(anyhow!(e).context("missing column venue")))?;
    let status_raw: String = row
        .try_get("status")
        .map_err(|e| StoreError::Backend(anyhow!(e).context("missing column status")))?;

    let get_str = |column: &str| -> Result<Option<String>, StoreError> {
        row.try_get(column)
            .map_err(|e| StoreError::Backend(anyhow!(e).context(format!("missing column {}", column))))
    };
    let get_time = |column: &str| -> Result<Option<DateTime<Utc>>, StoreError> {
        row.try_get(column)
            .map_err(|e| StoreError::Backend(anyhow!(e).context(format!("missing column {}", column))))
    };
    let get_required_time = |column: &str| -> Result<DateTime<Utc>, StoreError> {
        row.try_get(column)
            .map_err(|e| StoreError::Backend(anyhow!(e).context(format!("missing column {}", column))))
    };

    Ok(AccountState {
        client_id: row
            .try_get("client_id")
            .map_err(|e| StoreError::Backend(anyhow!(e).context("missing column client_id")))?,
        venue: Venue::from_str(&venue_raw).map_err(StoreError::Backend)?,
        initial_balance: decode_decimal(row, "initial_balance")?,
        daily_start_balance: decode_decimal(row, "daily_start_balance")?,
        current_balance: decode_decimal(row, "current_balance")?,
        previous_balance: decode_decimal(row, "previous_balance")?,
        status: AccountStatus::from_str(&status_raw).map_err(StoreError::Backend)?,
        daily_blocked_at: get_time("daily_blocked_at")?,
        permanent_blocked_at: get_time("permanent_blocked_at")?,
        daily_block_reason: get_str("daily_block_reason")?,
        permanent_block_reason: get_str("permanent_block_reason")?,
        last_balance_update: get_time("last_balance_update")?,
        last_risk_check: get_time("last_risk_check")?,
        daily_reset_at: get_required_time("daily_reset_at")?,
        active: row
            .try_get("active")
            .map_err(|e| StoreError::Backend(anyhow!(e).context("missing column active")))?,
        session_epoch: row
            .try_get::<i64, _>("session_epoch")
            .map_err(|e| StoreError::Backend(anyhow!(e).context("missing column session_epoch")))?
            as u64,
        version: row
            .try_get::<i64, _>("version")
            .map_err(|e| StoreError::Backend(anyhow!(e).context("missing column version")))?
            as u64,
        created_at: get_required_time("created_at")?,
        updated_at: get_required_time("updated_at")?,
    })
}
