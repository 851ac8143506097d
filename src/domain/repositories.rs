use crate::domain::account::AccountState;
use crate::domain::errors::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Pure state transition applied inside a store transaction. Must be
/// re-appliable: the store re-runs it against a fresh snapshot when an
/// optimistic write loses a race.
pub type StateMutator = Box<dyn Fn(&mut AccountState) + Send + Sync>;

/// Durable per-client monitoring state with read-modify-write semantics.
///
/// Implementations serialize concurrent mutators for the same client and
/// persist an event-log entry alongside every committed mutation.
#[async_trait]
pub trait AccountStateStore: Send + Sync {
    async fn load(&self, client_id: &str) -> Result<Option<AccountState>, StoreError>;

    /// Persist a brand-new record. Fails if one already exists.
    async fn insert(&self, state: &AccountState) -> Result<(), StoreError>;

    /// Read-modify-write with per-client linearizability. `reason` lands in
    /// the event log next to the before/after status.
    async fn update(
        &self,
        client_id: &str,
        reason: &str,
        mutator: StateMutator,
    ) -> Result<AccountState, StoreError>;

    async fn query_active(&self) -> Result<Vec<AccountState>, StoreError>;

    /// Accounts due for the daily reset: blocked before the cutoff, or
    /// active with a reset older than the cutoff.
    async fn query_needing_daily_reset(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<AccountState>, StoreError>;

    /// Active accounts whose last balance update is older than `threshold`.
    async fn query_stale(&self, threshold: DateTime<Utc>)
    -> Result<Vec<AccountState>, StoreError>;
}
