use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by venue adapters.
///
/// The taxonomy drives retry policy: only `Throttled` and `TransientNetwork`
/// are retryable; auth failures and venue rejects are final.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("authentication rejected by venue: {0}")]
    AuthFailure(String),

    #[error("throttled by venue (retry after {retry_after:?})")]
    Throttled { retry_after: Option<Duration> },

    #[error("transient network failure: {0}")]
    TransientNetwork(String),

    #[error("venue rejected request (code {code}): {msg}")]
    VenueReject { code: i64, msg: String },

    #[error("unexpected venue failure: {0}")]
    Unknown(String),
}

impl ExchangeError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExchangeError::Throttled { .. } | ExchangeError::TransientNetwork(_)
        )
    }
}

/// Errors surfaced by the account state store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("optimistic write conflict for {client_id}: expected v{expected}, found v{actual}")]
    PreconditionFailed {
        client_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("no monitoring record for {client_id}")]
    NotFound { client_id: String },

    #[error("storage backend failure: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Engine-level failures visible to callers of the coordinator and the
/// admin surface.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("client {client_id} is not monitored")]
    NotMonitored { client_id: String },

    #[error("client {client_id} is already being monitored")]
    AlreadyMonitored { client_id: String },

    #[error("invariant broken for {client_id}: {detail}")]
    InvariantBroken { client_id: String, detail: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("internal failure: {0}")]
    Internal(#[from] anyhow::Error),
}
