use crate::domain::errors::ExchangeError;
use crate::domain::events::NotificationEvent;
use crate::domain::types::{
    AccountStreamEvent, ActionOutcome, ClientRecord, Credentials, OrderSpec, Position, Venue,
};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;

/// Handle to a running account stream subscription. Aborting it is the only
/// way to stop the underlying task.
pub struct StreamSubscription {
    handle: JoinHandle<()>,
}

impl StreamSubscription {
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self { handle }
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for StreamSubscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Venue capability surface. The adapter is the only component that knows
/// venue symbol formats and signing schemes.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    fn venue(&self) -> Venue;

    /// Whether `stream_account` is implemented for this venue.
    fn supports_streaming(&self) -> bool {
        false
    }

    async fn get_balance(&self, creds: &Credentials) -> Result<Decimal, ExchangeError>;

    async fn get_open_positions(&self, creds: &Credentials)
    -> Result<Vec<Position>, ExchangeError>;

    async fn place_order(
        &self,
        creds: &Credentials,
        spec: OrderSpec,
    ) -> Result<String, ExchangeError>;

    /// Cancel open orders, optionally narrowed to one symbol. Returns the
    /// cancelled order ids.
    async fn cancel_all_orders(
        &self,
        creds: &Credentials,
        symbol: Option<&str>,
    ) -> Result<Vec<String>, ExchangeError>;

    /// Flatten the account: snapshot open positions and issue an
    /// opposite-side reduce-only market order per position. Partial failures
    /// are recorded in the outcome, not raised.
    async fn close_all_positions(
        &self,
        creds: &Credentials,
    ) -> Result<ActionOutcome, ExchangeError>;

    /// Subscribe to the venue account stream. The subscription pushes
    /// `AccountStreamEvent`s into `sink` and sends `Disconnected` as its
    /// terminal event on connection loss.
    async fn stream_account(
        &self,
        creds: &Credentials,
        sink: Sender<AccountStreamEvent>,
    ) -> Result<StreamSubscription, ExchangeError>;
}

/// Read-only view of registered clients. Registration and credential
/// encryption live outside the engine.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_client(&self, client_id: &str) -> Result<Option<ClientRecord>>;

    /// Decrypt and return credentials for a single use. Callers must drop
    /// them when the run completes.
    async fn get_credentials(&self, client_id: &str) -> Result<Credentials>;
}

/// Durable publisher seam so application services stay testable without a
/// database.
#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    async fn publish(&self, event: NotificationEvent) -> Result<()>;
}
