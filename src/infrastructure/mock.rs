//! Test doubles for the engine's ports.

use crate::domain::errors::ExchangeError;
use crate::domain::events::NotificationEvent;
use crate::domain::ports::{ExchangeAdapter, NotificationPublisher, StreamSubscription};
use crate::domain::types::{
    AccountStreamEvent, ActionOutcome, Credentials, OrderSpec, Position, Venue,
};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc::Sender;
use tokio::sync::{Mutex, RwLock};

/// Scriptable venue: set the balance, seed positions, mark position ids as
/// permanently rejected, and count close-all invocations.
pub struct MockExchange {
    venue: Venue,
    balance: RwLock<Decimal>,
    positions: RwLock<Vec<Position>>,
    reject_position_ids: RwLock<HashSet<String>>,
    balance_error: RwLock<Option<ExchangeError>>,
    close_error: RwLock<Option<ExchangeError>>,
    pub close_calls: AtomicUsize,
    pub order_calls: AtomicUsize,
    stream_sinks: Mutex<Vec<Sender<AccountStreamEvent>>>,
}

impl MockExchange {
    pub fn new(venue: Venue, balance: Decimal) -> Self {
        Self {
            venue,
            balance: RwLock::new(balance),
            positions: RwLock::new(Vec::new()),
            reject_position_ids: RwLock::new(HashSet::new()),
            balance_error: RwLock::new(None),
            close_error: RwLock::new(None),
            close_calls: AtomicUsize::new(0),
            order_calls: AtomicUsize::new(0),
            stream_sinks: Mutex::new(Vec::new()),
        }
    }

    pub async fn set_balance(&self, balance: Decimal) {
        *self.balance.write().await = balance;
    }

    pub async fn set_positions(&self, positions: Vec<Position>) {
        *self.positions.write().await = positions;
    }

    /// Orders for these position ids fail with a permanent venue reject.
    pub async fn reject_positions(&self, ids: impl IntoIterator<Item = String>) {
        let mut rejects = self.reject_position_ids.write().await;
        rejects.extend(ids);
    }

    pub async fn fail_balance_with(&self, error: Option<ExchangeError>) {
        *self.balance_error.write().await = error;
    }

    pub async fn fail_close_with(&self, error: Option<ExchangeError>) {
        *self.close_error.write().await = error;
    }

    /// Push a balance frame to every live stream subscriber.
    pub async fn emit_stream_balance(&self, balance: Decimal) {
        let sinks = self.stream_sinks.lock().await;
        for sink in sinks.iter() {
            let _ = sink
                .send(AccountStreamEvent::Balance {
                    balance,
                    timestamp: chrono::Utc::now(),
                })
                .await;
        }
    }

    pub async fn drop_streams(&self) {
        let sinks = self.stream_sinks.lock().await;
        for sink in sinks.iter() {
            let _ = sink.send(AccountStreamEvent::Disconnected).await;
        }
    }

    fn clone_error(error: &ExchangeError) -> ExchangeError {
        match error {
            ExchangeError::AuthFailure(m) => ExchangeError::AuthFailure(m.clone()),
            ExchangeError::Throttled { retry_after } => ExchangeError::Throttled {
                retry_after: *retry_after,
            },
            ExchangeError::TransientNetwork(m) => ExchangeError::TransientNetwork(m.clone()),
            ExchangeError::VenueReject { code, msg } => ExchangeError::VenueReject {
                code: *code,
                msg: msg.clone(),
            },
            ExchangeError::Unknown(m) => ExchangeError::Unknown(m.clone()),
        }
    }
}

#[async_trait]
impl ExchangeAdapter for MockExchange {
    fn venue(&self) -> Venue {
        self.venue
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn get_balance(&self, _creds: &Credentials) -> Result<Decimal, ExchangeError> {
        if let Some(error) = self.balance_error.read().await.as_ref() {
            return Err(Self::clone_error(error));
        }
        Ok(*self.balance.read().await)
    }

    async fn get_open_positions(
        &self,
        _creds: &Credentials,
    ) -> Result<Vec<Position>, ExchangeError> {
        Ok(self.positions.read().await.clone())
    }

    async fn place_order(
        &self,
        _creds: &Credentials,
        _spec: OrderSpec,
    ) -> Result<String, ExchangeError> {
        self.order_calls.fetch_add(1, Ordering::SeqCst);
        Ok(uuid::Uuid::new_v4().to_string())
    }

    async fn cancel_all_orders(
        &self,
        _creds: &Credentials,
        _symbol: Option<&str>,
    ) -> Result<Vec<String>, ExchangeError> {
        Ok(Vec::new())
    }

    async fn close_all_positions(
        &self,
        _creds: &Credentials,
    ) -> Result<ActionOutcome, ExchangeError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = self.close_error.read().await.as_ref() {
            return Err(Self::clone_error(error));
        }

        let positions = self.positions.read().await.clone();
        let rejects = self.reject_position_ids.read().await.clone();

        let mut outcome = ActionOutcome::default();
        for position in positions {
            if rejects.contains(&position.position_id) {
                outcome.failed_position_ids.push(position.position_id);
            } else {
                outcome.total_closed_value += position.notional_value();
                outcome.closed_position_ids.push(position.position_id);
            }
        }
        Ok(outcome)
    }

    async fn stream_account(
        &self,
        _creds: &Credentials,
        sink: Sender<AccountStreamEvent>,
    ) -> Result<StreamSubscription, ExchangeError> {
        self.stream_sinks.lock().await.push(sink);
        // The mock feeds the sink directly; the task just parks.
        let handle = tokio::spawn(async {
            std::future::pending::<()>().await;
        });
        Ok(StreamSubscription::new(handle))
    }
}

/// Publisher that records everything it is handed.
#[derive(Default)]
pub struct CapturingPublisher {
    events: RwLock<Vec<NotificationEvent>>,
}

impl CapturingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<NotificationEvent> {
        self.events.read().await.clone()
    }

    pub async fn events_of_kind(
        &self,
        kind: crate::domain::events::EventKind,
    ) -> Vec<NotificationEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.event_type == kind)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl NotificationPublisher for CapturingPublisher {
    async fn publish(&self, event: NotificationEvent) -> Result<()> {
        self.events.write().await.push(event);
        Ok(())
    }
}

/// Helper for tests that need a position quickly.
pub fn position(id: &str, symbol: &str, quantity: Decimal, entry_price: Decimal) -> Position {
    Position {
        position_id: id.to_string(),
        symbol: symbol.to_string(),
        side: crate::domain::types::OrderSide::Buy,
        quantity,
        entry_price,
    }
}

pub fn test_credentials() -> Credentials {
    Credentials::new("test-key", "test-secret")
}
