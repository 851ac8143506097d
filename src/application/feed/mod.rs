//! Per-client balance feed.
//!
//! Exactly one mode runs per monitoring session: a streaming subscription
//! when the venue supports it and config asks for it, otherwise polling.
//! A stream that stays silent past the stale threshold is treated as
//! faulted and the session fails over to polling for good; the next
//! session may pick streaming again.

pub mod health;

use crate::application::queue::ClientQueue;
use crate::domain::events::EventSequence;
use crate::domain::ports::{ExchangeAdapter, UserDirectory};
use crate::domain::types::{AccountStreamEvent, BalanceSource, BalanceUpdate, Venue};
use chrono::Utc;
use health::FeedHealthMonitor;
use rand::Rng;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedMode {
    Stream,
    Poll,
}

impl FromStr for FeedMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stream" => Ok(FeedMode::Stream),
            "poll" => Ok(FeedMode::Poll),
            _ => anyhow::bail!("Invalid MONITORING_MODE: {}. Must be 'stream' or 'poll'", s),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub mode: FeedMode,
    pub poll_interval: Duration,
    pub stale_threshold: Duration,
    pub reconnect_ceiling: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        let poll_interval = Duration::from_secs(10);
        Self {
            mode: FeedMode::Poll,
            poll_interval,
            stale_threshold: poll_interval * 2,
            reconnect_ceiling: Duration::from_secs(60),
        }
    }
}

/// Handle to one client's running feed task.
pub struct FeedHandle {
    task: JoinHandle<()>,
}

impl FeedHandle {
    pub fn cancel(&self) {
        self.task.abort();
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct FeedMultiplexer {
    directory: Arc<dyn UserDirectory>,
    events: EventSequence,
    config: FeedConfig,
}

impl FeedMultiplexer {
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        events: EventSequence,
        config: FeedConfig,
    ) -> Self {
        Self {
            directory,
            events,
            config,
        }
    }

    /// Start the feed for one client session. `last_known_balance` seeds
    /// duplicate suppression so an unchanged first observation stays quiet.
    pub fn spawn(
        &self,
        adapter: Arc<dyn ExchangeAdapter>,
        client_id: String,
        last_known_balance: Decimal,
        queue: Arc<ClientQueue>,
    ) -> FeedHandle {
        let directory = self.directory.clone();
        let events = self.events.clone();
        let config = self.config.clone();

        let task = tokio::spawn(async move {
            let mut feed = FeedWorker {
                adapter,
                directory,
                events,
                config,
                client_id,
                queue,
                last_emitted: last_known_balance,
            };
            feed.run().await;
        });

        FeedHandle { task }
    }
}

struct FeedWorker {
    adapter: Arc<dyn ExchangeAdapter>,
    directory: Arc<dyn UserDirectory>,
    events: EventSequence,
    config: FeedConfig,
    client_id: String,
    queue: Arc<ClientQueue>,
    last_emitted: Decimal,
}

enum StreamExit {
    Failover,
    ConsumerGone,
}

impl FeedWorker {
    async fn run(&mut self) {
        let use_stream =
            self.config.mode == FeedMode::Stream && self.adapter.supports_streaming();

        if use_stream {
            info!("FeedMultiplexer[{}]: Starting in streaming mode", self.client_id);
            match self.stream_loop().await {
                StreamExit::ConsumerGone => return,
                StreamExit::Failover => {
                    warn!(
                        "FeedMultiplexer[{}]: Stream faulted, failing over to polling for this session",
                        self.client_id
                    );
                }
            }
        } else {
            info!("FeedMultiplexer[{}]: Starting in polling mode", self.client_id);
        }

        self.poll_loop().await;
    }

    /// Emit a balance if it differs from the last emitted one. Returns
    /// false when the consumer is gone.
    async fn emit(&mut self, balance: Decimal, source: BalanceSource) -> bool {
        if balance == self.last_emitted {
            return true;
        }

        let update = BalanceUpdate {
            event_id: self.events.next_id(),
            client_id: self.client_id.clone(),
            venue: self.adapter.venue(),
            new_balance: balance,
            previous_balance: self.last_emitted,
            source,
            timestamp: Utc::now(),
        };
        self.last_emitted = balance;
        self.queue.push(update).await
    }

    async fn stream_loop(&mut self) -> StreamExit {
        let mut health =
            FeedHealthMonitor::new(&self.client_id, self.config.stale_threshold);
        let mut backoff = Duration::from_secs(1);

        loop {
            if self.queue.is_closed() {
                return StreamExit::ConsumerGone;
            }
            if !health.is_healthy() {
                return StreamExit::Failover;
            }

            let credentials = match self.directory.get_credentials(&self.client_id).await {
                Ok(credentials) => credentials,
                Err(e) => {
                    warn!(
                        "FeedMultiplexer[{}]: Credential fetch failed: {}",
                        self.client_id, e
                    );
                    self.reconnect_sleep(&mut backoff).await;
                    continue;
                }
            };

            let (sink, mut stream_rx) = mpsc::channel::<AccountStreamEvent>(64);
            let subscription = match self.adapter.stream_account(&credentials, sink).await {
                Ok(subscription) => subscription,
                Err(e) => {
                    warn!(
                        "FeedMultiplexer[{}]: Stream connect failed: {}",
                        self.client_id, e
                    );
                    self.reconnect_sleep(&mut backoff).await;
                    continue;
                }
            };
            drop(credentials);
            backoff = Duration::from_secs(1);
            health.record_event();

            loop {
                match timeout(self.config.stale_threshold, stream_rx.recv()).await {
                    Ok(Some(AccountStreamEvent::Balance { balance, .. })) => {
                        health.record_event();
                        if !self.emit(balance, BalanceSource::Stream).await {
                            return StreamExit::ConsumerGone;
                        }
                    }
                    Ok(Some(AccountStreamEvent::OrderUpdate { order_id, status })) => {
                        // Liveness signal only; balance deltas follow separately.
                        health.record_event();
                        debug!(
                            "FeedMultiplexer[{}]: Order {} -> {}",
                            self.client_id, order_id, status
                        );
                    }
                    Ok(Some(AccountStreamEvent::Disconnected)) | Ok(None) => {
                        info!(
                            "FeedMultiplexer[{}]: Stream disconnected, reconnecting",
                            self.client_id
                        );
                        break;
                    }
                    Err(_) => {
                        subscription.cancel();
                        return StreamExit::Failover;
                    }
                }
            }

            subscription.cancel();
            self.reconnect_sleep(&mut backoff).await;
        }
    }

    async fn reconnect_sleep(&self, backoff: &mut Duration) {
        let jitter = Duration::from_millis(rand::rng().random_range(0..250));
        tokio::time::sleep(*backoff + jitter).await;
        *backoff = (*backoff * 2).min(self.config.reconnect_ceiling);
    }

    async fn poll_loop(&mut self) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if self.queue.is_closed() {
                return;
            }

            let credentials = match self.directory.get_credentials(&self.client_id).await {
                Ok(credentials) => credentials,
                Err(e) => {
                    warn!(
                        "FeedMultiplexer[{}]: Credential fetch failed: {}",
                        self.client_id, e
                    );
                    continue;
                }
            };

            match self.adapter.get_balance(&credentials).await {
                Ok(balance) => {
                    if !self.emit(balance, BalanceSource::Poll).await {
                        return;
                    }
                }
                Err(e) => {
                    // The stale detector raises the alarm if this persists.
                    warn!(
                        "FeedMultiplexer[{}]: Poll failed: {}",
                        self.client_id, e
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::directory::InMemoryUserDirectory;
    use crate::infrastructure::mock::{MockExchange, test_credentials};
    use rust_decimal_macros::dec;

    async fn directory_with(client_id: &str) -> Arc<InMemoryUserDirectory> {
        use crate::domain::risk::RiskLimit;
        use crate::domain::types::ClientRecord;

        let directory = Arc::new(InMemoryUserDirectory::new());
        directory
            .register(
                ClientRecord {
                    client_id: client_id.to_string(),
                    venue: Venue::Futures,
                    initial_balance: dec!(10000),
                    daily_risk: RiskLimit::Absolute(dec!(200)),
                    max_risk: RiskLimit::Percentage(dec!(10)),
                },
                test_credentials(),
            )
            .await;
        directory
    }

    fn config(mode: FeedMode) -> FeedConfig {
        FeedConfig {
            mode,
            poll_interval: Duration::from_millis(20),
            stale_threshold: Duration::from_millis(200),
            reconnect_ceiling: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_poll_mode_emits_only_on_change() {
        let adapter = Arc::new(MockExchange::new(Venue::Futures, dec!(10000)));
        let directory = directory_with("c-1").await;
        let queue = Arc::new(ClientQueue::new(16));

        let mux = FeedMultiplexer::new(directory, EventSequence::default(), config(FeedMode::Poll));
        let _handle = mux.spawn(adapter.clone(), "c-1".to_string(), dec!(10000), queue.clone());

        // Unchanged balance: several ticks, no updates.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(queue.len().await, 0);

        adapter.set_balance(dec!(10050)).await;
        let update = timeout(Duration::from_secs(1), queue.pop())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(update.new_balance, dec!(10050));
        assert_eq!(update.previous_balance, dec!(10000));
        assert_eq!(update.source, BalanceSource::Poll);
    }

    #[tokio::test]
    async fn test_stream_mode_delivers_and_coalesces() {
        let adapter = Arc::new(MockExchange::new(Venue::Futures, dec!(10000)));
        let directory = directory_with("c-1").await;
        let queue = Arc::new(ClientQueue::new(16));

        let mux =
            FeedMultiplexer::new(directory, EventSequence::default(), config(FeedMode::Stream));
        let _handle = mux.spawn(adapter.clone(), "c-1".to_string(), dec!(10000), queue.clone());

        // Give the subscription a moment to attach.
        tokio::time::sleep(Duration::from_millis(50)).await;
        adapter.emit_stream_balance(dec!(9900)).await;
        adapter.emit_stream_balance(dec!(9900)).await; // coalesced
        adapter.emit_stream_balance(dec!(9800)).await;

        let first = timeout(Duration::from_secs(1), queue.pop())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.new_balance, dec!(9900));
        assert_eq!(first.source, BalanceSource::Stream);

        let second = timeout(Duration::from_secs(1), queue.pop())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.new_balance, dec!(9800));
        assert_eq!(second.previous_balance, dec!(9900));

        assert_eq!(queue.len().await, 0);
    }

    #[tokio::test]
    async fn test_silent_stream_fails_over_to_polling() {
        let adapter = Arc::new(MockExchange::new(Venue::Futures, dec!(10000)));
        let directory = directory_with("c-1").await;
        let queue = Arc::new(ClientQueue::new(16));

        let mux =
            FeedMultiplexer::new(directory, EventSequence::default(), config(FeedMode::Stream));
        let _handle = mux.spawn(adapter.clone(), "c-1".to_string(), dec!(10000), queue.clone());

        // Never emit on the stream; after the stale threshold the worker
        // must be polling and pick up the REST balance.
        adapter.set_balance(dec!(9500)).await;
        let update = timeout(Duration::from_secs(2), queue.pop())
            .await
            .expect("failover to polling did not happen")
            .unwrap();
        assert_eq!(update.new_balance, dec!(9500));
        assert_eq!(update.source, BalanceSource::Poll);
    }
}
