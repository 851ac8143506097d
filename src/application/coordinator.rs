//! Client lifecycle supervision and the per-client event loop.
//!
//! Every monitored client gets a bounded queue, a worker task draining it,
//! and a feed task filling it. All processing for one client is strictly
//! sequential: update -> store mutation -> evaluation -> enforcement -> low
//! priority notification. Clients never share ordering.

use crate::application::enforcement::ActionExecutor;
use crate::application::feed::{FeedHandle, FeedMultiplexer};
use crate::application::queue::ClientQueue;
use crate::domain::account::{AccountState, AccountStatus};
use crate::domain::errors::EngineError;
use crate::domain::events::{EventSequence, NotificationEvent};
use crate::domain::ports::{ExchangeAdapter, NotificationPublisher, UserDirectory};
use crate::domain::repositories::AccountStateStore;
use crate::domain::risk::{RiskLimits, evaluate};
use crate::domain::types::{BalanceSource, BalanceUpdate, Venue};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub queue_depth: usize,
    /// How long `stop_monitoring` waits for an in-flight enforcement run
    /// before dropping it.
    pub stop_grace: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            queue_depth: 64,
            stop_grace: Duration::from_secs(30),
        }
    }
}

/// Answer to the gateway's pre-order check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanTradeDecision {
    pub can_trade: bool,
    pub reason: Option<String>,
}

struct ClientSession {
    session_epoch: u64,
    queue: Arc<ClientQueue>,
    worker: JoinHandle<()>,
    feed: FeedHandle,
}

struct WorkerContext {
    store: Arc<dyn AccountStateStore>,
    directory: Arc<dyn UserDirectory>,
    executor: Arc<ActionExecutor>,
    publisher: Arc<dyn NotificationPublisher>,
    events: EventSequence,
}

pub struct Coordinator {
    store: Arc<dyn AccountStateStore>,
    directory: Arc<dyn UserDirectory>,
    adapters: HashMap<Venue, Arc<dyn ExchangeAdapter>>,
    executor: Arc<ActionExecutor>,
    publisher: Arc<dyn NotificationPublisher>,
    feed: FeedMultiplexer,
    events: EventSequence,
    config: CoordinatorConfig,
    sessions: Mutex<HashMap<String, ClientSession>>,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn AccountStateStore>,
        directory: Arc<dyn UserDirectory>,
        adapters: HashMap<Venue, Arc<dyn ExchangeAdapter>>,
        executor: Arc<ActionExecutor>,
        publisher: Arc<dyn NotificationPublisher>,
        feed: FeedMultiplexer,
        events: EventSequence,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            store,
            directory,
            adapters,
            executor,
            publisher,
            feed,
            events,
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Begin monitoring a registered client: create or revive its record,
    /// fence a new session epoch, and start feed + worker.
    pub async fn start_monitoring(&self, client_id: &str) -> Result<(), EngineError> {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(client_id) {
            return Err(EngineError::AlreadyMonitored {
                client_id: client_id.to_string(),
            });
        }

        let record = self
            .directory
            .get_client(client_id)
            .await
            .map_err(EngineError::Internal)?
            .ok_or_else(|| {
                EngineError::InvalidInput(format!("client {} is not registered", client_id))
            })?;

        let adapter = self.adapters.get(&record.venue).cloned().ok_or_else(|| {
            EngineError::InvalidInput(format!("no adapter for venue {}", record.venue))
        })?;

        let state = match self.store.load(client_id).await? {
            Some(existing) => {
                if existing.venue != record.venue {
                    return Err(EngineError::InvariantBroken {
                        client_id: client_id.to_string(),
                        detail: format!(
                            "venue mismatch: record says {}, store says {}",
                            record.venue, existing.venue
                        ),
                    });
                }
                self.store
                    .update(
                        client_id,
                        "monitoring session started",
                        Box::new(|s| s.begin_session(Utc::now())),
                    )
                    .await?
            }
            None => {
                let state = AccountState::new(
                    client_id,
                    record.venue,
                    record.initial_balance,
                    Utc::now(),
                );
                self.store.insert(&state).await?;
                state
            }
        };

        let queue = Arc::new(ClientQueue::new(self.config.queue_depth));
        let context = WorkerContext {
            store: self.store.clone(),
            directory: self.directory.clone(),
            executor: self.executor.clone(),
            publisher: self.publisher.clone(),
            events: self.events.clone(),
        };
        let worker = {
            let queue = queue.clone();
            tokio::spawn(async move { run_worker(context, queue).await })
        };

        let feed = self.feed.spawn(
            adapter,
            client_id.to_string(),
            state.current_balance,
            queue.clone(),
        );

        info!(
            "Coordinator: Monitoring started for {} (venue {}, epoch {})",
            client_id, state.venue, state.session_epoch
        );

        sessions.insert(
            client_id.to_string(),
            ClientSession {
                session_epoch: state.session_epoch,
                queue,
                worker,
                feed,
            },
        );
        Ok(())
    }

    /// Stop monitoring: cancel the feed immediately, drain the worker
    /// (letting an in-flight enforcement finish within the grace period),
    /// then mark the record inactive.
    pub async fn stop_monitoring(&self, client_id: &str) -> Result<(), EngineError> {
        let ClientSession {
            session_epoch,
            queue,
            mut worker,
            feed,
        } = {
            let mut sessions = self.sessions.lock().await;
            sessions
                .remove(client_id)
                .ok_or_else(|| EngineError::NotMonitored {
                    client_id: client_id.to_string(),
                })?
        };

        feed.cancel();
        queue.close();

        match tokio::time::timeout(self.config.stop_grace, &mut worker).await {
            Ok(_) => {}
            Err(_) => {
                error!(
                    "Coordinator: Worker for {} exceeded stop grace, dropping in-flight work",
                    client_id
                );
                worker.abort();
                self.executor.slots().purge(client_id, session_epoch).await;
                self.publisher
                    .publish(NotificationEvent::monitoring_error(
                        self.events.next_id(),
                        client_id,
                        "enforcement dropped at stop after grace period",
                    ))
                    .await
                    .unwrap_or_else(|e| {
                        warn!("Coordinator: Stop publish failed for {}: {}", client_id, e)
                    });
            }
        }

        self.store
            .update(
                client_id,
                "monitoring session stopped",
                Box::new(|s| s.end_session()),
            )
            .await?;

        let dropped = queue.dropped_duplicates();
        if dropped > 0 {
            info!(
                "Coordinator: Session for {} dropped {} duplicate update(s) under backpressure",
                client_id, dropped
            );
        }
        info!("Coordinator: Monitoring stopped for {}", client_id);
        Ok(())
    }

    /// Restart the session in place; used when limits change, since limits
    /// are immutable within a session epoch.
    pub async fn restart_monitoring(&self, client_id: &str) -> Result<(), EngineError> {
        self.stop_monitoring(client_id).await?;
        self.start_monitoring(client_id).await
    }

    pub async fn is_monitoring(&self, client_id: &str) -> bool {
        self.sessions.lock().await.contains_key(client_id)
    }

    /// Gateway contract: false iff the account is blocked or unknown.
    pub async fn can_trade(&self, client_id: &str) -> Result<CanTradeDecision, EngineError> {
        let state = self.store.load(client_id).await?;
        let decision = match state {
            None => CanTradeDecision {
                can_trade: false,
                reason: Some("NOT_MONITORED".to_string()),
            },
            Some(state) => match state.status {
                AccountStatus::PermanentBlocked => CanTradeDecision {
                    can_trade: false,
                    reason: Some("MAX_RISK".to_string()),
                },
                AccountStatus::DailyBlocked => CanTradeDecision {
                    can_trade: false,
                    reason: Some("DAILY_RISK".to_string()),
                },
                _ => CanTradeDecision {
                    can_trade: true,
                    reason: None,
                },
            },
        };
        Ok(decision)
    }

    pub async fn status(&self, client_id: &str) -> Result<AccountState, EngineError> {
        self.store
            .load(client_id)
            .await?
            .ok_or_else(|| EngineError::NotMonitored {
                client_id: client_id.to_string(),
            })
    }

    /// Inject a manual balance observation into the client's event loop.
    /// Used by admin tooling and tests; goes through the exact same path as
    /// feed updates.
    pub async fn inject_manual_balance(
        &self,
        client_id: &str,
        balance: Decimal,
    ) -> Result<(), EngineError> {
        let queue = {
            let sessions = self.sessions.lock().await;
            sessions
                .get(client_id)
                .map(|session| session.queue.clone())
                .ok_or_else(|| EngineError::NotMonitored {
                    client_id: client_id.to_string(),
                })?
        };

        let previous = self
            .store
            .load(client_id)
            .await?
            .map(|s| s.current_balance)
            .unwrap_or(Decimal::ZERO);

        let update = BalanceUpdate {
            event_id: self.events.next_id(),
            client_id: client_id.to_string(),
            venue: self
                .directory
                .get_client(client_id)
                .await
                .map_err(EngineError::Internal)?
                .map(|r| r.venue)
                .unwrap_or(Venue::Futures),
            new_balance: balance,
            previous_balance: previous,
            source: BalanceSource::Manual,
            timestamp: Utc::now(),
        };

        queue.push(update).await;
        Ok(())
    }

    /// Wait until a client's queue is drained and no enforcement run is in
    /// flight. Test and shutdown helper.
    pub async fn quiesce(&self, client_id: &str, patience: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + patience;
        loop {
            let queue_empty = {
                let sessions = self.sessions.lock().await;
                match sessions.get(client_id) {
                    Some(session) => session.queue.is_empty().await,
                    None => true,
                }
            };
            if queue_empty && !self.executor.slots().is_in_flight(client_id).await {
                // One extra poll: the worker may still be mid-item after
                // the queue emptied.
                tokio::time::sleep(Duration::from_millis(50)).await;
                let still_empty = {
                    let sessions = self.sessions.lock().await;
                    match sessions.get(client_id) {
                        Some(session) => session.queue.is_empty().await,
                        None => true,
                    }
                };
                if still_empty && !self.executor.slots().is_in_flight(client_id).await {
                    return true;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Stop every session; called on process shutdown.
    pub async fn shutdown(&self) {
        let client_ids: Vec<String> = {
            let sessions = self.sessions.lock().await;
            sessions.keys().cloned().collect()
        };
        for client_id in client_ids {
            if let Err(e) = self.stop_monitoring(&client_id).await {
                warn!("Coordinator: Shutdown stop for {} failed: {}", client_id, e);
            }
        }
    }
}

async fn run_worker(context: WorkerContext, queue: Arc<ClientQueue>) {
    while let Some(update) = queue.pop().await {
        let client_id = update.client_id.clone();
        match process_update(&context, &update).await {
            Ok(()) => {}
            Err(EngineError::InvariantBroken { client_id, detail }) => {
                // Refuse to keep processing a client whose state cannot be
                // trusted.
                error!(
                    "Coordinator: Invariant broken for {}: {}. Halting client loop",
                    client_id, detail
                );
                context
                    .publisher
                    .publish(NotificationEvent::system_event(
                        context.events.next_id(),
                        &client_id,
                        &format!("invariant broken: {}", detail),
                    ))
                    .await
                    .unwrap_or_else(|e| {
                        warn!("Coordinator: System event publish failed: {}", e)
                    });
                let _ = context
                    .store
                    .update(
                        &client_id,
                        &detail,
                        Box::new(|s| s.mark_monitoring_error()),
                    )
                    .await;
                break;
            }
            Err(e) => {
                warn!(
                    "Coordinator: Update processing failed for {}: {}",
                    client_id, e
                );
                let _ = context
                    .store
                    .update(
                        &client_id,
                        "update processing failed",
                        Box::new(|s| s.mark_monitoring_error()),
                    )
                    .await;
                context
                    .publisher
                    .publish(NotificationEvent::monitoring_error(
                        context.events.next_id(),
                        &client_id,
                        &e.to_string(),
                    ))
                    .await
                    .unwrap_or_else(|e| {
                        warn!("Coordinator: Error publish failed: {}", e)
                    });
            }
        }
    }
}

async fn process_update(context: &WorkerContext, update: &BalanceUpdate) -> Result<(), EngineError> {
    let record = context
        .directory
        .get_client(&update.client_id)
        .await
        .map_err(EngineError::Internal)?
        .ok_or_else(|| EngineError::NotMonitored {
            client_id: update.client_id.clone(),
        })?;

    let new_balance = update.new_balance;
    let observed_at = update.timestamp;
    let state = context
        .store
        .update(
            &update.client_id,
            "balance update",
            Box::new(move |s| {
                // Replaying the same balance only refreshes liveness; the
                // monetary fields are untouched.
                if s.current_balance != new_balance {
                    s.apply_balance(new_balance, observed_at);
                } else {
                    s.last_balance_update = Some(observed_at);
                }
                s.last_risk_check = Some(Utc::now());
            }),
        )
        .await?;

    state.check_invariants()?;

    let limits = RiskLimits {
        daily_risk: record.daily_risk,
        max_risk: record.max_risk,
    };
    let evaluation = evaluate(&state, &limits);

    if let Some(violation) = evaluation.violation() {
        context
            .executor
            .enforce(
                &update.client_id,
                state.venue,
                state.session_epoch,
                violation,
                &evaluation,
            )
            .await;
    } else {
        apply_warning_transition(context, &state, evaluation.warning).await?;
    }

    context
        .publisher
        .publish(NotificationEvent::balance_update(
            context.events.next_id(),
            update,
        ))
        .await
        .map_err(EngineError::Internal)?;

    Ok(())
}

/// Move between Normal/Warning (and recover from MonitoringError) on a
/// clean evaluation. Blocks are never touched here.
async fn apply_warning_transition(
    context: &WorkerContext,
    state: &AccountState,
    warning: bool,
) -> Result<(), EngineError> {
    let desired = if warning {
        AccountStatus::Warning
    } else {
        AccountStatus::Normal
    };

    let transition_allowed = matches!(
        state.status,
        AccountStatus::Normal | AccountStatus::Warning | AccountStatus::MonitoringError
    );
    if !transition_allowed || state.status == desired {
        return Ok(());
    }

    let reason = if warning {
        "warning threshold crossed"
    } else {
        "warning cleared"
    };
    context
        .store
        .update(
            &state.client_id,
            reason,
            Box::new(move |s| {
                if matches!(
                    s.status,
                    AccountStatus::Normal | AccountStatus::Warning | AccountStatus::MonitoringError
                ) {
                    s.status = desired;
                }
            }),
        )
        .await?;
    Ok(())
}
