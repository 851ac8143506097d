//! Violation enforcement workflow.
//!
//! A run walks Initiated -> Closing -> Blocking -> Publishing and must be
//! idempotent: the slot registry fences concurrent runs, and an account
//! already blocked at equal or higher severity short-circuits to Done.
//! Closing failures never abort the block; a blocked account that still
//! holds positions is safer than a tradable one that breached its limit.

use crate::application::enforcement::action_slots::ActionSlotRegistry;
use crate::domain::account::AccountStatus;
use crate::domain::errors::ExchangeError;
use crate::domain::events::{EventSequence, NotificationEvent};
use crate::domain::ports::{ExchangeAdapter, NotificationPublisher, UserDirectory};
use crate::domain::repositories::AccountStateStore;
use crate::domain::risk::{Evaluation, ViolationType};
use crate::domain::types::{ActionOutcome, Venue};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct EnforcementConfig {
    pub close_retry_max: u32,
    pub retry_base_delay: Duration,
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            close_retry_max: 3,
            retry_base_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcementResult {
    /// Workflow ran to completion and the block is committed.
    Completed,
    /// An equal-or-higher-severity block was already recorded this session.
    AlreadyDone,
    /// Another run holds the client's slot right now.
    InFlight,
    Failed,
}

pub struct ActionExecutor {
    adapters: HashMap<Venue, Arc<dyn ExchangeAdapter>>,
    directory: Arc<dyn UserDirectory>,
    store: Arc<dyn AccountStateStore>,
    publisher: Arc<dyn NotificationPublisher>,
    slots: Arc<ActionSlotRegistry>,
    events: EventSequence,
    config: EnforcementConfig,
}

impl ActionExecutor {
    pub fn new(
        adapters: HashMap<Venue, Arc<dyn ExchangeAdapter>>,
        directory: Arc<dyn UserDirectory>,
        store: Arc<dyn AccountStateStore>,
        publisher: Arc<dyn NotificationPublisher>,
        slots: Arc<ActionSlotRegistry>,
        events: EventSequence,
        config: EnforcementConfig,
    ) -> Self {
        Self {
            adapters,
            directory,
            store,
            publisher,
            slots,
            events,
            config,
        }
    }

    pub fn slots(&self) -> Arc<ActionSlotRegistry> {
        self.slots.clone()
    }

    /// Drive the close-and-block workflow for one violation.
    pub async fn enforce(
        &self,
        client_id: &str,
        venue: Venue,
        session_epoch: u64,
        violation: ViolationType,
        evaluation: &Evaluation,
    ) -> EnforcementResult {
        let state = match self.store.load(client_id).await {
            Ok(Some(state)) => state,
            Ok(None) => {
                error!("ActionExecutor[{}]: No monitoring record, refusing to act", client_id);
                return EnforcementResult::Failed;
            }
            Err(e) => {
                error!("ActionExecutor[{}]: State load failed: {}", client_id, e);
                return EnforcementResult::Failed;
            }
        };

        // Idempotence: a recorded block of equal or higher severity means
        // this violation was already enforced.
        match (state.status, violation) {
            (AccountStatus::PermanentBlocked, _) => return EnforcementResult::AlreadyDone,
            (AccountStatus::DailyBlocked, ViolationType::DailyRisk) => {
                return EnforcementResult::AlreadyDone;
            }
            _ => {}
        }

        if !self.slots.try_acquire(client_id, session_epoch).await {
            info!(
                "ActionExecutor[{}]: Enforcement already in flight for epoch {}",
                client_id, session_epoch
            );
            return EnforcementResult::InFlight;
        }

        let result = self
            .run_workflow(client_id, venue, violation, evaluation)
            .await;
        self.slots.release(client_id, session_epoch).await;
        result
    }

    async fn run_workflow(
        &self,
        client_id: &str,
        venue: Venue,
        violation: ViolationType,
        evaluation: &Evaluation,
    ) -> EnforcementResult {
        let (loss, threshold) = match violation {
            ViolationType::MaxRisk => (
                evaluation.current_loss,
                evaluation.max_threshold.unwrap_or(Decimal::ZERO),
            ),
            ViolationType::DailyRisk => (
                evaluation.daily_loss,
                evaluation.daily_threshold.unwrap_or(Decimal::ZERO),
            ),
        };

        info!(
            "ActionExecutor[{}]: {} violation initiated (loss={}, threshold={})",
            client_id, violation, loss, threshold
        );

        // Closing. Credentials live exactly as long as this step.
        let (outcome, close_failure) = self.close_positions(client_id, venue).await;

        // Blocking. A partial or failed close never aborts this step.
        let reason = format!("{}: loss={} limit={}", violation, loss, threshold);
        let block_reason = reason.clone();
        let committed = self
            .store
            .update(
                client_id,
                &reason,
                Box::new(move |s| {
                    let now = Utc::now();
                    match violation {
                        ViolationType::MaxRisk => s.block_permanent(block_reason.clone(), now),
                        ViolationType::DailyRisk => s.block_daily(block_reason.clone(), now),
                    }
                }),
            )
            .await;

        if let Err(e) = committed {
            error!(
                "ActionExecutor[{}]: Block commit failed after retries: {}",
                client_id, e
            );
            self.escalate(client_id, &format!("block commit failed: {}", e))
                .await;
            return EnforcementResult::Failed;
        }

        // Publishing. The bus wrote the audit line before any fan-out.
        self.publisher
            .publish(NotificationEvent::risk_violation(
                self.events.next_id(),
                client_id,
                venue,
                violation,
                loss,
                threshold,
            ))
            .await
            .unwrap_or_else(|e| warn!("ActionExecutor[{}]: Violation publish failed: {}", client_id, e));

        self.publisher
            .publish(NotificationEvent::position_closed(
                self.events.next_id(),
                client_id,
                venue,
                &outcome,
            ))
            .await
            .unwrap_or_else(|e| warn!("ActionExecutor[{}]: Outcome publish failed: {}", client_id, e));

        self.publisher
            .publish(NotificationEvent::account_blocked(
                self.events.next_id(),
                client_id,
                venue,
                violation,
                &reason,
            ))
            .await
            .unwrap_or_else(|e| warn!("ActionExecutor[{}]: Block publish failed: {}", client_id, e));

        if let Some(failure) = close_failure {
            // The block stands; the unclosed exposure still needs eyes.
            self.publisher
                .publish(NotificationEvent::monitoring_error(
                    self.events.next_id(),
                    client_id,
                    &format!("close-all-positions failed: {}", failure),
                ))
                .await
                .unwrap_or_else(|e| {
                    warn!("ActionExecutor[{}]: Error publish failed: {}", client_id, e)
                });
        }

        info!("ActionExecutor[{}]: {} enforcement complete", client_id, violation);
        EnforcementResult::Completed
    }

    /// Close everything, retrying transient venue errors with bounded
    /// backoff. Terminal errors yield an empty outcome plus the failure.
    async fn close_positions(
        &self,
        client_id: &str,
        venue: Venue,
    ) -> (ActionOutcome, Option<ExchangeError>) {
        let adapter = match self.adapters.get(&venue) {
            Some(adapter) => adapter.clone(),
            None => {
                return (
                    ActionOutcome::default(),
                    Some(ExchangeError::Unknown(format!(
                        "no adapter registered for venue {}",
                        venue
                    ))),
                );
            }
        };

        let credentials = match self.directory.get_credentials(client_id).await {
            Ok(credentials) => credentials,
            Err(e) => {
                return (
                    ActionOutcome::default(),
                    Some(ExchangeError::AuthFailure(format!(
                        "credential fetch failed: {}",
                        e
                    ))),
                );
            }
        };

        let mut delay = self.config.retry_base_delay;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match adapter.close_all_positions(&credentials).await {
                Ok(outcome) => {
                    if !outcome.is_complete() {
                        warn!(
                            "ActionExecutor[{}]: Partial close: {} closed, {} failed",
                            client_id,
                            outcome.closed_count(),
                            outcome.failed_count()
                        );
                    }
                    return (outcome, None);
                }
                Err(e) if e.is_retryable() && attempt < self.config.close_retry_max => {
                    warn!(
                        "ActionExecutor[{}]: Close attempt {} failed ({}), retrying in {:?}",
                        client_id, attempt, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => {
                    error!(
                        "ActionExecutor[{}]: Close failed terminally after {} attempt(s): {}",
                        client_id, attempt, e
                    );
                    return (ActionOutcome::default(), Some(e));
                }
            }
        }
    }

    /// A failure the workflow cannot absorb: flag the record (without
    /// disturbing an existing block) and notify.
    async fn escalate(&self, client_id: &str, detail: &str) {
        let mark = self
            .store
            .update(
                client_id,
                detail,
                Box::new(|s| s.mark_monitoring_error()),
            )
            .await;
        if let Err(e) = mark {
            error!(
                "ActionExecutor[{}]: Could not record monitoring error: {}",
                client_id, e
            );
        }

        self.publisher
            .publish(NotificationEvent::monitoring_error(
                self.events.next_id(),
                client_id,
                detail,
            ))
            .await
            .unwrap_or_else(|e| warn!("ActionExecutor[{}]: Error publish failed: {}", client_id, e));
    }
}
