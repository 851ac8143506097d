//! The single notification schema published by the engine.
//!
//! Every event the bus carries is a `NotificationEvent`; there is exactly one
//! kind enumeration and one set of constructors.

use crate::domain::risk::ViolationType;
use crate::domain::types::{ActionOutcome, BalanceUpdate, Venue};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    MaxRiskTriggered,
    DailyRiskTriggered,
    BalanceUpdate,
    MonitoringError,
    PositionClosed,
    AccountBlocked,
    DailyReset,
    SystemEvent,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::MaxRiskTriggered => "MAX_RISK_TRIGGERED",
            EventKind::DailyRiskTriggered => "DAILY_RISK_TRIGGERED",
            EventKind::BalanceUpdate => "BALANCE_UPDATE",
            EventKind::MonitoringError => "MONITORING_ERROR",
            EventKind::PositionClosed => "POSITION_CLOSED",
            EventKind::AccountBlocked => "ACCOUNT_BLOCKED",
            EventKind::DailyReset => "DAILY_RESET",
            EventKind::SystemEvent => "SYSTEM_EVENT",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Low => "LOW",
            Priority::Normal => "NORMAL",
            Priority::High => "HIGH",
            Priority::Critical => "CRITICAL",
        };
        write!(f, "{}", s)
    }
}

/// Wire format: `{eventId, eventType, clientId, priority, timestamp, payload}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub event_id: u64,
    /// Stable record id for the notification history.
    pub record_id: Uuid,
    pub event_type: EventKind,
    pub client_id: String,
    pub priority: Priority,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl NotificationEvent {
    fn new(
        event_id: u64,
        event_type: EventKind,
        client_id: impl Into<String>,
        priority: Priority,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id,
            record_id: Uuid::new_v4(),
            event_type,
            client_id: client_id.into(),
            priority,
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn balance_update(event_id: u64, update: &BalanceUpdate) -> Self {
        Self::new(
            event_id,
            EventKind::BalanceUpdate,
            update.client_id.clone(),
            Priority::Low,
            serde_json::json!({
                "venue": update.venue,
                "newBalance": update.new_balance,
                "previousBalance": update.previous_balance,
                "source": update.source,
            }),
        )
    }

    pub fn risk_violation(
        event_id: u64,
        client_id: &str,
        venue: Venue,
        violation: ViolationType,
        loss: Decimal,
        threshold: Decimal,
    ) -> Self {
        let (kind, priority) = match violation {
            ViolationType::MaxRisk => (EventKind::MaxRiskTriggered, Priority::Critical),
            ViolationType::DailyRisk => (EventKind::DailyRiskTriggered, Priority::High),
        };
        Self::new(
            event_id,
            kind,
            client_id,
            priority,
            serde_json::json!({
                "venue": venue,
                "violationType": violation,
                "loss": loss,
                "threshold": threshold,
            }),
        )
    }

    pub fn position_closed(
        event_id: u64,
        client_id: &str,
        venue: Venue,
        outcome: &ActionOutcome,
    ) -> Self {
        let priority = if outcome.is_complete() {
            Priority::Normal
        } else {
            Priority::High
        };
        Self::new(
            event_id,
            EventKind::PositionClosed,
            client_id,
            priority,
            serde_json::json!({
                "venue": venue,
                "closedCount": outcome.closed_count(),
                "failedCount": outcome.failed_count(),
                "closedPositionIds": outcome.closed_position_ids,
                "failedPositionIds": outcome.failed_position_ids,
                "cancelledOrders": outcome.cancelled_orders,
                "totalClosedValue": outcome.total_closed_value,
            }),
        )
    }

    pub fn account_blocked(
        event_id: u64,
        client_id: &str,
        venue: Venue,
        violation: ViolationType,
        reason: &str,
    ) -> Self {
        let priority = match violation {
            ViolationType::MaxRisk => Priority::Critical,
            ViolationType::DailyRisk => Priority::High,
        };
        Self::new(
            event_id,
            EventKind::AccountBlocked,
            client_id,
            priority,
            serde_json::json!({
                "venue": venue,
                "violationType": violation,
                "reason": reason,
            }),
        )
    }

    pub fn monitoring_error(event_id: u64, client_id: &str, detail: &str) -> Self {
        Self::new(
            event_id,
            EventKind::MonitoringError,
            client_id,
            Priority::High,
            serde_json::json!({ "detail": detail }),
        )
    }

    pub fn daily_reset(event_id: u64, client_id: &str, new_daily_start: Decimal) -> Self {
        Self::new(
            event_id,
            EventKind::DailyReset,
            client_id,
            Priority::Normal,
            serde_json::json!({ "dailyStartBalance": new_daily_start }),
        )
    }

    pub fn system_event(event_id: u64, client_id: &str, detail: &str) -> Self {
        Self::new(
            event_id,
            EventKind::SystemEvent,
            client_id,
            Priority::Critical,
            serde_json::json!({ "detail": detail }),
        )
    }
}

/// Process-wide monotonic event id source.
///
/// Seeded from the persisted high-water mark on startup so ids keep
/// increasing across restarts.
#[derive(Clone)]
pub struct EventSequence {
    next: Arc<AtomicU64>,
}

impl EventSequence {
    pub fn starting_at(next: u64) -> Self {
        Self {
            next: Arc::new(AtomicU64::new(next)),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for EventSequence {
    fn default() -> Self {
        Self::starting_at(1)
    }
}
