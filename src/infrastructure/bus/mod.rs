//! Durable notification fan-out.
//!
//! Publish order is fixed: structured audit log first, then the durable
//! history insert, then the in-process broadcast. Subscribers get
//! at-least-once semantics from the history table; the broadcast is a
//! best-effort live feed. Messages that exhaust their retry/TTL budget land
//! in the dead-letter table.

use crate::domain::events::{EventKind, NotificationEvent, Priority};
use crate::domain::ports::NotificationPublisher;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

const FANOUT_CAPACITY: usize = 1024;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);

pub struct NotificationBus {
    database: Database,
    fanout_tx: broadcast::Sender<NotificationEvent>,
    message_ttl: Duration,
    retry_max: u32,
}

impl NotificationBus {
    pub const DEFAULT_RETRY_MAX: u32 = 3;

    pub fn new(database: Database, message_ttl: Duration, retry_max: u32) -> Self {
        let (fanout_tx, _) = broadcast::channel(FANOUT_CAPACITY);
        Self {
            database,
            fanout_tx,
            message_ttl,
            retry_max,
        }
    }

    /// Live feed for delivery channels (email, chat, sockets). Receivers
    /// must tolerate reordering across publishers and lean on `event_id`.
    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.fanout_tx.subscribe()
    }

    /// The mandatory audit trail: violations and action outcomes hit the
    /// structured log before any durable or live delivery is attempted.
    fn audit(event: &NotificationEvent) {
        let auditable = matches!(
            event.event_type,
            EventKind::MaxRiskTriggered
                | EventKind::DailyRiskTriggered
                | EventKind::PositionClosed
                | EventKind::AccountBlocked
        ) || event.priority >= Priority::High;

        if auditable {
            info!(
                event_id = event.event_id,
                event_type = %event.event_type,
                client_id = %event.client_id,
                priority = %event.priority,
                payload = %event.payload,
                "NotificationBus: audit"
            );
        }
    }

    async fn persist(&self, event: &NotificationEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notification_history (event_id, record_id, event_type, client_id, priority, payload, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(event.event_id as i64)
        .bind(event.record_id.to_string())
        .bind(event.event_type.to_string())
        .bind(&event.client_id)
        .bind(event.priority.to_string())
        .bind(event.payload.to_string())
        .bind(event.timestamp)
        .execute(&self.database.pool)
        .await
        .context("Failed to persist notification")?;
        Ok(())
    }

    async fn dead_letter(&self, event: &NotificationEvent, failure: &str) {
        let result = sqlx::query(
            r#"
            INSERT INTO dead_letter (event_id, event_type, client_id, payload, failure, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.event_id as i64)
        .bind(event.event_type.to_string())
        .bind(&event.client_id)
        .bind(event.payload.to_string())
        .bind(failure)
        .bind(Utc::now())
        .execute(&self.database.pool)
        .await;

        if let Err(e) = result {
            // The audit log line above is the last line of defense here.
            error!(
                "NotificationBus: Dead-letter write failed for event {}: {}",
                event.event_id, e
            );
        } else {
            warn!(
                "NotificationBus: Event {} ({}) dead-lettered: {}",
                event.event_id, event.event_type, failure
            );
        }
    }

    pub async fn dead_letter_count(&self) -> Result<u64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM dead_letter")
            .fetch_one(&self.database.pool)
            .await
            .context("Failed to count dead letters")?;
        Ok(row.0 as u64)
    }
}

#[async_trait]
impl NotificationPublisher for NotificationBus {
    async fn publish(&self, event: NotificationEvent) -> Result<()> {
        Self::audit(&event);

        let deadline = Instant::now() + self.message_ttl;
        let mut delay = RETRY_BASE_DELAY;
        let mut last_failure = String::new();

        for attempt in 0..=self.retry_max {
            match self.persist(&event).await {
                Ok(()) => {
                    // Lagging or absent receivers are not a publish failure.
                    let _ = self.fanout_tx.send(event.clone());
                    return Ok(());
                }
                Err(e) => {
                    last_failure = e.to_string();
                    if attempt < self.retry_max && Instant::now() + delay < deadline {
                        warn!(
                            "NotificationBus: Persist attempt {} for event {} failed: {}",
                            attempt + 1,
                            event.event_id,
                            last_failure
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }

        self.dead_letter(&event, &last_failure).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn bus() -> NotificationBus {
        let database = Database::new("sqlite::memory:").await.unwrap();
        NotificationBus::new(database, Duration::from_secs(300), 3)
    }

    #[tokio::test]
    async fn test_publish_persists_and_fans_out() {
        let bus = bus().await;
        let mut rx = bus.subscribe();

        let event = NotificationEvent::monitoring_error(1, "c-1", "stale feed");
        bus.publish(event).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_id, 1);
        assert_eq!(received.event_type, EventKind::MonitoringError);

        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM notification_history")
            .fetch_one(&bus.database.pool)
            .await
            .unwrap();
        assert_eq!(row.0, 1);
    }

    #[tokio::test]
    async fn test_duplicate_event_id_dead_letters() {
        let bus = bus().await;

        let event = NotificationEvent::monitoring_error(7, "c-1", "first");
        bus.publish(event).await.unwrap();

        // Same event_id violates the history primary key on every retry.
        let duplicate = NotificationEvent::monitoring_error(7, "c-1", "second");
        bus.publish(duplicate).await.unwrap();

        assert_eq!(bus.dead_letter_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_succeeds() {
        let bus = bus().await;
        let event = NotificationEvent::monitoring_error(2, "c-2", "no listeners");
        bus.publish(event).await.unwrap();
    }
}
