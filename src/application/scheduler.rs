//! Time-driven maintenance: the daily reset and the stale-feed detector.
//!
//! Daily reset semantics are cron-like with catch-up: if the process was
//! down at the boundary, the reset runs once at startup for the day that
//! already passed. The reset itself is idempotent within a day because the
//! reset query only returns accounts whose `daily_reset_at` predates the
//! boundary.

use crate::domain::account::AccountStatus;
use crate::domain::events::{EventSequence, NotificationEvent};
use crate::domain::ports::NotificationPublisher;
use crate::domain::repositories::AccountStateStore;
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Wall-clock UTC instant of the daily reset.
    pub reset_time: NaiveTime,
    pub stale_check_interval: Duration,
    pub stale_threshold: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reset_time: NaiveTime::from_hms_opt(0, 1, 0).expect("valid reset time"),
            stale_check_interval: Duration::from_secs(30),
            stale_threshold: Duration::from_secs(20),
        }
    }
}

pub struct SchedulerHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn shutdown(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub struct Scheduler {
    store: Arc<dyn AccountStateStore>,
    publisher: Arc<dyn NotificationPublisher>,
    events: EventSequence,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn AccountStateStore>,
        publisher: Arc<dyn NotificationPublisher>,
        events: EventSequence,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            events,
            config,
        }
    }

    pub fn start(self: Arc<Self>) -> SchedulerHandle {
        let reset = {
            let scheduler = self.clone();
            tokio::spawn(async move { scheduler.daily_reset_loop().await })
        };
        let stale = {
            let scheduler = self;
            tokio::spawn(async move { scheduler.stale_scan_loop().await })
        };
        SchedulerHandle {
            tasks: vec![reset, stale],
        }
    }

    /// The boundary for the day containing `now`.
    fn boundary_for(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.date_naive()
            .and_time(self.config.reset_time)
            .and_utc()
    }

    async fn daily_reset_loop(&self) {
        // Catch-up: if today's window already passed, run it once now.
        let now = Utc::now();
        let today_boundary = self.boundary_for(now);
        if now >= today_boundary {
            info!("Scheduler: Running startup catch-up reset for boundary {}", today_boundary);
            self.run_daily_reset(today_boundary).await;
        }

        let mut next_boundary = if now >= today_boundary {
            today_boundary + ChronoDuration::days(1)
        } else {
            today_boundary
        };

        loop {
            let now = Utc::now();
            if let Ok(sleep_for) = (next_boundary - now).to_std() {
                tokio::time::sleep(sleep_for).await;
            }

            info!("Scheduler: Daily reset boundary {} reached", next_boundary);
            self.run_daily_reset(next_boundary).await;
            next_boundary += ChronoDuration::days(1);
        }
    }

    /// Apply the reset to every account due at `cutoff`. Returns how many
    /// accounts were touched.
    pub async fn run_daily_reset(&self, cutoff: DateTime<Utc>) -> usize {
        let accounts = match self.store.query_needing_daily_reset(cutoff).await {
            Ok(accounts) => accounts,
            Err(e) => {
                error!("Scheduler: Daily reset query failed: {}", e);
                return 0;
            }
        };

        let mut touched = 0;
        for account in accounts {
            if account.status == AccountStatus::PermanentBlocked {
                continue;
            }

            let updated = self
                .store
                .update(
                    &account.client_id,
                    "daily reset",
                    Box::new(|s| s.apply_daily_reset(Utc::now())),
                )
                .await;

            match updated {
                Ok(updated) => {
                    touched += 1;
                    self.publisher
                        .publish(NotificationEvent::daily_reset(
                            self.events.next_id(),
                            &updated.client_id,
                            updated.daily_start_balance,
                        ))
                        .await
                        .unwrap_or_else(|e| {
                            warn!("Scheduler: Reset publish failed for {}: {}", updated.client_id, e)
                        });
                }
                Err(e) => {
                    error!(
                        "Scheduler: Daily reset failed for {}: {}",
                        account.client_id, e
                    );
                }
            }
        }

        if touched > 0 {
            info!("Scheduler: Daily reset applied to {} account(s)", touched);
        }
        touched
    }

    async fn stale_scan_loop(&self) {
        // client_id -> last_balance_update at notification time; one
        // notification per stall window.
        let mut notified: HashMap<String, Option<DateTime<Utc>>> = HashMap::new();
        let mut ticker = tokio::time::interval(self.config.stale_check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.scan_stale_once(&mut notified).await;
        }
    }

    /// One stale sweep. No state mutation: a stalled feed is an alerting
    /// concern, and recovery clears itself on the next sweep.
    pub async fn scan_stale_once(
        &self,
        notified: &mut HashMap<String, Option<DateTime<Utc>>>,
    ) -> usize {
        let threshold = Utc::now()
            - ChronoDuration::from_std(self.config.stale_threshold)
                .unwrap_or_else(|_| ChronoDuration::seconds(20));

        let stale = match self.store.query_stale(threshold).await {
            Ok(stale) => stale,
            Err(e) => {
                error!("Scheduler: Stale query failed: {}", e);
                return 0;
            }
        };

        let stale_ids: std::collections::HashSet<String> =
            stale.iter().map(|s| s.client_id.clone()).collect();
        notified.retain(|client_id, _| stale_ids.contains(client_id));

        let mut emitted = 0;
        for account in stale {
            let window = account.last_balance_update;
            if notified.get(&account.client_id) == Some(&window) {
                continue; // already notified for this stall window
            }

            warn!(
                "Scheduler: Feed for {} is stale (last update: {:?})",
                account.client_id, window
            );
            self.publisher
                .publish(NotificationEvent::monitoring_error(
                    self.events.next_id(),
                    &account.client_id,
                    &format!(
                        "no balance update since {}",
                        window
                            .map(|t| t.to_rfc3339())
                            .unwrap_or_else(|| "session start".to_string())
                    ),
                ))
                .await
                .unwrap_or_else(|e| {
                    warn!(
                        "Scheduler: Stale publish failed for {}: {}",
                        account.client_id, e
                    )
                });

            notified.insert(account.client_id, window);
            emitted += 1;
        }
        emitted
    }
}
