//! Stale-feed detection: one alert per stall window, no state mutation,
//! automatic clearing when updates resume.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::{CLIENT, engine};
use riskguard::application::scheduler::{Scheduler, SchedulerConfig};
use riskguard::domain::account::AccountStatus;
use riskguard::domain::events::EventKind;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::time::Duration;

fn scheduler_for(engine: &common::TestEngine) -> Scheduler {
    Scheduler::new(
        engine.store.clone(),
        engine.publisher.clone(),
        engine.events.clone(),
        SchedulerConfig {
            stale_threshold: Duration::from_secs(60),
            ..Default::default()
        },
    )
}

#[tokio::test]
async fn test_stalled_feed_alerts_once_per_window() {
    let engine = engine().await;
    let stalled_at = Utc::now() - ChronoDuration::minutes(5);

    engine
        .store
        .update(
            CLIENT,
            "seed stalled feed",
            Box::new(move |s| s.last_balance_update = Some(stalled_at)),
        )
        .await
        .unwrap();

    let scheduler = scheduler_for(&engine);
    let mut notified = HashMap::new();

    assert_eq!(scheduler.scan_stale_once(&mut notified).await, 1);
    // Same stall window: no repeat alert.
    assert_eq!(scheduler.scan_stale_once(&mut notified).await, 0);
    assert_eq!(scheduler.scan_stale_once(&mut notified).await, 0);

    let errors = engine
        .publisher
        .events_of_kind(EventKind::MonitoringError)
        .await;
    assert_eq!(errors.len(), 1);

    // Alerting never mutates the account.
    let state = engine.coordinator.status(CLIENT).await.unwrap();
    assert_eq!(state.status, AccountStatus::Normal);
}

#[tokio::test]
async fn test_recovered_feed_clears_and_can_alert_again() {
    let engine = engine().await;
    let scheduler = scheduler_for(&engine);
    let mut notified = HashMap::new();

    let first_stall = Utc::now() - ChronoDuration::minutes(5);
    engine
        .store
        .update(
            CLIENT,
            "seed stalled feed",
            Box::new(move |s| s.last_balance_update = Some(first_stall)),
        )
        .await
        .unwrap();
    assert_eq!(scheduler.scan_stale_once(&mut notified).await, 1);

    // Feed resumes: the account leaves the stale set and the dedupe entry
    // clears with it.
    engine.feed_balance(dec!(10001)).await;
    assert_eq!(scheduler.scan_stale_once(&mut notified).await, 0);
    assert!(notified.is_empty());

    // A later, distinct stall alerts again.
    let second_stall = Utc::now() - ChronoDuration::minutes(3);
    engine
        .store
        .update(
            CLIENT,
            "seed second stall",
            Box::new(move |s| s.last_balance_update = Some(second_stall)),
        )
        .await
        .unwrap();
    assert_eq!(scheduler.scan_stale_once(&mut notified).await, 1);

    let errors = engine
        .publisher
        .events_of_kind(EventKind::MonitoringError)
        .await;
    assert_eq!(errors.len(), 2);
}

#[tokio::test]
async fn test_inactive_accounts_are_not_scanned() {
    let engine = engine().await;
    let stalled_at = Utc::now() - ChronoDuration::minutes(5);

    engine
        .store
        .update(
            CLIENT,
            "seed stalled feed",
            Box::new(move |s| s.last_balance_update = Some(stalled_at)),
        )
        .await
        .unwrap();
    engine.coordinator.stop_monitoring(CLIENT).await.unwrap();

    let scheduler = scheduler_for(&engine);
    let mut notified = HashMap::new();
    assert_eq!(scheduler.scan_stale_once(&mut notified).await, 0);
}
