//! End-to-end monitoring scenarios: steady state, daily trigger, and
//! max-risk precedence.

mod common;

use common::{CLIENT, engine, engine_with_limits};
use riskguard::domain::account::AccountStatus;
use riskguard::domain::events::{EventKind, Priority};
use rust_decimal_macros::dec;
use std::sync::atomic::Ordering;

#[tokio::test]
async fn test_steady_state_produces_no_risk_actions() {
    let engine = engine().await;
    engine
        .feed_sequence(&[dec!(10000), dec!(10050), dec!(9990), dec!(10010)])
        .await;

    let state = engine.coordinator.status(CLIENT).await.unwrap();
    assert_eq!(state.status, AccountStatus::Normal);
    assert_eq!(state.current_balance, dec!(10010));
    assert_eq!(state.daily_pnl(), dec!(10));
    assert_eq!(state.total_pnl(), dec!(10));

    assert!(
        engine
            .publisher
            .events_of_kind(EventKind::DailyRiskTriggered)
            .await
            .is_empty()
    );
    assert!(
        engine
            .publisher
            .events_of_kind(EventKind::MaxRiskTriggered)
            .await
            .is_empty()
    );
    assert_eq!(engine.exchange.close_calls.load(Ordering::SeqCst), 0);

    // Every non-duplicate update produced a lightweight notification.
    let balance_events = engine
        .publisher
        .events_of_kind(EventKind::BalanceUpdate)
        .await;
    assert_eq!(balance_events.len(), 4);
    assert!(balance_events.iter().all(|e| e.priority == Priority::Low));
}

#[tokio::test]
async fn test_daily_loss_triggers_close_and_daily_block() {
    let engine = engine().await;
    engine
        .feed_sequence(&[dec!(10000), dec!(9900), dec!(9799)])
        .await;

    let state = engine.coordinator.status(CLIENT).await.unwrap();
    assert_eq!(state.status, AccountStatus::DailyBlocked);
    assert!(state.daily_blocked_at.is_some());

    let reason = state.daily_block_reason.expect("block reason recorded");
    assert!(reason.contains("loss=201"), "reason was: {}", reason);
    assert!(reason.contains("limit=200"), "reason was: {}", reason);

    assert_eq!(engine.exchange.close_calls.load(Ordering::SeqCst), 1);

    let triggered = engine
        .publisher
        .events_of_kind(EventKind::DailyRiskTriggered)
        .await;
    assert_eq!(triggered.len(), 1);
    assert_eq!(triggered[0].priority, Priority::High);
    assert_eq!(triggered[0].payload["loss"], serde_json::json!("201"));
    assert!(
        engine
            .publisher
            .events_of_kind(EventKind::MaxRiskTriggered)
            .await
            .is_empty()
    );
}

#[tokio::test]
async fn test_max_risk_outranks_daily_risk() {
    use riskguard::domain::risk::RiskLimit;

    let engine = engine_with_limits(
        dec!(10000),
        RiskLimit::Absolute(dec!(100)),
        RiskLimit::Absolute(dec!(500)),
    )
    .await;
    engine.feed_sequence(&[dec!(10000), dec!(9400)]).await;

    let state = engine.coordinator.status(CLIENT).await.unwrap();
    assert_eq!(state.status, AccountStatus::PermanentBlocked);
    assert!(state.permanent_blocked_at.is_some());

    let max_events = engine
        .publisher
        .events_of_kind(EventKind::MaxRiskTriggered)
        .await;
    assert_eq!(max_events.len(), 1);
    assert_eq!(max_events[0].priority, Priority::Critical);

    // Both thresholds were breached; only the severer action fires.
    assert!(
        engine
            .publisher
            .events_of_kind(EventKind::DailyRiskTriggered)
            .await
            .is_empty()
    );
    assert_eq!(engine.exchange.close_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_threshold_boundary_is_inclusive() {
    let engine = engine().await;
    // Loss of exactly 200 equals the daily limit.
    engine.feed_sequence(&[dec!(9800)]).await;

    let state = engine.coordinator.status(CLIENT).await.unwrap();
    assert_eq!(state.status, AccountStatus::DailyBlocked);
}

#[tokio::test]
async fn test_warning_status_below_threshold() {
    let engine = engine().await;
    // Daily loss 160 = 80% of the 200 limit.
    engine.feed_sequence(&[dec!(9840)]).await;
    let state = engine.coordinator.status(CLIENT).await.unwrap();
    assert_eq!(state.status, AccountStatus::Warning);

    // Recovery clears the warning.
    engine.feed_sequence(&[dec!(9950)]).await;
    let state = engine.coordinator.status(CLIENT).await.unwrap();
    assert_eq!(state.status, AccountStatus::Normal);
}
