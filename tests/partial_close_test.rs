//! Partial close handling: a position the venue refuses to close must not
//! stop the block from landing.

mod common;

use common::{CLIENT, engine_with_limits};
use riskguard::domain::account::AccountStatus;
use riskguard::domain::events::EventKind;
use riskguard::domain::risk::RiskLimit;
use riskguard::infrastructure::mock::position;
use rust_decimal_macros::dec;
use std::sync::atomic::Ordering;

#[tokio::test]
async fn test_partial_close_still_blocks_permanently() {
    let engine = engine_with_limits(
        dec!(10000),
        RiskLimit::Absolute(dec!(5000)),
        RiskLimit::Absolute(dec!(500)),
    )
    .await;

    engine
        .exchange
        .set_positions(vec![
            position("p-1", "BTCUSDT", dec!(0.5), dec!(40000)),
            position("p-2", "ETHUSDT", dec!(5), dec!(2500)),
            position("p-3", "SOLUSDT", dec!(100), dec!(150)),
        ])
        .await;
    engine
        .exchange
        .reject_positions(vec!["p-3".to_string()])
        .await;

    // Loss of 600 breaches the 500 max limit.
    engine.feed_sequence(&[dec!(9400)]).await;

    let state = engine.coordinator.status(CLIENT).await.unwrap();
    assert_eq!(state.status, AccountStatus::PermanentBlocked);

    let closed = engine
        .publisher
        .events_of_kind(EventKind::PositionClosed)
        .await;
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].payload["closedCount"], 2);
    assert_eq!(closed[0].payload["failedCount"], 1);
    assert_eq!(
        closed[0].payload["failedPositionIds"],
        serde_json::json!(["p-3"])
    );

    assert_eq!(engine.exchange.close_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_total_close_failure_still_blocks_and_alerts() {
    use riskguard::domain::errors::ExchangeError;

    let engine = engine_with_limits(
        dec!(10000),
        RiskLimit::Absolute(dec!(5000)),
        RiskLimit::Absolute(dec!(500)),
    )
    .await;
    engine
        .exchange
        .fail_close_with(Some(ExchangeError::AuthFailure("key revoked".into())))
        .await;

    engine.feed_sequence(&[dec!(9400)]).await;

    // The account breached its limit; it must be blocked even though the
    // venue never flattened it.
    let state = engine.coordinator.status(CLIENT).await.unwrap();
    assert_eq!(state.status, AccountStatus::PermanentBlocked);

    let errors = engine
        .publisher
        .events_of_kind(EventKind::MonitoringError)
        .await;
    assert_eq!(errors.len(), 1);
    assert!(
        errors[0].payload["detail"]
            .as_str()
            .unwrap()
            .contains("close-all-positions failed")
    );

    // Auth failures are not retried.
    assert_eq!(engine.exchange.close_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_transient_close_failure_is_retried() {
    use riskguard::domain::errors::ExchangeError;

    let engine = engine_with_limits(
        dec!(10000),
        RiskLimit::Absolute(dec!(5000)),
        RiskLimit::Absolute(dec!(500)),
    )
    .await;
    engine
        .exchange
        .fail_close_with(Some(ExchangeError::TransientNetwork("reset".into())))
        .await;

    engine.feed_sequence(&[dec!(9400)]).await;

    // Bounded retries: the default budget is three attempts.
    assert_eq!(engine.exchange.close_calls.load(Ordering::SeqCst), 3);

    let state = engine.coordinator.status(CLIENT).await.unwrap();
    assert_eq!(state.status, AccountStatus::PermanentBlocked);
}
