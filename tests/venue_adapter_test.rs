//! Venue adapter tests against a local mock venue.
//!
//! The mock venue is a real HTTP server, so these cover the whole REST
//! path: signing headers, typed decoding, the error taxonomy mapping, and
//! the close-all order flow.

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use riskguard::domain::errors::ExchangeError;
use riskguard::domain::ports::ExchangeAdapter;
use riskguard::domain::types::Credentials;
use riskguard::infrastructure::exchange::{FuturesVenueAdapter, SpotVenueAdapter};
use rust_decimal_macros::dec;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct VenueState {
    orders: Mutex<Vec<serde_json::Value>>,
    cancelled: Mutex<Vec<String>>,
}

fn creds() -> Credentials {
    Credentials::new("venue-key", "venue-secret")
}

fn signed(headers: &HeaderMap) -> bool {
    headers.contains_key("X-API-KEY")
        && headers.contains_key("X-API-NONCE")
        && headers.contains_key("X-API-SIGNATURE")
}

async fn futures_venue() -> (SocketAddr, Arc<VenueState>) {
    let state = Arc::new(VenueState::default());

    async fn balance(headers: HeaderMap) -> impl IntoResponse {
        if !signed(&headers) {
            return (
                StatusCode::UNAUTHORIZED,
                "missing signature".to_string(),
            )
                .into_response();
        }
        if headers
            .get("X-API-KEY")
            .is_some_and(|k| k.as_bytes() == b"revoked-key")
        {
            return (StatusCode::FORBIDDEN, "key revoked".to_string()).into_response();
        }
        axum::Json(serde_json::json!({"totalEquity": "10250.75"})).into_response()
    }

    async fn positions() -> impl IntoResponse {
        axum::Json(serde_json::json!([
            {"positionId": "p-1", "symbol": "BTCUSDT", "side": "LONG",
             "qty": "0.5", "entryPrice": "40000"},
            {"positionId": "p-2", "symbol": "ETHUSDT", "side": "SHORT",
             "qty": "4", "entryPrice": "2500"},
        ]))
    }

    async fn place_order(
        State(state): State<Arc<VenueState>>,
        axum::Json(body): axum::Json<serde_json::Value>,
    ) -> impl IntoResponse {
        if body["symbol"] == "REJECTUSDT" {
            return (
                StatusCode::BAD_REQUEST,
                serde_json::json!({"code": -2019, "msg": "margin is insufficient"}).to_string(),
            )
                .into_response();
        }
        state.orders.lock().await.push(body);
        axum::Json(serde_json::json!({"orderId": "o-42"})).into_response()
    }

    async fn cancel_orders(State(state): State<Arc<VenueState>>) -> impl IntoResponse {
        state.cancelled.lock().await.push("all".to_string());
        axum::Json(serde_json::json!({"cancelledOrderIds": ["o-1", "o-2"]}))
    }

    let app = Router::new()
        .route("/api/v1/account/balance", get(balance))
        .route("/api/v1/positions", get(positions))
        .route("/api/v1/order", post(place_order))
        .route("/api/v1/orders", delete(cancel_orders))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

#[tokio::test]
async fn test_balance_call_is_signed_and_decoded() {
    let (addr, _state) = futures_venue().await;
    let adapter = FuturesVenueAdapter::new(format!("http://{}", addr), "ws://unused".into());

    let balance = adapter.get_balance(&creds()).await.unwrap();
    assert_eq!(balance, dec!(10250.75));
}

#[tokio::test]
async fn test_forbidden_key_maps_to_auth_failure() {
    let (addr, _state) = futures_venue().await;
    let adapter = FuturesVenueAdapter::new(format!("http://{}", addr), "ws://unused".into());

    let error = adapter
        .get_balance(&Credentials::new("revoked-key", "secret"))
        .await
        .unwrap_err();
    assert!(matches!(error, ExchangeError::AuthFailure(_)));
}

#[tokio::test]
async fn test_venue_reject_carries_code_and_message() {
    let (addr, _state) = futures_venue().await;
    let adapter = FuturesVenueAdapter::new(format!("http://{}", addr), "ws://unused".into());

    let spec = riskguard::domain::types::OrderSpec {
        symbol: "REJECTUSDT".to_string(),
        side: riskguard::domain::types::OrderSide::Sell,
        quantity: dec!(1),
        order_type: riskguard::domain::types::OrderType::Market,
        reduce_only: true,
        stop_price: None,
    };
    let error = adapter.place_order(&creds(), spec).await.unwrap_err();
    match error {
        ExchangeError::VenueReject { code, msg } => {
            assert_eq!(code, -2019);
            assert!(msg.contains("margin"));
        }
        other => panic!("expected VenueReject, got {:?}", other),
    }
}

#[tokio::test]
async fn test_close_all_positions_issues_opposite_reduce_only_orders() {
    let (addr, state) = futures_venue().await;
    let adapter = FuturesVenueAdapter::new(format!("http://{}", addr), "ws://unused".into());

    let outcome = adapter.close_all_positions(&creds()).await.unwrap();
    assert_eq!(outcome.closed_position_ids, vec!["p-1", "p-2"]);
    assert!(outcome.failed_position_ids.is_empty());
    assert_eq!(outcome.cancelled_orders, vec!["o-1", "o-2"]);
    // 0.5 * 40000 + 4 * 2500
    assert_eq!(outcome.total_closed_value, dec!(30000));

    let orders = state.orders.lock().await;
    assert_eq!(orders.len(), 2);
    // Long closes with a sell, short with a buy; both reduce-only markets.
    assert_eq!(orders[0]["symbol"], "BTCUSDT");
    assert_eq!(orders[0]["side"], "SELL");
    assert_eq!(orders[0]["type"], "MARKET");
    assert_eq!(orders[0]["reduceOnly"], true);
    assert_eq!(orders[1]["symbol"], "ETHUSDT");
    assert_eq!(orders[1]["side"], "BUY");
}

#[tokio::test]
async fn test_spot_close_cancels_open_orders_only() {
    let state = Arc::new(VenueState::default());

    async fn account() -> impl IntoResponse {
        axum::Json(serde_json::json!({"quoteEquity": "5050.25"}))
    }
    async fn open_orders() -> impl IntoResponse {
        axum::Json(serde_json::json!([
            {"orderId": "s-1"},
            {"orderId": "s-2"},
        ]))
    }
    async fn cancel_one(
        State(state): State<Arc<VenueState>>,
        axum::extract::Path(order_id): axum::extract::Path<String>,
    ) -> impl IntoResponse {
        state.cancelled.lock().await.push(order_id);
        axum::Json(serde_json::json!({}))
    }

    let app = Router::new()
        .route("/api/v1/account", get(account))
        .route("/api/v1/openOrders", get(open_orders))
        .route("/api/v1/order/:order_id", delete(cancel_one))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let adapter = SpotVenueAdapter::new(format!("http://{}", addr));

    assert_eq!(adapter.get_balance(&creds()).await.unwrap(), dec!(5050.25));
    assert!(adapter.get_open_positions(&creds()).await.unwrap().is_empty());

    let outcome = adapter.close_all_positions(&creds()).await.unwrap();
    assert!(outcome.closed_position_ids.is_empty());
    assert_eq!(outcome.cancelled_orders, vec!["s-1", "s-2"]);

    let cancelled = state.cancelled.lock().await;
    assert_eq!(*cancelled, vec!["s-1", "s-2"]);
}
