//! Futures venue adapter
//!
//! Authenticated balance/position/order calls against the futures venue's
//! REST surface, plus the account WebSocket stream. Close-all is implemented
//! here as snapshot + per-position reduce-only market orders; callers decide
//! what a partial outcome means.

use crate::domain::errors::ExchangeError;
use crate::domain::ports::{ExchangeAdapter, StreamSubscription};
use crate::domain::types::{
    AccountStreamEvent, ActionOutcome, Credentials, OrderSide, OrderSpec, OrderType, Position,
    Venue,
};
use crate::infrastructure::core::circuit_breaker::CircuitBreaker;
use crate::infrastructure::core::http_client_factory::HttpClientFactory;
use crate::infrastructure::exchange::account_stream::spawn_account_stream;
use crate::infrastructure::exchange::rest::VenueRestClient;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tracing::{info, warn};

pub struct FuturesVenueAdapter {
    rest: VenueRestClient,
    ws_url: String,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl FuturesVenueAdapter {
    pub fn new(base_url: String, ws_url: String) -> Self {
        let client = HttpClientFactory::create_client();
        let circuit_breaker = Arc::new(CircuitBreaker::new(
            "FuturesVenue",
            5,
            3,
            Duration::from_secs(60),
        ));

        Self {
            rest: VenueRestClient::new(client, base_url),
            ws_url,
            circuit_breaker,
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct BalanceResponse {
    #[serde(rename = "totalEquity")]
    total_equity: String,
}

#[derive(Debug, serde::Deserialize)]
struct PositionResponse {
    #[serde(rename = "positionId")]
    position_id: String,
    symbol: String,
    side: String,
    #[serde(rename = "qty")]
    quantity: String,
    #[serde(rename = "entryPrice")]
    entry_price: String,
}

#[derive(Debug, serde::Deserialize)]
struct OrderAck {
    #[serde(rename = "orderId")]
    order_id: String,
}

#[derive(Debug, serde::Deserialize)]
struct CancelAck {
    #[serde(rename = "cancelledOrderIds")]
    cancelled_order_ids: Vec<String>,
}

fn parse_decimal(field: &str, raw: &str) -> Result<Decimal, ExchangeError> {
    Decimal::from_str(raw)
        .map_err(|_| ExchangeError::Unknown(format!("venue sent undecodable {}: {}", field, raw)))
}

fn parse_side(raw: &str) -> Result<OrderSide, ExchangeError> {
    match raw.to_uppercase().as_str() {
        "BUY" | "LONG" => Ok(OrderSide::Buy),
        "SELL" | "SHORT" => Ok(OrderSide::Sell),
        other => Err(ExchangeError::Unknown(format!(
            "venue sent unknown position side: {}",
            other
        ))),
    }
}

fn decode_position(raw: PositionResponse) -> Result<Position, ExchangeError> {
    Ok(Position {
        quantity: parse_decimal("qty", &raw.quantity)?,
        entry_price: parse_decimal("entryPrice", &raw.entry_price)?,
        side: parse_side(&raw.side)?,
        position_id: raw.position_id,
        symbol: raw.symbol,
    })
}

#[async_trait]
impl ExchangeAdapter for FuturesVenueAdapter {
    fn venue(&self) -> Venue {
        Venue::Futures
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn get_balance(&self, creds: &Credentials) -> Result<Decimal, ExchangeError> {
        self.circuit_breaker
            .call(async {
                let response: BalanceResponse =
                    self.rest.get(creds, "/api/v1/account/balance").await?;
                parse_decimal("totalEquity", &response.total_equity)
            })
            .await
    }

    async fn get_open_positions(
        &self,
        creds: &Credentials,
    ) -> Result<Vec<Position>, ExchangeError> {
        self.circuit_breaker
            .call(async {
                let raw: Vec<PositionResponse> = self.rest.get(creds, "/api/v1/positions").await?;
                raw.into_iter().map(decode_position).collect()
            })
            .await
    }

    async fn place_order(
        &self,
        creds: &Credentials,
        spec: OrderSpec,
    ) -> Result<String, ExchangeError> {
        self.circuit_breaker
            .call(async {
                let mut body = serde_json::json!({
                    "symbol": spec.symbol,
                    "side": spec.side.to_string(),
                    "type": spec.order_type.to_string(),
                    "qty": spec.quantity.to_string(),
                    "reduceOnly": spec.reduce_only,
                });
                if let Some(stop) = spec.stop_price
                    && spec.order_type == OrderType::Stop
                {
                    body["stopPrice"] = serde_json::json!(stop.to_string());
                }

                let ack: OrderAck = self.rest.post(creds, "/api/v1/order", &body).await?;
                Ok(ack.order_id)
            })
            .await
    }

    async fn cancel_all_orders(
        &self,
        creds: &Credentials,
        symbol: Option<&str>,
    ) -> Result<Vec<String>, ExchangeError> {
        self.circuit_breaker
            .call(async {
                let path = match symbol {
                    Some(s) => format!("/api/v1/orders?symbol={}", s),
                    None => "/api/v1/orders".to_string(),
                };
                let ack: CancelAck = self.rest.delete(creds, &path).await?;
                Ok(ack.cancelled_order_ids)
            })
            .await
    }

    async fn close_all_positions(
        &self,
        creds: &Credentials,
    ) -> Result<ActionOutcome, ExchangeError> {
        // Cancel resting orders first so nothing re-opens exposure while we
        // flatten.
        let cancelled_orders = match self.cancel_all_orders(creds, None).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("FuturesVenueAdapter: cancel-all before close failed: {}", e);
                Vec::new()
            }
        };

        let positions = self.get_open_positions(creds).await?;
        info!(
            "FuturesVenueAdapter: Closing {} open position(s)",
            positions.len()
        );

        let mut outcome = ActionOutcome {
            cancelled_orders,
            ..Default::default()
        };

        for position in &positions {
            let spec = OrderSpec::closing(position);
            match self.place_order(creds, spec).await {
                Ok(order_id) => {
                    info!(
                        "FuturesVenueAdapter: Closed {} ({}) via order {}",
                        position.position_id, position.symbol, order_id
                    );
                    outcome.closed_position_ids.push(position.position_id.clone());
                    outcome.total_closed_value += position.notional_value();
                }
                Err(e) => {
                    warn!(
                        "FuturesVenueAdapter: Failed to close {} ({}): {}",
                        position.position_id, position.symbol, e
                    );
                    outcome.failed_position_ids.push(position.position_id.clone());
                }
            }
        }

        Ok(outcome)
    }

    async fn stream_account(
        &self,
        creds: &Credentials,
        sink: Sender<AccountStreamEvent>,
    ) -> Result<StreamSubscription, ExchangeError> {
        spawn_account_stream(&self.ws_url, creds, sink).await
    }
}
