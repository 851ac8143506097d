//! Spot venue adapter
//!
//! The spot venue has no position concept: flattening an account means
//! cancelling its open orders. Balance is the account's total quote equity.

use crate::domain::errors::ExchangeError;
use crate::domain::ports::{ExchangeAdapter, StreamSubscription};
use crate::domain::types::{
    AccountStreamEvent, ActionOutcome, Credentials, OrderSpec, Position, Venue,
};
use crate::infrastructure::core::circuit_breaker::CircuitBreaker;
use crate::infrastructure::core::http_client_factory::HttpClientFactory;
use crate::infrastructure::exchange::rest::VenueRestClient;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tracing::info;

pub struct SpotVenueAdapter {
    rest: VenueRestClient,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl SpotVenueAdapter {
    pub fn new(base_url: String) -> Self {
        let client = HttpClientFactory::create_client();
        let circuit_breaker = Arc::new(CircuitBreaker::new(
            "SpotVenue",
            5,
            3,
            Duration::from_secs(60),
        ));

        Self {
            rest: VenueRestClient::new(client, base_url),
            circuit_breaker,
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct AccountResponse {
    #[serde(rename = "quoteEquity")]
    quote_equity: String,
}

#[derive(Debug, serde::Deserialize)]
struct OrderAck {
    #[serde(rename = "orderId")]
    order_id: String,
}

#[derive(Debug, serde::Deserialize)]
struct OpenOrder {
    #[serde(rename = "orderId")]
    order_id: String,
}

#[async_trait]
impl ExchangeAdapter for SpotVenueAdapter {
    fn venue(&self) -> Venue {
        Venue::Spot
    }

    async fn get_balance(&self, creds: &Credentials) -> Result<Decimal, ExchangeError> {
        self.circuit_breaker
            .call(async {
                let account: AccountResponse = self.rest.get(creds, "/api/v1/account").await?;
                Decimal::from_str(&account.quote_equity).map_err(|_| {
                    ExchangeError::Unknown(format!(
                        "venue sent undecodable quoteEquity: {}",
                        account.quote_equity
                    ))
                })
            })
            .await
    }

    async fn get_open_positions(
        &self,
        _creds: &Credentials,
    ) -> Result<Vec<Position>, ExchangeError> {
        // Spot holdings are not positions.
        Ok(Vec::new())
    }

    async fn place_order(
        &self,
        creds: &Credentials,
        spec: OrderSpec,
    ) -> Result<String, ExchangeError> {
        self.circuit_breaker
            .call(async {
                let body = serde_json::json!({
                    "symbol": spec.symbol,
                    "side": spec.side.to_string(),
                    "type": spec.order_type.to_string(),
                    "qty": spec.quantity.to_string(),
                });
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
                    Some(s) => format!("/api/v1/openOrders?symbol={}", s),
                    None => "/api/v1/openOrders".to_string(),
                };
                let open: Vec<OpenOrder> = self.rest.get(creds, &path).await?;

                let mut cancelled = Vec::with_capacity(open.len());
                for order in open {
                    let _: serde_json::Value = self
                        .rest
                        .delete(creds, &format!("/api/v1/order/{}", order.order_id))
                        .await?;
                    cancelled.push(order.order_id);
                }
                Ok(cancelled)
            })
            .await
    }

    async fn close_all_positions(
        &self,
        creds: &Credentials,
    ) -> Result<ActionOutcome, ExchangeError> {
        let cancelled = self.cancel_all_orders(creds, None).await?;
        info!(
            "SpotVenueAdapter: No positions on spot; cancelled {} open order(s)",
            cancelled.len()
        );

        Ok(ActionOutcome {
            closed_position_ids: Vec::new(),
            failed_position_ids: Vec::new(),
            cancelled_orders: cancelled,
            total_closed_value: Decimal::ZERO,
        })
    }

    async fn stream_account(
        &self,
        _creds: &Credentials,
        _sink: Sender<AccountStreamEvent>,
    ) -> Result<StreamSubscription, ExchangeError> {
        Err(ExchangeError::Unknown(
            "spot venue does not expose an account stream".to_string(),
        ))
    }
}
