//! Venue account WebSocket stream.
//!
//! A subscription covers exactly one connection: on any loss it pushes a
//! terminal `Disconnected` into the sink and exits. Restart and failover
//! policy belong to the feed layer, not here.

use crate::domain::errors::ExchangeError;
use crate::domain::ports::StreamSubscription;
use crate::domain::types::{AccountStreamEvent, Credentials};
use crate::infrastructure::exchange::signer::Signer;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use tokio::sync::mpsc::Sender;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Typed account stream frames. Unknown `e` tags are skipped; a balance
/// frame with an undecodable amount is a fault worth logging, not a crash.
#[derive(Debug, Deserialize)]
#[serde(tag = "e")]
enum StreamFrame {
    #[serde(rename = "balanceUpdate")]
    Balance { balance: String },
    #[serde(rename = "orderUpdate")]
    Order {
        #[serde(rename = "orderId")]
        order_id: String,
        status: String,
    },
    #[serde(other)]
    Other,
}

pub async fn spawn_account_stream(
    ws_url: &str,
    creds: &Credentials,
    sink: Sender<AccountStreamEvent>,
) -> Result<StreamSubscription, ExchangeError> {
    let signer = Signer::new();
    let nonce = signer.next_nonce();
    let signature = signer.sign(creds, "GET", "/stream/account", nonce, "");

    let url = format!(
        "{}/stream/account?key={}&nonce={}&signature={}",
        ws_url.trim_end_matches('/'),
        creds.api_key,
        nonce,
        signature
    );

    let (ws_stream, _) = connect_async(&url).await.map_err(|e| {
        ExchangeError::TransientNetwork(format!("account stream connect failed: {}", e))
    })?;
    info!("AccountStream: Connected");

    let handle = tokio::spawn(async move {
        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                message = read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            handle_frame(&text, &sink).await;
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            if write.send(Message::Pong(payload)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!("AccountStream: Connection closed by venue");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("AccountStream: Read error: {}", e);
                            break;
                        }
                    }
                }
                _ = sink.closed() => {
                    debug!("AccountStream: Consumer gone, shutting down");
                    return;
                }
            }
        }

        let _ = sink.send(AccountStreamEvent::Disconnected).await;
    });

    Ok(StreamSubscription::new(handle))
}

async fn handle_frame(text: &str, sink: &Sender<AccountStreamEvent>) {
    let frame: StreamFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!("AccountStream: Skipping undecodable frame: {}", e);
            return;
        }
    };

    let event = match frame {
        StreamFrame::Balance { balance } => match Decimal::from_str(&balance) {
            Ok(balance) => AccountStreamEvent::Balance {
                balance,
                timestamp: Utc::now(),
            },
            Err(_) => {
                warn!("AccountStream: Undecodable balance in frame: {}", balance);
                return;
            }
        },
        StreamFrame::Order { order_id, status } => {
            AccountStreamEvent::OrderUpdate { order_id, status }
        }
        StreamFrame::Other => return,
    };

    if sink.send(event).await.is_err() {
        debug!("AccountStream: Consumer gone while delivering event");
    }
}
