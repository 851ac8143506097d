use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// External exchange venue a client account lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Venue {
    Futures,
    Spot,
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Venue::Futures => write!(f, "FUTURES"),
            Venue::Spot => write!(f, "SPOT"),
        }
    }
}

impl FromStr for Venue {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "FUTURES" => Ok(Venue::Futures),
            "SPOT" => Ok(Venue::Spot),
            _ => anyhow::bail!("Invalid venue: {}. Must be 'FUTURES' or 'SPOT'", s),
        }
    }
}

/// API credential pair handed out by the user directory for a single
/// enforcement run or feed session. Never stored in globals.
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }
}

// Secrets must not leak through debug logging.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"***")
            .field("api_secret", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    Stop,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
            OrderType::Stop => write!(f, "STOP"),
        }
    }
}

/// An open position reported by a venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub position_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub entry_price: Decimal,
}

impl Position {
    pub fn notional_value(&self) -> Decimal {
        self.quantity * self.entry_price
    }
}

/// Order submission parameters understood by every venue adapter.
#[derive(Debug, Clone)]
pub struct OrderSpec {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub order_type: OrderType,
    pub reduce_only: bool,
    pub stop_price: Option<Decimal>,
}

impl OrderSpec {
    /// Reduce-only market order closing the given position.
    pub fn closing(position: &Position) -> Self {
        Self {
            symbol: position.symbol.clone(),
            side: position.side.opposite(),
            quantity: position.quantity,
            order_type: OrderType::Market,
            reduce_only: true,
            stop_price: None,
        }
    }
}

/// Provenance of a balance observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BalanceSource {
    Stream,
    Poll,
    Manual,
}

impl fmt::Display for BalanceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BalanceSource::Stream => write!(f, "STREAM"),
            BalanceSource::Poll => write!(f, "POLL"),
            BalanceSource::Manual => write!(f, "MANUAL"),
        }
    }
}

/// A single observed balance change for one client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceUpdate {
    pub event_id: u64,
    pub client_id: String,
    pub venue: Venue,
    pub new_balance: Decimal,
    pub previous_balance: Decimal,
    pub source: BalanceSource,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate result of flattening one client's account in a single
/// enforcement run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub closed_position_ids: Vec<String>,
    pub failed_position_ids: Vec<String>,
    pub cancelled_orders: Vec<String>,
    pub total_closed_value: Decimal,
}

impl ActionOutcome {
    pub fn closed_count(&self) -> usize {
        self.closed_position_ids.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed_position_ids.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed_position_ids.is_empty()
    }
}

/// Events emitted by a venue account stream subscription.
///
/// `Disconnected` is terminal for the subscription; the feed layer decides
/// whether to restart it.
#[derive(Debug, Clone)]
pub enum AccountStreamEvent {
    Balance {
        balance: Decimal,
        timestamp: DateTime<Utc>,
    },
    OrderUpdate {
        order_id: String,
        status: String,
    },
    Disconnected,
}

/// Read-only projection of a registered client, as served by the user
/// directory.
#[derive(Debug, Clone)]
pub struct ClientRecord {
    pub client_id: String,
    pub venue: Venue,
    pub initial_balance: Decimal,
    pub daily_risk: crate::domain::risk::RiskLimit,
    pub max_risk: crate::domain::risk::RiskLimit,
}
