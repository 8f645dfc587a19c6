use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Transaction direction of an order or of a whole strategy row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The order side that flattens a position opened on `self`.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

/// Broker-reported order status, normalized across adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Open,
    Complete,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Cancelled | Self::Rejected)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Open => write!(f, "OPEN"),
            Self::Complete => write!(f, "COMPLETE"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::Rejected => write!(f, "REJECTED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Product {
    Intraday,
    Delivery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Validity {
    Day,
    ImmediateOrCancel,
}

/// Call or put leg of a strategy row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegSide {
    Call,
    Put,
}

impl std::fmt::Display for LegSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "CE"),
            Self::Put => write!(f, "PE"),
        }
    }
}

/// How a stop-loss / trailing-stop / target magnitude is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ThresholdKind {
    /// Magnitude is a percentage of the entry price.
    Percentage,
    /// Magnitude is an absolute price offset.
    Value,
}

/// One logical order, before fan-out scales it per user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub exchange: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    /// Limit price; ignored for market orders.
    pub price: Option<Decimal>,
    pub quantity: u32,
    pub product: Product,
    pub validity: Validity,
}

impl OrderRequest {
    /// Copy of this request converted to a market order.
    #[must_use]
    pub fn as_market(&self) -> Self {
        Self {
            order_type: OrderType::Market,
            price: None,
            ..self.clone()
        }
    }
}

/// A broker-side open position, as reported by `Broker::positions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub exchange: String,
    pub quantity: i64,
    pub avg_price: Decimal,
    pub last_price: Decimal,
    pub pnl: Decimal,
}

/// Account margin as reported by the broker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Margin {
    pub available: Decimal,
    pub used: Decimal,
}

/// Acknowledgement returned by `Broker::place_order`.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order_id: String,
    pub message: String,
}

/// One last-traded-price observation from the market feed.
#[derive(Debug, Clone, Copy)]
pub struct Tick {
    pub token: u32,
    pub price: Decimal,
    /// Traded volume carried by this tick, when the feed provides it.
    pub volume: Decimal,
    pub ts: DateTime<Utc>,
}
