//! Broker capability seam.
//!
//! Every concrete broker (Zerodha, Angel, IIFL, paper, ...) is a separate
//! adapter implementing [`Broker`]; the engine never branches on broker
//! identity.

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::{Margin, OrderRequest, OrderStatus, PlacedOrder, Position};

#[derive(Debug, Error)]
pub enum BrokerError {
    /// The session is unusable (login expired, network down). Fatal for this
    /// user's orders only; other users keep trading.
    #[error("broker connectivity: {0}")]
    Connectivity(String),

    /// The broker accepted the request but rejected the order.
    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("unknown order id: {0}")]
    UnknownOrder(String),

    /// The call did not come back within the fan-out deadline. The order may
    /// still exist broker-side; a later status poll resolves it.
    #[error("broker call timed out after {0}s")]
    Timeout(u64),

    #[error("broker error: {0}")]
    Other(String),
}

pub type BrokerResult<T> = Result<T, BrokerError>;

/// Operations a logged-in broker session must expose.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn place_order(&self, req: &OrderRequest) -> BrokerResult<PlacedOrder>;

    async fn cancel_order(&self, order_id: &str) -> BrokerResult<()>;

    /// Re-price or re-type an open order in place.
    async fn modify_order(&self, order_id: &str, req: &OrderRequest) -> BrokerResult<()>;

    async fn order_status(&self, order_id: &str) -> BrokerResult<OrderStatus>;

    async fn positions(&self) -> BrokerResult<Vec<Position>>;

    /// Last traded price per requested symbol.
    async fn ltp(&self, symbols: &[String]) -> BrokerResult<HashMap<String, Decimal>>;

    async fn margin(&self) -> BrokerResult<Margin>;
}
