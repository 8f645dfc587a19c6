//! Simulated broker session.
//!
//! Market orders fill immediately at the current book price; limit orders
//! rest until a price update crosses them. `set_offline` makes every call
//! fail with a connectivity error, which is how tests exercise partial
//! fan-out failure. No real money anywhere near this.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use optexec_core::{
    Broker, BrokerError, BrokerResult, Margin, OrderRequest, OrderStatus, OrderType, PlacedOrder,
    Position, Side,
};

#[derive(Debug, Clone)]
struct PaperOrder {
    symbol: String,
    exchange: String,
    side: Side,
    order_type: OrderType,
    limit: Option<Decimal>,
    quantity: u32,
    status: OrderStatus,
    fill_price: Option<Decimal>,
}

#[derive(Default)]
pub struct PaperBroker {
    prices: Mutex<HashMap<String, Decimal>>,
    orders: Mutex<HashMap<String, PaperOrder>>,
    next_id: AtomicU64,
    offline: AtomicBool,
}

impl PaperBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the book price for `symbol` and sweep resting limit orders
    /// that the new price crosses.
    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.lock().insert(symbol.to_string(), price);
        let mut orders = self.orders.lock();
        for order in orders.values_mut() {
            if order.symbol != symbol || order.status != OrderStatus::Open {
                continue;
            }
            if let (OrderType::Limit, Some(limit)) = (order.order_type, order.limit) {
                let crossed = match order.side {
                    Side::Buy => price <= limit,
                    Side::Sell => price >= limit,
                };
                if crossed {
                    order.status = OrderStatus::Complete;
                    order.fill_price = Some(limit);
                }
            }
        }
    }

    /// Simulate a dead session: every broker call fails until re-enabled.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Quantities of every order placed for `symbol`, in placement order id
    /// order. Test helper.
    #[must_use]
    pub fn placed_quantities(&self, symbol: &str) -> Vec<u32> {
        let orders = self.orders.lock();
        let mut ids: Vec<(u64, u32)> = orders
            .iter()
            .filter(|(_, o)| o.symbol == symbol)
            .map(|(id, o)| (id.parse().unwrap_or(0), o.quantity))
            .collect();
        ids.sort_unstable();
        ids.into_iter().map(|(_, q)| q).collect()
    }

    /// Number of orders placed so far. Test helper.
    #[must_use]
    pub fn order_count(&self) -> usize {
        self.orders.lock().len()
    }

    fn ensure_online(&self) -> BrokerResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(BrokerError::Connectivity("session offline".to_string()));
        }
        Ok(())
    }

    fn price_of(&self, symbol: &str) -> Option<Decimal> {
        self.prices.lock().get(symbol).copied()
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn place_order(&self, req: &OrderRequest) -> BrokerResult<PlacedOrder> {
        self.ensure_online()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;

        let mut order = PaperOrder {
            symbol: req.symbol.clone(),
            exchange: req.exchange.clone(),
            side: req.side,
            order_type: req.order_type,
            limit: req.price,
            quantity: req.quantity,
            status: OrderStatus::Open,
            fill_price: None,
        };

        match req.order_type {
            OrderType::Market => {
                let price = self
                    .price_of(&req.symbol)
                    .ok_or_else(|| BrokerError::Rejected(format!("no price for {}", req.symbol)))?;
                order.status = OrderStatus::Complete;
                order.fill_price = Some(price);
            }
            OrderType::Limit => {
                let limit = req
                    .price
                    .ok_or_else(|| BrokerError::Rejected("limit order without price".to_string()))?;
                // Fill on the spot if the book already crosses the limit.
                if let Some(price) = self.price_of(&req.symbol) {
                    let crossed = match req.side {
                        Side::Buy => price <= limit,
                        Side::Sell => price >= limit,
                    };
                    if crossed {
                        order.status = OrderStatus::Complete;
                        order.fill_price = Some(price);
                    }
                }
            }
        }

        let order_id = id.to_string();
        tracing::debug!(order_id, symbol = req.symbol, status = %order.status, "paper order placed");
        self.orders.lock().insert(order_id.clone(), order);
        Ok(PlacedOrder {
            order_id,
            message: "paper fill".to_string(),
        })
    }

    async fn cancel_order(&self, order_id: &str) -> BrokerResult<()> {
        self.ensure_online()?;
        let mut orders = self.orders.lock();
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| BrokerError::UnknownOrder(order_id.to_string()))?;
        if order.status == OrderStatus::Complete {
            return Err(BrokerError::Rejected("order already complete".to_string()));
        }
        order.status = OrderStatus::Cancelled;
        Ok(())
    }

    async fn modify_order(&self, order_id: &str, req: &OrderRequest) -> BrokerResult<()> {
        self.ensure_online()?;
        let mut orders = self.orders.lock();
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| BrokerError::UnknownOrder(order_id.to_string()))?;
        if order.status != OrderStatus::Open {
            return Err(BrokerError::Rejected(format!(
                "cannot modify order in status {}",
                order.status
            )));
        }
        order.order_type = req.order_type;
        order.limit = req.price;
        if req.order_type == OrderType::Market {
            let price = self
                .price_of(&order.symbol)
                .ok_or_else(|| BrokerError::Rejected(format!("no price for {}", order.symbol)))?;
            order.status = OrderStatus::Complete;
            order.fill_price = Some(price);
        }
        Ok(())
    }

    async fn order_status(&self, order_id: &str) -> BrokerResult<OrderStatus> {
        self.ensure_online()?;
        self.orders
            .lock()
            .get(order_id)
            .map(|o| o.status)
            .ok_or_else(|| BrokerError::UnknownOrder(order_id.to_string()))
    }

    async fn positions(&self) -> BrokerResult<Vec<Position>> {
        self.ensure_online()?;
        let orders = self.orders.lock();
        let mut by_symbol: HashMap<String, Position> = HashMap::new();
        for order in orders.values() {
            let (OrderStatus::Complete, Some(fill)) = (order.status, order.fill_price) else {
                continue;
            };
            let signed = match order.side {
                Side::Buy => i64::from(order.quantity),
                Side::Sell => -i64::from(order.quantity),
            };
            let entry = by_symbol
                .entry(order.symbol.clone())
                .or_insert_with(|| Position {
                    symbol: order.symbol.clone(),
                    exchange: order.exchange.clone(),
                    quantity: 0,
                    avg_price: fill,
                    last_price: fill,
                    pnl: Decimal::ZERO,
                });
            entry.quantity += signed;
            entry.last_price = self.price_of(&order.symbol).unwrap_or(fill);
        }
        Ok(by_symbol.into_values().collect())
    }

    async fn ltp(&self, symbols: &[String]) -> BrokerResult<HashMap<String, Decimal>> {
        self.ensure_online()?;
        let prices = self.prices.lock();
        Ok(symbols
            .iter()
            .filter_map(|s| prices.get(s).map(|p| (s.clone(), *p)))
            .collect())
    }

    async fn margin(&self) -> BrokerResult<Margin> {
        self.ensure_online()?;
        Ok(Margin {
            available: Decimal::from(1_000_000),
            used: Decimal::ZERO,
        })
    }
}
