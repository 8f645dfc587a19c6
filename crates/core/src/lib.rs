//! Core contract for the options execution engine: order/threshold types,
//! the pluggable [`broker::Broker`] capability, per-user sessions, the
//! concurrent LTP cache, and application configuration.

pub mod broker;
pub mod config;
pub mod ltp;
pub mod session;
pub mod types;

pub use broker::{Broker, BrokerError, BrokerResult};
pub use config::{AppConfig, ConfigLoader, EngineConfig, TickErrorPolicy, UserConfig};
pub use ltp::{run_feed, LtpCache, LtpEntry};
pub use session::UserBrokerSession;
pub use types::{
    LegSide, Margin, OrderRequest, OrderStatus, OrderType, PlacedOrder, Position, Product, Side,
    ThresholdKind, Tick, Validity,
};
