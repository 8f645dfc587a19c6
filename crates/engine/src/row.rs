//! Typed per-row execution state.
//!
//! Each configured leg-pair is one [`InstrumentRow`] addressed by its index
//! in the scheduler's table. The row is mutated only by the scheduler task.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use optexec_core::{LegSide, OrderStatus, Side, ThresholdKind};

use crate::filters::FilterSet;

/// Lifecycle phase of a row. `Completed` is terminal for the trading day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowState {
    AwaitingEntry,
    EntryPlaced,
    Open,
    Completed,
}

impl std::fmt::Display for RowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AwaitingEntry => write!(f, "awaiting_entry"),
            Self::EntryPlaced => write!(f, "entry_placed"),
            Self::Open => write!(f, "open"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// Why a row was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    StopLoss,
    Target,
    TimeExit,
    Manual,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StopLoss => write!(f, "stop_loss"),
            Self::Target => write!(f, "target"),
            Self::TimeExit => write!(f, "time_exit"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// One user's order for one leg.
#[derive(Debug, Clone)]
pub struct OrderRecord {
    pub order_id: String,
    pub status: OrderStatus,
}

/// Call or put sub-entity of a row.
#[derive(Debug, Clone)]
pub struct Leg {
    pub side: LegSide,
    pub instrument: String,
    pub token: u32,

    /// Configured stop-loss / trailing / target magnitudes; interpretation
    /// depends on the row's threshold kinds.
    pub stop_magnitude: Decimal,
    pub trail_magnitude: Decimal,
    pub target_magnitude: Decimal,

    pub limit_price: Option<Decimal>,
    pub entry_price: Option<Decimal>,
    pub exit_price: Option<Decimal>,

    /// Live stop / target. `None` until armed; `Some` is the computed-once
    /// guard, after which only the trailing rule may move the stop.
    pub stop: Option<Decimal>,
    pub target: Option<Decimal>,

    /// Per-user entry (then exit) orders, keyed by user id.
    pub orders: BTreeMap<String, OrderRecord>,
}

impl Leg {
    #[must_use]
    pub fn new(
        side: LegSide,
        instrument: String,
        token: u32,
        stop_magnitude: Decimal,
        trail_magnitude: Decimal,
        target_magnitude: Decimal,
    ) -> Self {
        Self {
            side,
            instrument,
            token,
            stop_magnitude,
            trail_magnitude,
            target_magnitude,
            limit_price: None,
            entry_price: None,
            exit_price: None,
            stop: None,
            target: None,
            orders: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn filled(&self) -> bool {
        self.entry_price.is_some()
    }

    /// Signed P&L for this leg at `mark`, in price points × quantity.
    #[must_use]
    pub fn profit(&self, row_side: Side, mark: Decimal, quantity: u32) -> Decimal {
        let Some(entry) = self.entry_price else {
            return Decimal::ZERO;
        };
        let mark = self.exit_price.unwrap_or(mark);
        let per_unit = match row_side {
            Side::Buy => mark - entry,
            Side::Sell => entry - mark,
        };
        per_unit * Decimal::from(quantity)
    }

    /// Human-readable per-user status, e.g. `u1:COMPLETE, u2:OPEN`.
    #[must_use]
    pub fn status_line(&self) -> String {
        self.orders
            .iter()
            .map(|(user, rec)| format!("{user}:{}", rec.status))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Drop the per-cycle transients (order ids, computed stop/target,
    /// quoted limit). Entry/exit prices survive for reporting.
    pub fn clear_cycle(&mut self) {
        self.orders.clear();
        self.limit_price = None;
        self.stop = None;
        self.target = None;
    }
}

/// One configured trade intent: a call + put pair with its windows,
/// thresholds, and live lifecycle state.
#[derive(Debug, Clone)]
pub struct InstrumentRow {
    pub id: usize,
    pub symbol: String,
    pub exchange: String,
    pub expiry: NaiveDate,
    pub side: Side,

    pub entry_time: NaiveTime,
    pub exit_time: NaiveTime,
    pub wait_time: Duration,

    pub buy_ltp_percent: Decimal,
    pub sell_ltp_percent: Decimal,

    pub lots: u32,
    pub lot_size: u32,
    /// lots × lot size, fixed at load.
    pub quantity: u32,

    pub stop_kind: ThresholdKind,
    pub trail_kind: ThresholdKind,
    pub target_kind: ThresholdKind,

    pub call: Leg,
    pub put: Leg,

    pub state: RowState,
    pub placed_at: Option<DateTime<Utc>>,
    pub entered_at: Option<DateTime<Utc>>,
    pub exited_at: Option<DateTime<Utc>>,
    pub close_reason: Option<CloseReason>,
    /// Once-guard for the wait-time conversion of both legs to market.
    pub shifted_to_market: bool,

    pub filters: FilterSet,
}

impl InstrumentRow {
    /// LTP percent used when quoting entry limits, by row direction.
    #[must_use]
    pub fn quote_percent(&self) -> Decimal {
        match self.side {
            Side::Buy => self.buy_ltp_percent,
            Side::Sell => self.sell_ltp_percent,
        }
    }

    #[must_use]
    pub fn within_entry_window(&self, t: NaiveTime) -> bool {
        t >= self.entry_time && t < self.exit_time
    }

    #[must_use]
    pub fn past_exit_time(&self, t: NaiveTime) -> bool {
        t >= self.exit_time
    }

    #[must_use]
    pub fn completed(&self) -> bool {
        self.state == RowState::Completed
    }

    #[must_use]
    pub fn both_legs_filled(&self) -> bool {
        self.call.filled() && self.put.filled()
    }

    /// Re-arm the row for a new trading day. External callers only; the
    /// scheduler never resets a completed row itself.
    pub fn reset_for_day(&mut self) {
        self.call.clear_cycle();
        self.put.clear_cycle();
        self.call.entry_price = None;
        self.call.exit_price = None;
        self.put.entry_price = None;
        self.put.exit_price = None;
        self.state = RowState::AwaitingEntry;
        self.placed_at = None;
        self.entered_at = None;
        self.exited_at = None;
        self.close_reason = None;
        self.shifted_to_market = false;
    }
}

/// Test fixture shared by the engine's unit tests.
#[cfg(test)]
pub(crate) fn test_row(side: Side) -> InstrumentRow {
    use crate::filters::FilterConfig;

    let d = |v: i64| Decimal::from(v);
    InstrumentRow {
        id: 0,
        symbol: "NIFTY".to_string(),
        exchange: "NFO".to_string(),
        expiry: NaiveDate::from_ymd_opt(2026, 8, 27).unwrap(),
        side,
        entry_time: NaiveTime::from_hms_opt(9, 25, 0).unwrap(),
        exit_time: NaiveTime::from_hms_opt(15, 10, 0).unwrap(),
        wait_time: Duration::from_secs(30),
        buy_ltp_percent: d(1),
        sell_ltp_percent: d(1),
        lots: 2,
        lot_size: 50,
        quantity: 100,
        stop_kind: ThresholdKind::Percentage,
        trail_kind: ThresholdKind::Value,
        target_kind: ThresholdKind::Percentage,
        call: Leg::new(
            LegSide::Call,
            "NIFTY26AUG24000CE".to_string(),
            1001,
            d(20),
            d(0),
            d(80),
        ),
        put: Leg::new(
            LegSide::Put,
            "NIFTY26AUG24000PE".to_string(),
            1002,
            d(20),
            d(0),
            d(80),
        ),
        state: RowState::AwaitingEntry,
        placed_at: None,
        entered_at: None,
        exited_at: None,
        close_reason: None,
        shifted_to_market: false,
        filters: FilterSet::new(FilterConfig::default()),
    }
}
