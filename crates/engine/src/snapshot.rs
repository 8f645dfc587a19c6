//! Periodic read-only projection of the row table.
//!
//! Published over a `watch` channel after every full scheduler pass; never
//! feeds back into row state.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use optexec_core::{LtpCache, Side};

use crate::fanout::Dispatcher;
use crate::row::{InstrumentRow, Leg};

#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
    pub ts: Option<DateTime<Utc>>,
    pub rows: Vec<RowSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RowSnapshot {
    pub id: usize,
    pub symbol: String,
    pub side: Side,
    pub state: String,
    pub close_reason: Option<String>,
    pub entered_at: Option<DateTime<Utc>>,
    pub exited_at: Option<DateTime<Utc>>,
    /// Total quantity bought / sold across all user sessions.
    pub buy_quantity: u32,
    pub sell_quantity: u32,
    pub call: LegSnapshot,
    pub put: LegSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct LegSnapshot {
    pub instrument: String,
    pub ltp: Option<Decimal>,
    pub entry_price: Option<Decimal>,
    pub exit_price: Option<Decimal>,
    pub stop: Option<Decimal>,
    pub target: Option<Decimal>,
    pub profit: Decimal,
    /// Per-user order statuses, e.g. `u1:COMPLETE, u2:OPEN`.
    pub order_status: String,
}

/// Build the current projection of every row.
#[must_use]
pub fn build(
    rows: &[InstrumentRow],
    ltp: &LtpCache,
    dispatcher: &Dispatcher,
    now: DateTime<Utc>,
) -> Snapshot {
    let total_multiplier = dispatcher.total_multiplier();
    let rows = rows
        .iter()
        .map(|row| {
            let total_quantity = row.quantity * total_multiplier;
            let (buy_quantity, sell_quantity) = match row.side {
                Side::Buy => (total_quantity, 0),
                Side::Sell => (0, total_quantity),
            };
            RowSnapshot {
                id: row.id,
                symbol: row.symbol.clone(),
                side: row.side,
                state: row.state.to_string(),
                close_reason: row.close_reason.map(|r| r.to_string()),
                entered_at: row.entered_at,
                exited_at: row.exited_at,
                buy_quantity,
                sell_quantity,
                call: leg_snapshot(&row.call, row.side, ltp, total_quantity),
                put: leg_snapshot(&row.put, row.side, ltp, total_quantity),
            }
        })
        .collect();
    Snapshot {
        ts: Some(now),
        rows,
    }
}

fn leg_snapshot(leg: &Leg, side: Side, ltp: &LtpCache, total_quantity: u32) -> LegSnapshot {
    let mark = ltp.price(leg.token);
    LegSnapshot {
        instrument: leg.instrument.clone(),
        ltp: mark,
        entry_price: leg.entry_price,
        exit_price: leg.exit_price,
        stop: leg.stop,
        target: leg.target,
        profit: mark
            .map(|m| leg.profit(side, m, total_quantity))
            .unwrap_or_default(),
        order_status: leg.status_line(),
    }
}
