//! Dual-leg order placement and reconciliation.
//!
//! Both legs are quoted as limit orders when the entry fires. From then on,
//! every tick nudges the slower side toward the faster one: a leg whose
//! price has crossed its limit is treated as filled and the other leg is
//! forced to market; at `wait_time` after placement both legs go to market
//! unconditionally, exactly once.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use optexec_core::{OrderRequest, OrderStatus, OrderType, Product, Side, Validity};

use crate::fanout::{record_outcomes, Dispatcher};
use crate::row::{CloseReason, InstrumentRow, Leg, RowState};

/// Entry limit quote: Buy legs bid below the market, Sell legs offer above.
#[must_use]
pub fn quote_limit(side: Side, ltp: Decimal, percent: Decimal) -> Decimal {
    let factor = percent / Decimal::from(100);
    let price = match side {
        Side::Buy => ltp * (Decimal::ONE - factor),
        Side::Sell => ltp * (Decimal::ONE + factor),
    };
    price.round_dp(2)
}

/// Whether the live price has crossed a resting limit on `side`.
#[must_use]
pub fn limit_crossed(side: Side, ltp: Decimal, limit: Decimal) -> bool {
    match side {
        Side::Buy => ltp <= limit,
        Side::Sell => ltp >= limit,
    }
}

fn entry_request(row: &InstrumentRow, leg: &Leg, limit: Decimal) -> OrderRequest {
    OrderRequest {
        exchange: row.exchange.clone(),
        symbol: leg.instrument.clone(),
        side: row.side,
        order_type: OrderType::Limit,
        price: Some(limit),
        quantity: row.quantity,
        product: Product::Intraday,
        validity: Validity::Day,
    }
}

/// Quote both legs and fan the limit orders out to every user session.
pub async fn place_entry(
    row: &mut InstrumentRow,
    dispatcher: &Dispatcher,
    ce_ltp: Decimal,
    pe_ltp: Decimal,
    now: DateTime<Utc>,
) -> Result<()> {
    let percent = row.quote_percent();

    let ce_limit = quote_limit(row.side, ce_ltp, percent);
    let req = entry_request(row, &row.call, ce_limit);
    let outcomes = dispatcher.place_all(&req).await;
    record_outcomes(&mut row.call.orders, outcomes);
    row.call.limit_price = Some(ce_limit);

    let pe_limit = quote_limit(row.side, pe_ltp, percent);
    let req = entry_request(row, &row.put, pe_limit);
    let outcomes = dispatcher.place_all(&req).await;
    record_outcomes(&mut row.put.orders, outcomes);
    row.put.limit_price = Some(pe_limit);

    row.placed_at = Some(now);
    row.state = RowState::EntryPlaced;
    tracing::info!(
        row = row.id,
        symbol = row.symbol,
        ce_limit = %ce_limit,
        pe_limit = %pe_limit,
        "entry orders placed"
    );
    Ok(())
}

/// One reconciliation pass while the row sits in `EntryPlaced`.
pub async fn reconcile(
    row: &mut InstrumentRow,
    dispatcher: &Dispatcher,
    ce_ltp: Decimal,
    pe_ltp: Decimal,
    now: DateTime<Utc>,
) -> Result<()> {
    dispatcher.refresh_statuses(&mut row.call.orders).await;
    dispatcher.refresh_statuses(&mut row.put.orders).await;

    let ce_crossed = mark_if_filled(&mut row.call, row.side, ce_ltp);
    let pe_crossed = mark_if_filled(&mut row.put, row.side, pe_ltp);

    // A leg whose price crossed its limit drags the other one to market,
    // for every user not yet COMPLETE. Per-user, not per-row: a user already
    // filled on the slow leg is left alone. A fill reported only by order
    // status does not force the other side; the wait-time path covers it.
    if ce_crossed && !row.put.filled() {
        force_leg_to_market(row, Laggard::Put, pe_ltp, dispatcher).await;
    } else if pe_crossed && !row.call.filled() {
        force_leg_to_market(row, Laggard::Call, ce_ltp, dispatcher).await;
    }

    // Wait-time expiry shifts whatever is left to market, exactly once.
    let waited_out = row
        .placed_at
        .is_some_and(|placed| now.signed_duration_since(placed).to_std().unwrap_or_default()
            >= row.wait_time);
    if waited_out && !row.shifted_to_market {
        tracing::info!(row = row.id, symbol = row.symbol, "wait time elapsed, shifting to market");
        row.shifted_to_market = true;
        if !row.call.filled() {
            force_leg_to_market(row, Laggard::Call, ce_ltp, dispatcher).await;
        }
        if !row.put.filled() {
            force_leg_to_market(row, Laggard::Put, pe_ltp, dispatcher).await;
        }
    }

    if row.both_legs_filled() {
        row.state = RowState::Open;
        row.entered_at = Some(now);
        tracing::info!(
            row = row.id,
            symbol = row.symbol,
            ce_entry = %row.call.entry_price.unwrap_or_default(),
            pe_entry = %row.put.entry_price.unwrap_or_default(),
            "both legs filled, row open"
        );
    }
    Ok(())
}

/// Record an entry fill when the live price has crossed the leg's limit or
/// every user's order reports COMPLETE. Fill price is the live price.
/// Returns true only for a crossing fill recorded on this pass.
fn mark_if_filled(leg: &mut Leg, side: Side, ltp: Decimal) -> bool {
    if leg.filled() {
        return false;
    }
    let crossed = leg
        .limit_price
        .is_some_and(|limit| limit_crossed(side, ltp, limit));
    let all_complete = !leg.orders.is_empty()
        && leg
            .orders
            .values()
            .all(|rec| rec.status == OrderStatus::Complete);
    if crossed || all_complete {
        leg.entry_price = Some(ltp);
        tracing::info!(instrument = leg.instrument, price = %ltp, "leg filled");
    }
    crossed && leg.filled()
}

enum Laggard {
    Call,
    Put,
}

/// Cancel the laggard leg's working orders user by user and resubmit them
/// as market orders; the leg is then treated as filled at the live price.
async fn force_leg_to_market(
    row: &mut InstrumentRow,
    which: Laggard,
    ltp: Decimal,
    dispatcher: &Dispatcher,
) {
    let side = row.side;
    let quantity = row.quantity;
    let exchange = row.exchange.clone();
    let leg = match which {
        Laggard::Call => &mut row.call,
        Laggard::Put => &mut row.put,
    };

    let req = OrderRequest {
        exchange,
        symbol: leg.instrument.clone(),
        side,
        order_type: OrderType::Market,
        price: None,
        quantity,
        product: Product::Intraday,
        validity: Validity::Day,
    };

    for (user_id, rec) in &mut leg.orders {
        if rec.status == OrderStatus::Complete {
            continue;
        }
        if let Err(e) = dispatcher.replace_with_market(user_id, rec, &req).await {
            tracing::warn!(user = %user_id, error = %e, "market conversion failed");
        }
    }

    leg.entry_price = Some(ltp);
    tracing::info!(instrument = leg.instrument, price = %ltp, "leg forced to market");
}

/// Close the whole row: cancel what is pending, flatten what is filled,
/// record exit prices at the live LTP, and clear the cycle's transients.
pub async fn close_row(
    row: &mut InstrumentRow,
    dispatcher: &Dispatcher,
    ce_ltp: Decimal,
    pe_ltp: Decimal,
    now: DateTime<Utc>,
    reason: CloseReason,
) -> Result<()> {
    tracing::info!(row = row.id, symbol = row.symbol, reason = %reason, "closing row");

    close_leg(&mut row.call, row.side, row.quantity, &row.exchange, ce_ltp, dispatcher).await;
    close_leg(&mut row.put, row.side, row.quantity, &row.exchange, pe_ltp, dispatcher).await;

    row.exited_at = Some(now);
    row.close_reason = Some(reason);
    row.state = RowState::Completed;
    row.call.clear_cycle();
    row.put.clear_cycle();
    Ok(())
}

async fn close_leg(
    leg: &mut Leg,
    side: Side,
    quantity: u32,
    exchange: &str,
    ltp: Decimal,
    dispatcher: &Dispatcher,
) {
    dispatcher.refresh_statuses(&mut leg.orders).await;

    let flatten = OrderRequest {
        exchange: exchange.to_string(),
        symbol: leg.instrument.clone(),
        side: side.opposite(),
        order_type: OrderType::Market,
        price: None,
        quantity,
        product: Product::Intraday,
        validity: Validity::Day,
    };

    let complete_users: Vec<String> = leg
        .orders
        .iter()
        .filter(|(_, rec)| rec.status == OrderStatus::Complete)
        .map(|(user, _)| user.clone())
        .collect();

    // Unfilled entry orders are cancelled; filled users are flattened with
    // an opposite market order.
    dispatcher.cancel_all(&mut leg.orders).await;
    for user_id in complete_users {
        if let Err(e) = dispatcher.place_for_user(&user_id, &flatten).await {
            tracing::warn!(user = %user_id, error = %e, "flatten order failed");
        }
    }

    if leg.filled() {
        leg.exit_price = Some(ltp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn buy_quotes_below_market_sell_above() {
        assert_eq!(quote_limit(Side::Buy, dec!(100), dec!(1)), dec!(99.00));
        assert_eq!(quote_limit(Side::Sell, dec!(100), dec!(1)), dec!(101.00));
    }

    #[test]
    fn quote_rounds_to_tick_precision() {
        assert_eq!(quote_limit(Side::Buy, dec!(33.35), dec!(0.5)), dec!(33.18));
    }

    #[test]
    fn crossing_is_directional() {
        assert!(limit_crossed(Side::Buy, dec!(98), dec!(99)));
        assert!(!limit_crossed(Side::Buy, dec!(100), dec!(99)));
        assert!(limit_crossed(Side::Sell, dec!(102), dec!(101)));
        assert!(!limit_crossed(Side::Sell, dec!(100), dec!(101)));
    }

    #[test]
    fn unplaced_leg_is_not_marked_filled() {
        let mut leg = Leg::new(
            optexec_core::LegSide::Call,
            "X".to_string(),
            1,
            dec!(0),
            dec!(0),
            dec!(0),
        );
        mark_if_filled(&mut leg, Side::Buy, dec!(100));
        assert!(!leg.filled());
    }
}
