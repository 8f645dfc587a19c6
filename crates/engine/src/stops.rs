//! Stop-loss, trailing-stop, and target rules.
//!
//! Levels are armed exactly once per trade cycle (the `Option` on
//! `Leg::stop`/`Leg::target` is the guard); after that the trailing rule may
//! only tighten the stop, never loosen it.

use rust_decimal::Decimal;

use optexec_core::{Side, ThresholdKind};

use crate::row::{CloseReason, Leg};

/// Compute the initial stop and target for a filled leg. No-op if the leg
/// has no entry price yet or its levels are already armed.
pub fn arm_levels(leg: &mut Leg, side: Side, stop_kind: ThresholdKind, target_kind: ThresholdKind) {
    let Some(entry) = leg.entry_price else {
        return;
    };
    if leg.stop.is_none() {
        let offset = magnitude(entry, stop_kind, leg.stop_magnitude);
        leg.stop = Some(match side {
            Side::Buy => entry - offset,
            Side::Sell => entry + offset,
        });
    }
    if leg.target.is_none() {
        let offset = magnitude(entry, target_kind, leg.target_magnitude);
        leg.target = Some(match side {
            Side::Buy => entry + offset,
            Side::Sell => entry - offset,
        });
    }
    tracing::debug!(
        instrument = leg.instrument,
        stop = %leg.stop.unwrap_or_default(),
        target = %leg.target.unwrap_or_default(),
        "exit levels armed"
    );
}

/// Trail the stop in the trade's favor only.
///
/// The trail magnitude doubles as the trigger distance: a Buy stop starts
/// moving once the price clears `entry + trail` and then sits `trail`
/// behind the best price seen. Mirrored for Sell. A candidate that would
/// loosen the stop is discarded.
pub fn trail(leg: &mut Leg, side: Side, trail_kind: ThresholdKind, ltp: Decimal) {
    if leg.trail_magnitude.is_zero() {
        return;
    }
    let (Some(entry), Some(stop)) = (leg.entry_price, leg.stop) else {
        return;
    };
    let offset = magnitude(entry, trail_kind, leg.trail_magnitude);

    let candidate = match side {
        Side::Buy if ltp > entry + offset => ltp - offset,
        Side::Sell if ltp < entry - offset => ltp + offset,
        _ => return,
    };

    let improved = match side {
        Side::Buy => candidate > stop,
        Side::Sell => candidate < stop,
    };
    if improved {
        tracing::debug!(
            instrument = leg.instrument,
            old = %stop,
            new = %candidate,
            "trailing stop moved"
        );
        leg.stop = Some(candidate);
    }
}

/// Check whether the live price has hit this leg's stop or target.
#[must_use]
pub fn exit_trigger(leg: &Leg, side: Side, ltp: Decimal) -> Option<CloseReason> {
    let stop_hit = leg.stop.is_some_and(|stop| match side {
        Side::Buy => ltp <= stop,
        Side::Sell => ltp >= stop,
    });
    if stop_hit {
        tracing::warn!(instrument = leg.instrument, ltp = %ltp, "stop-loss hit");
        return Some(CloseReason::StopLoss);
    }

    let target_hit = leg.target.is_some_and(|target| match side {
        Side::Buy => ltp >= target,
        Side::Sell => ltp <= target,
    });
    if target_hit {
        tracing::info!(instrument = leg.instrument, ltp = %ltp, "target hit");
        return Some(CloseReason::Target);
    }

    None
}

fn magnitude(entry: Decimal, kind: ThresholdKind, value: Decimal) -> Decimal {
    match kind {
        ThresholdKind::Percentage => entry * value / Decimal::from(100),
        ThresholdKind::Value => value,
    }
}
