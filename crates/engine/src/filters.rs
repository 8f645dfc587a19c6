//! Optional entry filters.
//!
//! The entry window itself is mandatory and checked by the scheduler; each
//! filter here is optional, defaults to "pass" when disabled, and all
//! enabled filters are combined with logical AND. An enabled filter that is
//! still warming up does not pass.

use std::cmp::Ordering;
use std::collections::VecDeque;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use optexec_core::Side;

/// Which filters a row has enabled. All `None`/`false` means entry is gated
/// by the time window alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Fast/slow simple-moving-average crossover periods.
    pub ma: Option<(usize, usize)>,
    /// Require price on the favorable side of VWAP.
    pub vwap: bool,
    /// Trend-following stop line; the value is the band width.
    pub trend_stop: Option<Decimal>,
    /// Absolute price floor (pass when price >= this).
    pub price_above: Option<Decimal>,
    /// Absolute price ceiling (pass when price <= this).
    pub price_below: Option<Decimal>,
}

impl FilterConfig {
    #[must_use]
    pub fn any_enabled(&self) -> bool {
        self.ma.is_some()
            || self.vwap
            || self.trend_stop.is_some()
            || self.price_above.is_some()
            || self.price_below.is_some()
    }
}

/// Rolling indicator state for one row's signal instrument, fed once per
/// scheduler tick.
#[derive(Debug, Clone)]
pub struct FilterSet {
    config: FilterConfig,
    fast: VecDeque<Decimal>,
    slow: VecDeque<Decimal>,
    cum_pv: Decimal,
    cum_vol: Decimal,
    trend_line: Option<Decimal>,
    trend_up: bool,
}

impl FilterSet {
    #[must_use]
    pub fn new(config: FilterConfig) -> Self {
        Self {
            config,
            fast: VecDeque::new(),
            slow: VecDeque::new(),
            cum_pv: Decimal::ZERO,
            cum_vol: Decimal::ZERO,
            trend_line: None,
            trend_up: true,
        }
    }

    #[must_use]
    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Feed one observation. Called every tick, including outside the entry
    /// window, so indicators are warm by the time the window opens.
    pub fn observe(&mut self, price: Decimal, volume: Decimal) {
        if let Some((fast_n, slow_n)) = self.config.ma {
            push_window(&mut self.fast, price, fast_n);
            push_window(&mut self.slow, price, slow_n);
        }
        if self.config.vwap && volume > Decimal::ZERO {
            self.cum_pv += price * volume;
            self.cum_vol += volume;
        }
        if let Some(band) = self.config.trend_stop {
            self.update_trend(price, band);
        }
    }

    /// One-directional stop line: trails behind the price while the trend
    /// holds, flips direction when the price crosses it.
    fn update_trend(&mut self, price: Decimal, band: Decimal) {
        match self.trend_line {
            None => {
                self.trend_line = Some(price - band);
                self.trend_up = true;
            }
            Some(line) if self.trend_up => {
                if price < line {
                    self.trend_up = false;
                    self.trend_line = Some(price + band);
                } else {
                    self.trend_line = Some(line.max(price - band));
                }
            }
            Some(line) => {
                if price > line {
                    self.trend_up = true;
                    self.trend_line = Some(price - band);
                } else {
                    self.trend_line = Some(line.min(price + band));
                }
            }
        }
    }

    /// Evaluate all enabled filters against the current price, AND-combined.
    #[must_use]
    pub fn pass(&self, side: Side, price: Decimal) -> bool {
        self.pass_price_band(price)
            && self.pass_ma(side)
            && self.pass_vwap(side, price)
            && self.pass_trend(side)
    }

    fn pass_price_band(&self, price: Decimal) -> bool {
        if let Some(floor) = self.config.price_above {
            if price < floor {
                return false;
            }
        }
        if let Some(ceiling) = self.config.price_below {
            if price > ceiling {
                return false;
            }
        }
        true
    }

    fn pass_ma(&self, side: Side) -> bool {
        let Some((fast_n, slow_n)) = self.config.ma else {
            return true;
        };
        if self.fast.len() < fast_n || self.slow.len() < slow_n {
            return false;
        }
        let fast = mean(&self.fast);
        let slow = mean(&self.slow);
        match fast.cmp(&slow) {
            Ordering::Greater => side == Side::Buy,
            Ordering::Less => side == Side::Sell,
            Ordering::Equal => false,
        }
    }

    fn pass_vwap(&self, side: Side, price: Decimal) -> bool {
        if !self.config.vwap {
            return true;
        }
        if self.cum_vol.is_zero() {
            return false;
        }
        let vwap = self.cum_pv / self.cum_vol;
        match side {
            Side::Buy => price > vwap,
            Side::Sell => price < vwap,
        }
    }

    fn pass_trend(&self, side: Side) -> bool {
        if self.config.trend_stop.is_none() {
            return true;
        }
        if self.trend_line.is_none() {
            return false;
        }
        match side {
            Side::Buy => self.trend_up,
            Side::Sell => !self.trend_up,
        }
    }
}

fn push_window(window: &mut VecDeque<Decimal>, price: Decimal, cap: usize) {
    window.push_back(price);
    if window.len() > cap {
        window.pop_front();
    }
}

fn mean(window: &VecDeque<Decimal>) -> Decimal {
    let sum: Decimal = window.iter().sum();
    sum / Decimal::from(window.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn disabled_filters_always_pass() {
        let set = FilterSet::new(FilterConfig::default());
        assert!(set.pass(Side::Buy, dec!(100)));
        assert!(set.pass(Side::Sell, dec!(0.05)));
    }

    #[test]
    fn price_band_gates_both_sides() {
        let set = FilterSet::new(FilterConfig {
            price_above: Some(dec!(90)),
            price_below: Some(dec!(110)),
            ..FilterConfig::default()
        });
        assert!(set.pass(Side::Buy, dec!(100)));
        assert!(!set.pass(Side::Buy, dec!(89)));
        assert!(!set.pass(Side::Buy, dec!(111)));
    }

    #[test]
    fn ma_filter_fails_while_warming() {
        let mut set = FilterSet::new(FilterConfig {
            ma: Some((2, 4)),
            ..FilterConfig::default()
        });
        set.observe(dec!(100), Decimal::ZERO);
        set.observe(dec!(101), Decimal::ZERO);
        // Slow window not full yet.
        assert!(!set.pass(Side::Buy, dec!(101)));
    }

    #[test]
    fn ma_crossover_direction_matches_side() {
        let mut set = FilterSet::new(FilterConfig {
            ma: Some((2, 4)),
            ..FilterConfig::default()
        });
        // Rising series: fast MA above slow MA.
        for p in [100, 101, 102, 103, 104] {
            set.observe(Decimal::from(p), Decimal::ZERO);
        }
        assert!(set.pass(Side::Buy, dec!(104)));
        assert!(!set.pass(Side::Sell, dec!(104)));

        // Falling series flips it.
        for p in [103, 101, 99, 97] {
            set.observe(Decimal::from(p), Decimal::ZERO);
        }
        assert!(set.pass(Side::Sell, dec!(97)));
        assert!(!set.pass(Side::Buy, dec!(97)));
    }

    #[test]
    fn vwap_requires_favorable_side() {
        let mut set = FilterSet::new(FilterConfig {
            vwap: true,
            ..FilterConfig::default()
        });
        // No volume yet: enabled but warming, so no pass.
        assert!(!set.pass(Side::Buy, dec!(100)));

        set.observe(dec!(100), dec!(10));
        set.observe(dec!(102), dec!(10));
        // VWAP = 101.
        assert!(set.pass(Side::Buy, dec!(102)));
        assert!(!set.pass(Side::Buy, dec!(100)));
        assert!(set.pass(Side::Sell, dec!(100)));
    }

    #[test]
    fn trend_stop_flips_on_cross() {
        let mut set = FilterSet::new(FilterConfig {
            trend_stop: Some(dec!(2)),
            ..FilterConfig::default()
        });
        set.observe(dec!(100), Decimal::ZERO);
        set.observe(dec!(103), Decimal::ZERO);
        assert!(set.pass(Side::Buy, dec!(103)));

        // Drop through the trailed line (101) flips the trend down.
        set.observe(dec!(99), Decimal::ZERO);
        assert!(set.pass(Side::Sell, dec!(99)));
        assert!(!set.pass(Side::Buy, dec!(99)));
    }
}
