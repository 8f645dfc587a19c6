//! Last-traded-price cache.
//!
//! One writer (the market-feed task) and one reader (the scheduler) touch
//! the cache concurrently, so it sits on a `DashMap` rather than a plain
//! `HashMap` behind the scheduler.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use crate::types::Tick;

/// Latest observation for one instrument token.
#[derive(Debug, Clone, Copy)]
pub struct LtpEntry {
    pub price: Decimal,
    pub volume: Decimal,
    pub ts: DateTime<Utc>,
}

/// Concurrent map from instrument token to its latest traded price.
///
/// `get` returns `None` until the feed has delivered at least one tick for
/// the token; the scheduler skips rows whose legs have no price yet.
#[derive(Debug, Default)]
pub struct LtpCache {
    entries: DashMap<u32, LtpEntry>,
}

impl LtpCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&self, tick: &Tick) {
        self.entries.insert(
            tick.token,
            LtpEntry {
                price: tick.price,
                volume: tick.volume,
                ts: tick.ts,
            },
        );
    }

    #[must_use]
    pub fn get(&self, token: u32) -> Option<LtpEntry> {
        self.entries.get(&token).map(|e| *e)
    }

    #[must_use]
    pub fn price(&self, token: u32) -> Option<Decimal> {
        self.get(token).map(|e| e.price)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Drain feed ticks into the cache until the feed side hangs up.
///
/// The feed is an always-on producer independent of the scheduler; spawn
/// this on its own task.
pub async fn run_feed(cache: Arc<LtpCache>, mut rx: mpsc::Receiver<Tick>) {
    while let Some(tick) = rx.recv().await {
        cache.apply(&tick);
    }
    tracing::debug!("market feed channel closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn tick(token: u32, price: Decimal) -> Tick {
        Tick {
            token,
            price,
            volume: dec!(100),
            ts: Utc::now(),
        }
    }

    #[test]
    fn unknown_token_has_no_price() {
        let cache = LtpCache::new();
        assert!(cache.price(42).is_none());
    }

    #[test]
    fn apply_overwrites_previous_tick() {
        let cache = LtpCache::new();
        cache.apply(&tick(42, dec!(101.5)));
        cache.apply(&tick(42, dec!(102.0)));
        assert_eq!(cache.price(42), Some(dec!(102.0)));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn feed_task_writes_through_to_cache() {
        let cache = Arc::new(LtpCache::new());
        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(run_feed(cache.clone(), rx));

        tx.send(tick(7, dec!(55.25))).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(cache.price(7), Some(dec!(55.25)));
    }
}
