//! End-to-end lifecycle runs against the paper broker, driven by explicit
//! `tick(now)` calls so every test controls the clock.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use optexec_broker_paper::PaperBroker;
use optexec_core::{EngineConfig, LtpCache, Tick, UserBrokerSession};
use optexec_engine::{
    load_rows_from_reader, CloseReason, Dispatcher, EngineCommand, RowState, Scheduler, Snapshot,
};

const HEADER: &str = "Transaction_Type,Entry_Time,Exit_Time,Buy_Ltp_Percent,Sell_Ltp_Percent,Wait_Time,Symbol Name,Expiry Date,CE_Instrument,PE_Instrument,CE_Token,PE_Token,Exchange,No. of lots,Lot_Size,stoploss_type,CE_Stoploss,PE_Stoploss,tsl_type,CE_TSL,PE_TSL,target_type,CE_target,PE_target";

const CE: &str = "NIFTY26AUG24000CE";
const PE: &str = "NIFTY26AUG24000PE";
const CE_TOKEN: u32 = 1001;
const PE_TOKEN: u32 = 1002;

fn sheet_line(
    side: &str,
    ltp_percent: &str,
    wait_secs: u64,
    stop_type: &str,
    stop: &str,
    target: &str,
) -> String {
    format!(
        "{side},09.25.00,15.10.00,{ltp_percent},{ltp_percent},{wait_secs},NIFTY,2026-08-27,\
         {CE},{PE},{CE_TOKEN},{PE_TOKEN},NFO,2,50,{stop_type},{stop},{stop},Value,0,0,\
         Percentage,{target},{target}"
    )
}

struct Harness {
    scheduler: Scheduler,
    brokers: Vec<Arc<PaperBroker>>,
    ltp: Arc<LtpCache>,
    commands: mpsc::Sender<EngineCommand>,
    cancel: CancellationToken,
    snapshots: watch::Receiver<Snapshot>,
}

impl Harness {
    fn from_line(line: &str) -> Self {
        Self::with_users(line, &[("u1", 1)])
    }

    /// One paper broker per user session, each with its own book.
    fn with_users(line: &str, users: &[(&str, u32)]) -> Self {
        let data = format!("{HEADER}\n{line}");
        let rows = load_rows_from_reader(data.as_bytes()).unwrap();

        let brokers: Vec<Arc<PaperBroker>> =
            users.iter().map(|_| Arc::new(PaperBroker::new())).collect();
        let sessions = users
            .iter()
            .zip(&brokers)
            .map(|(&(user_id, multiplier), broker)| {
                UserBrokerSession::new(user_id, multiplier, broker.clone())
            })
            .collect();
        let config = EngineConfig::default();
        let dispatcher = Dispatcher::new(sessions, &config);

        let ltp = Arc::new(LtpCache::new());
        let (command_tx, command_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let (scheduler, snapshots) = Scheduler::new(
            rows,
            dispatcher,
            ltp.clone(),
            command_rx,
            cancel.clone(),
            config,
        );

        Self {
            scheduler,
            brokers,
            ltp,
            commands: command_tx,
            cancel,
            snapshots,
        }
    }

    /// Publish a price to the scheduler's cache and every broker book alike.
    fn mark(&self, token: u32, symbol: &str, price: Decimal) {
        self.feed(token, price);
        for broker in &self.brokers {
            broker.set_price(symbol, price);
        }
    }

    /// Cache-only price update, leaving the broker book where it was.
    fn feed(&self, token: u32, price: Decimal) {
        self.ltp.apply(&Tick {
            token,
            price,
            volume: dec!(100),
            ts: Utc::now(),
        });
    }

    async fn tick_at(&mut self, h: u32, m: u32, s: u32) {
        let now = at(h, m, s);
        self.scheduler.tick(now).await.unwrap();
    }

    fn row(&self) -> &optexec_engine::InstrumentRow {
        &self.scheduler.rows()[0]
    }
}

fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 8, 24, h, m, s).unwrap()
}

#[tokio::test]
async fn buy_row_rides_to_target() {
    let mut h = Harness::from_line(&sheet_line("Buy", "0", 30, "Percentage", "20", "80"));
    h.mark(CE_TOKEN, CE, dec!(100));
    h.mark(PE_TOKEN, PE, dec!(100));

    // Entry fires inside the window; zero-percent limits fill at once.
    h.tick_at(9, 25, 0).await;
    assert_eq!(h.row().state, RowState::EntryPlaced);

    h.tick_at(9, 25, 1).await;
    assert_eq!(h.row().state, RowState::Open);
    assert_eq!(h.row().call.entry_price, Some(dec!(100)));
    assert_eq!(h.row().put.entry_price, Some(dec!(100)));

    // Stop 80 / target 180 get armed from the entry; 181 takes the target.
    h.mark(CE_TOKEN, CE, dec!(181));
    h.tick_at(9, 25, 2).await;

    let row = h.row();
    assert_eq!(row.state, RowState::Completed);
    assert_eq!(row.close_reason, Some(CloseReason::Target));
    assert_eq!(row.call.exit_price, Some(dec!(181)));
    assert_eq!(row.put.exit_price, Some(dec!(100)));
    assert!(row.exited_at.is_some());

    let snap = h.snapshots.borrow().clone();
    assert_eq!(snap.rows[0].state, "completed");
}

#[tokio::test]
async fn sell_row_stops_out_on_value_stop() {
    let mut h = Harness::from_line(&sheet_line("Sell", "0", 30, "Value", "10", "80"));
    h.mark(CE_TOKEN, CE, dec!(50));
    h.mark(PE_TOKEN, PE, dec!(50));

    h.tick_at(9, 25, 0).await;
    h.tick_at(9, 25, 1).await;
    assert_eq!(h.row().state, RowState::Open);
    assert_eq!(h.row().put.entry_price, Some(dec!(50)));

    // Sell stop sits above the entry at 60; 61 crosses it.
    h.mark(PE_TOKEN, PE, dec!(61));
    h.tick_at(9, 25, 2).await;

    let row = h.row();
    assert_eq!(row.state, RowState::Completed);
    assert_eq!(row.close_reason, Some(CloseReason::StopLoss));
    assert_eq!(row.put.exit_price, Some(dec!(61)));
    assert_eq!(row.call.exit_price, Some(dec!(50)));
}

#[tokio::test]
async fn unfilled_leg_shifts_to_market_after_wait_time() {
    let mut h = Harness::from_line(&sheet_line("Buy", "1", 30, "Percentage", "20", "80"));
    h.mark(CE_TOKEN, CE, dec!(100));
    h.mark(PE_TOKEN, PE, dec!(100));

    // Limits rest at 99; neither leg fills on placement.
    h.tick_at(9, 25, 0).await;
    assert_eq!(h.row().state, RowState::EntryPlaced);
    assert_eq!(h.row().call.limit_price, Some(dec!(99.00)));

    // The CE order fills at the broker without the cached price moving:
    // a dip in the book sweeps the resting limit, then the book recovers.
    h.brokers[0].set_price(CE, dec!(99));
    h.brokers[0].set_price(CE, dec!(100));

    // Status-reported fill on CE only; PE stays working and is not forced.
    h.tick_at(9, 25, 1).await;
    let row = h.row();
    assert_eq!(row.state, RowState::EntryPlaced);
    assert_eq!(row.call.entry_price, Some(dec!(100)));
    assert!(row.put.entry_price.is_none());
    assert_eq!(h.brokers[0].order_count(), 2);

    // Wait time elapses: the PE limit is cancelled and resubmitted at market.
    h.tick_at(9, 25, 31).await;
    let row = h.row();
    assert_eq!(row.state, RowState::Open);
    assert!(row.shifted_to_market);
    assert_eq!(row.put.entry_price, Some(dec!(100)));
    assert_eq!(h.brokers[0].order_count(), 3);

    // The conversion happens exactly once.
    h.tick_at(9, 25, 32).await;
    assert_eq!(h.brokers[0].order_count(), 3);
}

#[tokio::test]
async fn crossed_leg_forces_the_other_to_market() {
    let mut h = Harness::from_line(&sheet_line("Buy", "1", 300, "Percentage", "20", "80"));
    h.mark(CE_TOKEN, CE, dec!(100));
    h.mark(PE_TOKEN, PE, dec!(100));

    h.tick_at(9, 25, 0).await;
    assert_eq!(h.row().state, RowState::EntryPlaced);

    // CE trades through its 99 limit; PE is dragged along at market well
    // before the five-minute wait expires.
    h.mark(CE_TOKEN, CE, dec!(98));
    h.tick_at(9, 25, 1).await;

    let row = h.row();
    assert_eq!(row.state, RowState::Open);
    assert_eq!(row.call.entry_price, Some(dec!(98)));
    assert_eq!(row.put.entry_price, Some(dec!(100)));
    assert!(!row.shifted_to_market);
    // PE entry limit + PE market resubmit + CE entry limit.
    assert_eq!(h.brokers[0].order_count(), 3);
}

#[tokio::test]
async fn row_stays_idle_before_its_entry_window() {
    let mut h = Harness::from_line(&sheet_line("Buy", "0", 30, "Percentage", "20", "80"));
    h.mark(CE_TOKEN, CE, dec!(100));
    h.mark(PE_TOKEN, PE, dec!(100));

    h.tick_at(9, 0, 0).await;
    h.tick_at(9, 24, 59).await;

    assert_eq!(h.row().state, RowState::AwaitingEntry);
    assert_eq!(h.brokers[0].order_count(), 0);
}

#[tokio::test]
async fn row_without_prices_is_left_untouched() {
    let mut h = Harness::from_line(&sheet_line("Buy", "0", 30, "Percentage", "20", "80"));
    // CE only; the PE token never ticks.
    h.mark(CE_TOKEN, CE, dec!(100));

    h.tick_at(9, 25, 0).await;
    assert_eq!(h.row().state, RowState::AwaitingEntry);
    assert_eq!(h.brokers[0].order_count(), 0);
}

#[tokio::test]
async fn exit_time_closes_an_open_row() {
    let mut h = Harness::from_line(&sheet_line("Buy", "0", 30, "Percentage", "20", "80"));
    h.mark(CE_TOKEN, CE, dec!(100));
    h.mark(PE_TOKEN, PE, dec!(100));

    h.tick_at(9, 25, 0).await;
    h.tick_at(9, 25, 1).await;
    assert_eq!(h.row().state, RowState::Open);

    // Past 15:10 the row is flattened even though no stop or target fired.
    h.tick_at(15, 10, 0).await;
    let row = h.row();
    assert_eq!(row.state, RowState::Completed);
    assert_eq!(row.close_reason, Some(CloseReason::TimeExit));
}

#[tokio::test]
async fn exit_time_wins_over_a_simultaneous_target() {
    let mut h = Harness::from_line(&sheet_line("Buy", "0", 30, "Percentage", "20", "80"));
    h.mark(CE_TOKEN, CE, dec!(100));
    h.mark(PE_TOKEN, PE, dec!(100));

    h.tick_at(9, 25, 0).await;
    h.tick_at(9, 25, 1).await;

    // Target would also trigger on this tick; the clock takes precedence.
    h.mark(CE_TOKEN, CE, dec!(181));
    h.tick_at(15, 10, 0).await;
    assert_eq!(h.row().close_reason, Some(CloseReason::TimeExit));
}

#[tokio::test]
async fn manual_close_flattens_an_open_row() {
    let mut h = Harness::from_line(&sheet_line("Buy", "0", 30, "Percentage", "20", "80"));
    h.mark(CE_TOKEN, CE, dec!(100));
    h.mark(PE_TOKEN, PE, dec!(100));

    h.tick_at(9, 25, 0).await;
    h.tick_at(9, 25, 1).await;
    assert_eq!(h.row().state, RowState::Open);

    h.commands.send(EngineCommand::CloseRow(0)).await.unwrap();
    h.tick_at(9, 30, 0).await;

    let row = h.row();
    assert_eq!(row.state, RowState::Completed);
    assert_eq!(row.close_reason, Some(CloseReason::Manual));
    assert_eq!(row.call.exit_price, Some(dec!(100)));
}

#[tokio::test]
async fn manual_close_before_entry_skips_the_trade() {
    let mut h = Harness::from_line(&sheet_line("Buy", "0", 30, "Percentage", "20", "80"));
    h.mark(CE_TOKEN, CE, dec!(100));
    h.mark(PE_TOKEN, PE, dec!(100));

    h.commands.send(EngineCommand::CloseRow(0)).await.unwrap();
    h.tick_at(9, 25, 0).await;

    let row = h.row();
    assert_eq!(row.state, RowState::Completed);
    assert_eq!(row.close_reason, Some(CloseReason::Manual));
    assert_eq!(h.brokers[0].order_count(), 0);
}

#[tokio::test]
async fn market_conversion_skips_users_already_complete() {
    let mut h = Harness::with_users(
        &sheet_line("Buy", "1", 30, "Percentage", "20", "80"),
        &[("u1", 1), ("u2", 2)],
    );
    h.mark(CE_TOKEN, CE, dec!(100));
    h.mark(PE_TOKEN, PE, dec!(100));

    h.tick_at(9, 25, 0).await;
    assert_eq!(h.row().state, RowState::EntryPlaced);

    // u1's PE limit fills on a book dip at that broker only; the cached
    // price never crosses, and u2's order keeps resting.
    h.brokers[0].set_price(PE, dec!(99));
    h.brokers[0].set_price(PE, dec!(100));

    h.tick_at(9, 25, 1).await;
    assert_eq!(h.row().state, RowState::EntryPlaced);

    // Wait time: conversion is per user. u1's COMPLETE PE order is left
    // alone; u2's PE and both users' CE orders are cancelled and resubmitted
    // at market, quantity scaled by each user's multiplier.
    h.tick_at(9, 25, 31).await;
    assert_eq!(h.row().state, RowState::Open);
    assert_eq!(h.brokers[0].placed_quantities(PE), vec![100]);
    assert_eq!(h.brokers[1].placed_quantities(PE), vec![200, 200]);
    assert_eq!(h.brokers[0].placed_quantities(CE), vec![100, 100]);
    assert_eq!(h.brokers[1].placed_quantities(CE), vec![200, 200]);

    // Closing flattens every filled user at their own broker, per user.
    h.commands.send(EngineCommand::CloseRow(0)).await.unwrap();
    h.tick_at(9, 25, 32).await;
    assert_eq!(h.row().close_reason, Some(CloseReason::Manual));
    assert_eq!(h.brokers[0].placed_quantities(PE), vec![100, 100]);
    assert_eq!(h.brokers[1].placed_quantities(PE), vec![200, 200, 200]);
}

#[tokio::test]
async fn stop_command_cancels_before_any_placement() {
    let mut h = Harness::from_line(&sheet_line("Buy", "0", 30, "Percentage", "20", "80"));
    h.mark(CE_TOKEN, CE, dec!(100));
    h.mark(PE_TOKEN, PE, dec!(100));

    h.commands.send(EngineCommand::Stop).await.unwrap();
    h.tick_at(9, 25, 0).await;

    assert!(h.cancel.is_cancelled());
    assert_eq!(h.row().state, RowState::AwaitingEntry);
    assert_eq!(h.brokers[0].order_count(), 0);
}
