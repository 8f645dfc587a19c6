//! Tick-driven orchestration.
//!
//! One scheduler task owns the row table outright. Every tick runs the same
//! fixed pipeline over each row — entry evaluation, leg reconciliation,
//! stop/target checks — then publishes a snapshot. Ticks never interleave:
//! the interval timer delays a missed tick rather than running two at once.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use optexec_core::{EngineConfig, LtpCache, TickErrorPolicy};

use crate::commands::EngineCommand;
use crate::fanout::Dispatcher;
use crate::reconcile;
use crate::row::{CloseReason, InstrumentRow, RowState};
use crate::snapshot::{self, Snapshot};
use crate::stops;

pub struct Scheduler {
    rows: Vec<InstrumentRow>,
    dispatcher: Dispatcher,
    ltp: Arc<LtpCache>,
    commands: mpsc::Receiver<EngineCommand>,
    snapshot_tx: watch::Sender<Snapshot>,
    cancel: CancellationToken,
    config: EngineConfig,
    /// Manual close requests not yet applied (e.g. rows with no price).
    pending_close: HashSet<usize>,
}

impl Scheduler {
    /// Build a scheduler and the snapshot receiver external consumers read.
    #[must_use]
    pub fn new(
        rows: Vec<InstrumentRow>,
        dispatcher: Dispatcher,
        ltp: Arc<LtpCache>,
        commands: mpsc::Receiver<EngineCommand>,
        cancel: CancellationToken,
        config: EngineConfig,
    ) -> (Self, watch::Receiver<Snapshot>) {
        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::default());
        (
            Self {
                rows,
                dispatcher,
                ltp,
                commands,
                snapshot_tx,
                cancel,
                config,
                pending_close: HashSet::new(),
            },
            snapshot_rx,
        )
    }

    #[must_use]
    pub fn rows(&self) -> &[InstrumentRow] {
        &self.rows
    }

    /// Run the periodic tick loop until cancelled or, under the fail-stop
    /// policy, until a row error escalates.
    pub async fn run(mut self) -> Result<()> {
        let period = Duration::from_secs(self.config.tick_interval_secs.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            rows = self.rows.len(),
            users = self.dispatcher.sessions().len(),
            period_secs = period.as_secs(),
            policy = ?self.config.error_policy,
            "engine started"
        );

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("engine stopped");
                    return Ok(());
                }
                _ = interval.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        self.cancel.cancel();
                        tracing::error!(error = %e, "engine stopped on tick error");
                        return Err(e);
                    }
                }
            }
        }
    }

    /// One full pass over the table. Public so tests can drive the engine
    /// with an explicit clock.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.drain_commands();
        if self.cancel.is_cancelled() {
            return Ok(());
        }

        for idx in 0..self.rows.len() {
            let manual = self.pending_close.contains(&idx);
            match self.process_row(idx, now, manual).await {
                Ok(manual_handled) => {
                    if manual_handled {
                        self.pending_close.remove(&idx);
                    }
                }
                Err(e) => match self.config.error_policy {
                    TickErrorPolicy::FailStop => {
                        return Err(e.context(format!(
                            "row {idx} ({})",
                            self.rows[idx].symbol
                        )));
                    }
                    TickErrorPolicy::IsolateRows => {
                        tracing::warn!(
                            row = idx,
                            symbol = self.rows[idx].symbol,
                            error = %e,
                            "row failed this tick, continuing"
                        );
                    }
                },
            }
        }

        let snap = snapshot::build(&self.rows, &self.ltp, &self.dispatcher, now);
        let _ = self.snapshot_tx.send(snap);
        Ok(())
    }

    fn drain_commands(&mut self) {
        while let Ok(cmd) = self.commands.try_recv() {
            match cmd {
                EngineCommand::CloseRow(idx) => {
                    tracing::info!(row = idx, "manual close requested");
                    self.pending_close.insert(idx);
                }
                EngineCommand::Stop => {
                    tracing::info!("stop requested");
                    self.cancel.cancel();
                }
            }
        }
    }

    /// Returns whether a pending manual close was consumed.
    async fn process_row(&mut self, idx: usize, now: DateTime<Utc>, manual: bool) -> Result<bool> {
        let row = &mut self.rows[idx];
        if row.completed() {
            // Terminal for the day; also swallow stale close requests.
            return Ok(true);
        }

        // No price for either leg: leave the row untouched this tick.
        let Some(ce) = self.ltp.get(row.call.token) else {
            return Ok(false);
        };
        let Some(pe_ltp) = self.ltp.price(row.put.token) else {
            return Ok(false);
        };
        let ce_ltp = ce.price;
        let t = now.time();
        let dispatcher = &self.dispatcher;

        match row.state {
            RowState::AwaitingEntry => {
                row.filters.observe(ce.price, ce.volume);
                if manual {
                    row.state = RowState::Completed;
                    row.close_reason = Some(CloseReason::Manual);
                    tracing::info!(row = row.id, "closed before entry");
                    return Ok(true);
                }
                if row.past_exit_time(t) {
                    row.state = RowState::Completed;
                    row.close_reason = Some(CloseReason::TimeExit);
                    tracing::info!(row = row.id, "exit time reached before entry");
                    return Ok(false);
                }
                if row.within_entry_window(t) && row.filters.pass(row.side, ce_ltp) {
                    reconcile::place_entry(row, dispatcher, ce_ltp, pe_ltp, now).await?;
                }
                Ok(false)
            }
            RowState::EntryPlaced => {
                if manual {
                    reconcile::close_row(row, dispatcher, ce_ltp, pe_ltp, now, CloseReason::Manual)
                        .await?;
                    return Ok(true);
                }
                if row.past_exit_time(t) {
                    reconcile::close_row(
                        row,
                        dispatcher,
                        ce_ltp,
                        pe_ltp,
                        now,
                        CloseReason::TimeExit,
                    )
                    .await?;
                    return Ok(false);
                }
                reconcile::reconcile(row, dispatcher, ce_ltp, pe_ltp, now).await?;
                Ok(false)
            }
            RowState::Open => {
                stops::arm_levels(&mut row.call, row.side, row.stop_kind, row.target_kind);
                stops::arm_levels(&mut row.put, row.side, row.stop_kind, row.target_kind);
                stops::trail(&mut row.call, row.side, row.trail_kind, ce_ltp);
                stops::trail(&mut row.put, row.side, row.trail_kind, pe_ltp);

                if manual {
                    reconcile::close_row(row, dispatcher, ce_ltp, pe_ltp, now, CloseReason::Manual)
                        .await?;
                    return Ok(true);
                }
                // Exit time overrides stop/target.
                if row.past_exit_time(t) {
                    reconcile::close_row(
                        row,
                        dispatcher,
                        ce_ltp,
                        pe_ltp,
                        now,
                        CloseReason::TimeExit,
                    )
                    .await?;
                    return Ok(false);
                }
                let trigger = stops::exit_trigger(&row.call, row.side, ce_ltp)
                    .or_else(|| stops::exit_trigger(&row.put, row.side, pe_ltp));
                if let Some(reason) = trigger {
                    reconcile::close_row(row, dispatcher, ce_ltp, pe_ltp, now, reason).await?;
                }
                Ok(false)
            }
            RowState::Completed => Ok(true),
        }
    }
}
