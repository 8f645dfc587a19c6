//! Tick-driven trade-lifecycle engine for options leg-pairs.
//!
//! A sheet of configured call+put rows is walked once per tick: entry
//! windows and optional filters gate order placement, both legs are
//! reconciled to near-simultaneous fills, stops and targets are armed once
//! and trailed in the trade's favor, and every order fans out across all
//! user broker sessions. A `watch` channel publishes a read-only snapshot
//! after each pass.

pub mod commands;
pub mod fanout;
pub mod filters;
pub mod reconcile;
pub mod row;
pub mod scheduler;
pub mod sheet;
pub mod snapshot;
pub mod stops;

pub use commands::EngineCommand;
pub use fanout::{Dispatcher, UserOrderOutcome};
pub use filters::{FilterConfig, FilterSet};
pub use row::{CloseReason, InstrumentRow, Leg, OrderRecord, RowState};
pub use scheduler::Scheduler;
pub use sheet::{load_rows, load_rows_from_reader, SheetError};
pub use snapshot::{LegSnapshot, RowSnapshot, Snapshot};
