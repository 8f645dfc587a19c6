//! Sheet loading: one CSV row per configured leg-pair.
//!
//! Validation failures here are fatal — the scheduler never starts on a bad
//! sheet.

use std::io::Read;
use std::path::Path;
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

use optexec_core::{LegSide, Side, ThresholdKind};

use crate::filters::{FilterConfig, FilterSet};
use crate::row::{InstrumentRow, Leg, RowState};

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("cannot read sheet: {0}")]
    Read(#[from] csv::Error),

    #[error("row {row}: invalid time {value:?} (expected HH.MM.SS)")]
    InvalidTime { row: usize, value: String },

    #[error("row {row}: entry time {entry} is not before exit time {exit}")]
    WindowOrder {
        row: usize,
        entry: NaiveTime,
        exit: NaiveTime,
    },

    #[error("row {row}: lots and lot size must both be non-zero")]
    ZeroQuantity { row: usize },

    #[error("row {row}: lots x lot size overflows the order quantity")]
    QuantityOverflow { row: usize },

    #[error("row {row}: Ma_Fast and Ma_Slow must be set together, fast < slow")]
    BadMaPeriods { row: usize },
}

/// Raw CSV record. Column names follow the sheet format; the optional
/// trailing columns configure entry filters and default to disabled.
#[derive(Debug, Deserialize)]
pub struct RowConfig {
    #[serde(rename = "Transaction_Type")]
    pub transaction_type: Side,
    #[serde(rename = "Entry_Time")]
    pub entry_time: String,
    #[serde(rename = "Exit_Time")]
    pub exit_time: String,
    #[serde(rename = "Buy_Ltp_Percent")]
    pub buy_ltp_percent: Decimal,
    #[serde(rename = "Sell_Ltp_Percent")]
    pub sell_ltp_percent: Decimal,
    /// Seconds to wait for limit fills before shifting to market.
    #[serde(rename = "Wait_Time")]
    pub wait_time: u64,
    #[serde(rename = "Symbol Name")]
    pub symbol: String,
    #[serde(rename = "Expiry Date")]
    pub expiry: NaiveDate,
    #[serde(rename = "CE_Instrument")]
    pub ce_instrument: String,
    #[serde(rename = "PE_Instrument")]
    pub pe_instrument: String,
    #[serde(rename = "CE_Token")]
    pub ce_token: u32,
    #[serde(rename = "PE_Token")]
    pub pe_token: u32,
    #[serde(rename = "Exchange")]
    pub exchange: String,
    #[serde(rename = "No. of lots")]
    pub lots: u32,
    #[serde(rename = "Lot_Size")]
    pub lot_size: u32,
    #[serde(rename = "stoploss_type")]
    pub stoploss_type: ThresholdKind,
    #[serde(rename = "CE_Stoploss")]
    pub ce_stoploss: Decimal,
    #[serde(rename = "PE_Stoploss")]
    pub pe_stoploss: Decimal,
    #[serde(rename = "tsl_type")]
    pub tsl_type: ThresholdKind,
    #[serde(rename = "CE_TSL")]
    pub ce_tsl: Decimal,
    #[serde(rename = "PE_TSL")]
    pub pe_tsl: Decimal,
    #[serde(rename = "target_type")]
    pub target_type: ThresholdKind,
    #[serde(rename = "CE_target")]
    pub ce_target: Decimal,
    #[serde(rename = "PE_target")]
    pub pe_target: Decimal,

    #[serde(rename = "Ma_Fast", default)]
    pub ma_fast: Option<usize>,
    #[serde(rename = "Ma_Slow", default)]
    pub ma_slow: Option<usize>,
    #[serde(rename = "Use_Vwap", default)]
    pub use_vwap: Option<bool>,
    #[serde(rename = "Trend_Stop", default)]
    pub trend_stop: Option<Decimal>,
    #[serde(rename = "Price_Above", default)]
    pub price_above: Option<Decimal>,
    #[serde(rename = "Price_Below", default)]
    pub price_below: Option<Decimal>,
}

/// Load and validate a sheet from disk.
pub fn load_rows(path: impl AsRef<Path>) -> Result<Vec<InstrumentRow>, SheetError> {
    let reader = csv::Reader::from_path(path)?;
    rows_from(reader)
}

/// Load and validate a sheet from any reader (tests feed strings through
/// this).
pub fn load_rows_from_reader(rdr: impl Read) -> Result<Vec<InstrumentRow>, SheetError> {
    rows_from(csv::Reader::from_reader(rdr))
}

fn rows_from<R: Read>(mut reader: csv::Reader<R>) -> Result<Vec<InstrumentRow>, SheetError> {
    let mut rows = Vec::new();
    for (idx, record) in reader.deserialize::<RowConfig>().enumerate() {
        let config = record?;
        rows.push(build_row(idx, config)?);
    }
    tracing::info!(rows = rows.len(), "sheet loaded");
    Ok(rows)
}

fn build_row(idx: usize, config: RowConfig) -> Result<InstrumentRow, SheetError> {
    let entry_time = parse_time(idx, &config.entry_time)?;
    let exit_time = parse_time(idx, &config.exit_time)?;
    if entry_time >= exit_time {
        return Err(SheetError::WindowOrder {
            row: idx,
            entry: entry_time,
            exit: exit_time,
        });
    }
    if config.lots == 0 || config.lot_size == 0 {
        return Err(SheetError::ZeroQuantity { row: idx });
    }
    let quantity = config
        .lots
        .checked_mul(config.lot_size)
        .ok_or(SheetError::QuantityOverflow { row: idx })?;

    let ma = match (config.ma_fast, config.ma_slow) {
        (None, None) => None,
        (Some(fast), Some(slow)) if fast > 0 && fast < slow => Some((fast, slow)),
        _ => return Err(SheetError::BadMaPeriods { row: idx }),
    };
    let filters = FilterSet::new(FilterConfig {
        ma,
        vwap: config.use_vwap.unwrap_or(false),
        trend_stop: config.trend_stop,
        price_above: config.price_above,
        price_below: config.price_below,
    });

    Ok(InstrumentRow {
        id: idx,
        symbol: config.symbol,
        exchange: config.exchange,
        expiry: config.expiry,
        side: config.transaction_type,
        entry_time,
        exit_time,
        wait_time: Duration::from_secs(config.wait_time),
        buy_ltp_percent: config.buy_ltp_percent,
        sell_ltp_percent: config.sell_ltp_percent,
        lots: config.lots,
        lot_size: config.lot_size,
        // Computed exactly once; never recomputed after load.
        quantity,
        stop_kind: config.stoploss_type,
        trail_kind: config.tsl_type,
        target_kind: config.target_type,
        call: Leg::new(
            LegSide::Call,
            config.ce_instrument,
            config.ce_token,
            config.ce_stoploss,
            config.ce_tsl,
            config.ce_target,
        ),
        put: Leg::new(
            LegSide::Put,
            config.pe_instrument,
            config.pe_token,
            config.pe_stoploss,
            config.pe_tsl,
            config.pe_target,
        ),
        state: RowState::AwaitingEntry,
        placed_at: None,
        entered_at: None,
        exited_at: None,
        close_reason: None,
        shifted_to_market: false,
        filters,
    })
}

fn parse_time(row: usize, value: &str) -> Result<NaiveTime, SheetError> {
    NaiveTime::parse_from_str(value, "%H.%M.%S").map_err(|_| SheetError::InvalidTime {
        row,
        value: value.to_string(),
    })
}
