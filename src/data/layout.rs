/// On-disk layout: archive paths and the quote line codec
///
/// ```text
/// {root}/{security_type}/{market}/{resolution}/{symbol}/{yyyyMMdd}_quote.zip
///     └── {yyyyMMdd}_{symbol}_{resolution}_quote.csv
/// ```
///
/// Every line, tick or bar, has the same eleven fields:
/// `msOffset,bidOpen,bidHigh,bidLow,bidClose,bidSize,askOpen,askHigh,askLow,askClose,askSize`
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::error::{ConversionError, Result};
use crate::types::{Ohlc, QuoteBar, Resolution};
use crate::utils::{format_file_date, offset_millis, time_from_offset};

pub const FIELD_COUNT: usize = 11;

/// Resolves archive locations for one security type and market
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
    security_type: String,
    market: String,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>, security_type: &str, market: &str) -> Self {
        DataLayout {
            root: root.into(),
            security_type: security_type.to_lowercase(),
            market: market.to_lowercase(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn market(&self) -> &str {
        &self.market
    }

    pub fn resolution_dir(&self, resolution: Resolution) -> PathBuf {
        self.root
            .join(&self.security_type)
            .join(&self.market)
            .join(resolution.as_str())
    }

    pub fn symbol_dir(&self, symbol: &str, resolution: Resolution) -> PathBuf {
        self.resolution_dir(resolution).join(symbol.to_lowercase())
    }

    pub fn archive_path(&self, symbol: &str, resolution: Resolution, date: NaiveDate) -> PathBuf {
        self.symbol_dir(symbol, resolution)
            .join(format!("{}_quote.zip", format_file_date(date)))
    }

    pub fn entry_name(symbol: &str, resolution: Resolution, date: NaiveDate) -> String {
        format!(
            "{}_{}_{}_quote.csv",
            format_file_date(date),
            symbol.to_lowercase(),
            resolution.as_str()
        )
    }
}

/// Encode a bar as one CSV record; the offset is relative to the bar's date
pub fn encode_bar(bar: &QuoteBar) -> Vec<String> {
    let mut fields = Vec::with_capacity(FIELD_COUNT);
    fields.push(offset_millis(bar.time).to_string());
    push_side(&mut fields, bar.bid.as_ref(), bar.last_bid_size);
    push_side(&mut fields, bar.ask.as_ref(), bar.last_ask_size);
    fields
}

fn push_side(fields: &mut Vec<String>, side: Option<&Ohlc>, size: i64) {
    match side {
        Some(quad) => {
            fields.push(quad.open.to_string());
            fields.push(quad.high.to_string());
            fields.push(quad.low.to_string());
            fields.push(quad.close.to_string());
        }
        None => fields.extend(std::iter::repeat(String::new()).take(4)),
    }
    fields.push(size.to_string());
}

/// Decode one bar record written by [`encode_bar`]
pub fn decode_bar(
    record: &csv::StringRecord,
    date: NaiveDate,
    symbol: &str,
    resolution: Resolution,
    source_name: &str,
    line: usize,
) -> Result<QuoteBar> {
    if record.len() != FIELD_COUNT {
        return Err(ConversionError::format(
            source_name,
            line,
            format!("expected {} fields, got {}", FIELD_COUNT, record.len()),
        ));
    }

    let offset = parse_offset(&record[0], source_name, line)?;
    let bid = decode_side(record, 1, source_name, line)?;
    let last_bid_size = parse_size(&record[5], source_name, line)?;
    let ask = decode_side(record, 6, source_name, line)?;
    let last_ask_size = parse_size(&record[10], source_name, line)?;

    Ok(QuoteBar {
        time: time_from_offset(date, offset),
        symbol: symbol.to_string(),
        resolution,
        bid,
        ask,
        last_bid_size,
        last_ask_size,
    })
}

/// Decode the four OHLC fields starting at `start`
///
/// All four empty means the side is absent; a partially empty side is malformed.
pub(crate) fn decode_side(
    record: &csv::StringRecord,
    start: usize,
    source_name: &str,
    line: usize,
) -> Result<Option<Ohlc>> {
    let fields: Vec<&str> = (start..start + 4)
        .map(|i| record.get(i).unwrap_or("").trim())
        .collect();

    let empty = fields.iter().filter(|f| f.is_empty()).count();
    if empty == 4 {
        return Ok(None);
    }
    if empty != 0 {
        return Err(ConversionError::format(
            source_name,
            line,
            format!("partially empty quote at field {}", start),
        ));
    }

    Ok(Some(Ohlc {
        open: parse_price(fields[0], source_name, line)?,
        high: parse_price(fields[1], source_name, line)?,
        low: parse_price(fields[2], source_name, line)?,
        close: parse_price(fields[3], source_name, line)?,
    }))
}

pub(crate) fn parse_price(field: &str, source_name: &str, line: usize) -> Result<Decimal> {
    Decimal::from_str(field.trim()).map_err(|e| {
        ConversionError::format(source_name, line, format!("invalid price '{}': {}", field, e))
    })
}

const MILLIS_PER_DAY: i64 = 86_400_000;

pub(crate) fn parse_offset(field: &str, source_name: &str, line: usize) -> Result<i64> {
    let offset: i64 = field.trim().parse().map_err(|e| {
        ConversionError::format(source_name, line, format!("invalid time offset '{}': {}", field, e))
    })?;
    if !(0..MILLIS_PER_DAY).contains(&offset) {
        return Err(ConversionError::format(
            source_name,
            line,
            format!("time offset {} is outside the day", offset),
        ));
    }
    Ok(offset)
}

pub(crate) fn parse_size(field: &str, source_name: &str, line: usize) -> Result<i64> {
    field.trim().parse().map_err(|e| {
        ConversionError::format(source_name, line, format!("invalid size '{}': {}", field, e))
    })
}
