/// Core type definitions for the quote bar converter
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{Duration, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ConversionError;

/// Bucket resolution, ordered from finest to coarsest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Tick,
    Second,
    Minute,
    Hour,
    Daily,
}

impl Resolution {
    pub fn as_str(&self) -> &str {
        match self {
            Resolution::Tick => "tick",
            Resolution::Second => "second",
            Resolution::Minute => "minute",
            Resolution::Hour => "hour",
            Resolution::Daily => "daily",
        }
    }

    /// Fixed bucket width in milliseconds. Tick has none; Daily is nominal,
    /// its buckets follow the calendar date.
    pub fn duration_millis(&self) -> Option<i64> {
        match self {
            Resolution::Tick => None,
            Resolution::Second => Some(1_000),
            Resolution::Minute => Some(60_000),
            Resolution::Hour => Some(3_600_000),
            Resolution::Daily => Some(86_400_000),
        }
    }

    /// Truncate a timestamp to the start of its bucket
    pub fn bucket_key(&self, time: NaiveDateTime) -> NaiveDateTime {
        match self {
            Resolution::Tick => time,
            Resolution::Daily => time.date().and_time(NaiveTime::MIN),
            fixed => {
                let width = fixed.duration_millis().unwrap_or(1);
                let offset = time.and_utc().timestamp_millis().rem_euclid(width);
                time - Duration::milliseconds(offset)
            }
        }
    }

    /// Exclusive end of the bucket starting at `start`
    pub fn bucket_end(&self, start: NaiveDateTime) -> NaiveDateTime {
        match self {
            Resolution::Daily => start + Duration::days(1),
            other => start + Duration::milliseconds(other.duration_millis().unwrap_or(0)),
        }
    }
}

impl FromStr for Resolution {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tick" => Ok(Resolution::Tick),
            "second" => Ok(Resolution::Second),
            "minute" => Ok(Resolution::Minute),
            "hour" => Ok(Resolution::Hour),
            "daily" => Ok(Resolution::Daily),
            other => Err(ConversionError::InvalidResolution(format!("unknown resolution '{}'", other))),
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Open/high/low/close of one quote side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ohlc {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

impl Ohlc {
    pub fn from_price(price: Decimal) -> Self {
        Ohlc {
            open: price,
            high: price,
            low: price,
            close: price,
        }
    }

    pub fn update(&mut self, price: Decimal) {
        self.close = price;
        self.high = self.high.max(price);
        self.low = self.low.min(price);
    }
}

/// Single timestamped bid/ask quote from a tick file
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub time: NaiveDateTime,
    pub bid_price: Option<Decimal>,
    pub bid_size: i64,
    pub ask_price: Option<Decimal>,
    pub ask_size: i64,
}

/// OHLC quote bar; `time` is the bucket start
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteBar {
    pub time: NaiveDateTime,
    pub symbol: String,
    pub resolution: Resolution,
    pub bid: Option<Ohlc>,
    pub ask: Option<Ohlc>,
    pub last_bid_size: i64,
    pub last_ask_size: i64,
}

impl QuoteBar {
    pub fn end_time(&self) -> NaiveDateTime {
        self.resolution.bucket_end(self.time)
    }
}

/// How aggregated bars fill their size fields
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeAggregation {
    /// Sizes are left at zero
    #[default]
    Zero,
    /// Sizes of the last bar in the group
    Last,
}

/// One market of tick data to convert
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub market: String,
    #[serde(default = "default_security_type")]
    pub security_type: String,
}

/// Remote data library used when a file is missing locally
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub token: String,
}

/// Configuration for the converter
#[derive(Debug, Clone, Deserialize)]
pub struct ConverterConfig {
    #[serde(default = "default_data_directory")]
    pub data_directory: PathBuf,
    #[serde(default = "default_sources")]
    pub sources: Vec<SourceConfig>,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default)]
    pub size_aggregation: SizeAggregation,
    #[serde(default)]
    pub report_path: Option<PathBuf>,
    #[serde(default)]
    pub api: Option<ApiConfig>,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        ConverterConfig {
            data_directory: default_data_directory(),
            sources: default_sources(),
            max_workers: default_max_workers(),
            size_aggregation: SizeAggregation::default(),
            report_path: None,
            api: None,
        }
    }
}

fn default_security_type() -> String {
    "forex".to_string()
}

fn default_data_directory() -> PathBuf {
    PathBuf::from("data")
}

fn default_sources() -> Vec<SourceConfig> {
    vec![SourceConfig {
        market: "fxcm".to_string(),
        security_type: default_security_type(),
    }]
}

fn default_max_workers() -> usize {
    8
}
