/// Streaming tick-to-bar consolidation
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::error::{ConversionError, Result};
use crate::types::{Ohlc, QuoteBar, Resolution, Tick};

/// Bar in progress (not yet sealed)
#[derive(Debug, Clone)]
struct PartialBar {
    time: NaiveDateTime,
    bid: Option<Ohlc>,
    ask: Option<Ohlc>,
    last_bid_size: i64,
    last_ask_size: i64,
    tick_count: usize,
}

impl PartialBar {
    fn new(time: NaiveDateTime, tick: &Tick) -> Self {
        PartialBar {
            time,
            bid: tick.bid_price.map(Ohlc::from_price),
            ask: tick.ask_price.map(Ohlc::from_price),
            last_bid_size: tick.bid_size,
            last_ask_size: tick.ask_size,
            tick_count: 1,
        }
    }

    fn update(&mut self, tick: &Tick) {
        if let Some(price) = tick.bid_price {
            merge_side(&mut self.bid, price);
            self.last_bid_size = tick.bid_size;
        }
        if let Some(price) = tick.ask_price {
            merge_side(&mut self.ask, price);
            self.last_ask_size = tick.ask_size;
        }
        self.tick_count += 1;
    }

    fn to_bar(&self, symbol: &str, resolution: Resolution) -> QuoteBar {
        QuoteBar {
            time: self.time,
            symbol: symbol.to_string(),
            resolution,
            bid: self.bid,
            ask: self.ask,
            last_bid_size: self.last_bid_size,
            last_ask_size: self.last_ask_size,
        }
    }
}

fn merge_side(side: &mut Option<Ohlc>, price: Decimal) {
    match side {
        Some(quad) => quad.update(price),
        None => *side = Some(Ohlc::from_price(price)),
    }
}

/// Quote bar consolidator for a single symbol and resolution
///
/// Owns at most one open bar. `update` hands back the previous bar once a
/// tick lands in a later bucket; `scan` flushes whatever is still open.
/// Not meant to be shared: one instance per worker and stream.
pub struct QuoteBarConsolidator {
    symbol: String,
    resolution: Resolution,
    current_bar: Option<PartialBar>,
    late_ticks: usize,
}

impl QuoteBarConsolidator {
    /// Bars carry the lowercased symbol, matching the on-disk layout
    pub fn new(symbol: &str, resolution: Resolution) -> Result<Self> {
        if resolution == Resolution::Tick {
            return Err(ConversionError::InvalidResolution(
                "cannot consolidate ticks into tick bars".to_string(),
            ));
        }
        Ok(QuoteBarConsolidator {
            symbol: symbol.to_lowercase(),
            resolution,
            current_bar: None,
            late_ticks: 0,
        })
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Process incoming tick, returning the bar it sealed, if any
    pub fn update(&mut self, tick: &Tick) -> Option<QuoteBar> {
        let key = self.resolution.bucket_key(tick.time);

        match self.current_bar.as_mut() {
            None => {
                self.current_bar = Some(PartialBar::new(key, tick));
                None
            }
            Some(bar) if bar.time == key => {
                bar.update(tick);
                None
            }
            Some(bar) if key < bar.time => {
                self.late_ticks += 1;
                warn!(
                    "Dropping late tick for {} {}: {} precedes open bar {}",
                    self.symbol, self.resolution, tick.time, bar.time
                );
                None
            }
            Some(bar) => {
                let completed_bar = bar.to_bar(&self.symbol, self.resolution);
                debug!(
                    "📊 Bar completed: {} {} @ {} from {} ticks",
                    self.symbol, self.resolution, completed_bar.time, bar.tick_count
                );
                *bar = PartialBar::new(key, tick);
                Some(completed_bar)
            }
        }
    }

    /// Flush the open bar at end of stream
    pub fn scan(&mut self) -> Option<QuoteBar> {
        let bar = self.current_bar.take()?;
        debug!(
            "✅ Flushed open bar: {} {} @ {}",
            self.symbol, self.resolution, bar.time
        );
        Some(bar.to_bar(&self.symbol, self.resolution))
    }

    /// Snapshot of the open bar (for monitoring)
    pub fn current_bar(&self) -> Option<QuoteBar> {
        self.current_bar
            .as_ref()
            .map(|b| b.to_bar(&self.symbol, self.resolution))
    }

    /// Ticks dropped because they arrived after their bucket was sealed
    pub fn late_ticks(&self) -> usize {
        self.late_ticks
    }
}
