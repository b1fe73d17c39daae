/// Re-bucketing of finer bars into coarser resolutions
use tracing::debug;

use crate::error::{ConversionError, Result};
use crate::types::{Ohlc, QuoteBar, Resolution, SizeAggregation};

/// Aggregates complete finer-resolution bars for one symbol
#[derive(Debug, Clone, Copy, Default)]
pub struct BarAggregator {
    size_aggregation: SizeAggregation,
}

impl BarAggregator {
    pub fn new(size_aggregation: SizeAggregation) -> Self {
        BarAggregator { size_aggregation }
    }

    /// Group `bars` by `target` bucket and reduce each group to one bar
    pub fn aggregate(&self, bars: &[QuoteBar], target: Resolution) -> Result<Vec<QuoteBar>> {
        if target == Resolution::Tick {
            return Err(ConversionError::InvalidResolution(
                "cannot aggregate into tick resolution".to_string(),
            ));
        }
        if let Some(bar) = bars.iter().find(|b| b.resolution >= target) {
            return Err(ConversionError::InvalidResolution(format!(
                "{} bars cannot be aggregated into {}",
                bar.resolution, target
            )));
        }

        let mut ordered: Vec<&QuoteBar> = bars.iter().collect();
        ordered.sort_by_key(|b| b.time);

        let mut aggregated = Vec::new();
        for group in ordered.chunk_by(|a, b| target.bucket_key(a.time) == target.bucket_key(b.time)) {
            aggregated.push(self.reduce(group, target));
        }

        debug!(
            "Aggregated {} bars into {} {} bars",
            bars.len(),
            aggregated.len(),
            target
        );
        Ok(aggregated)
    }

    fn reduce(&self, group: &[&QuoteBar], target: Resolution) -> QuoteBar {
        let first = group[0];
        let last = group[group.len() - 1];

        let (last_bid_size, last_ask_size) = match self.size_aggregation {
            SizeAggregation::Zero => (0, 0),
            SizeAggregation::Last => (last.last_bid_size, last.last_ask_size),
        };

        QuoteBar {
            time: target.bucket_key(first.time),
            symbol: first.symbol.clone(),
            resolution: target,
            bid: reduce_side(group.iter().filter_map(|b| b.bid.as_ref())),
            ask: reduce_side(group.iter().filter_map(|b| b.ask.as_ref())),
            last_bid_size,
            last_ask_size,
        }
    }
}

/// Combine a time-ordered run of quotes; `None` if no bar had the side
fn reduce_side<'a>(mut quads: impl Iterator<Item = &'a Ohlc>) -> Option<Ohlc> {
    let first = quads.next()?;
    let mut result = *first;
    for quad in quads {
        result.high = result.high.max(quad.high);
        result.low = result.low.min(quad.low);
        result.close = quad.close;
    }
    Some(result)
}
