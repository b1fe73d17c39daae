/// Bar retrieval: inverse of the bar writer
use std::io::{Cursor, ErrorKind, Read};
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::debug;
use zip::ZipArchive;

use crate::data::layout::{decode_bar, DataLayout};
use crate::data::provider::DataProvider;
use crate::data::tick_reader::TickReader;
use crate::error::{ConversionError, Result};
use crate::types::{QuoteBar, Resolution, Tick};
use crate::utils::{format_file_date, parse_file_date};

/// Reads stored bars and ticks through a data provider
pub struct BarReader<P: DataProvider> {
    provider: Arc<P>,
    layout: DataLayout,
}

impl<P: DataProvider> BarReader<P> {
    pub fn new(provider: Arc<P>, layout: DataLayout) -> Self {
        BarReader { provider, layout }
    }

    /// All bars stored for `symbol` at `resolution` on `date`
    pub async fn read(&self, symbol: &str, resolution: Resolution, date: NaiveDate) -> Result<Vec<QuoteBar>> {
        if resolution == Resolution::Tick {
            return Err(ConversionError::InvalidResolution(
                "tick files hold ticks, use read_ticks".to_string(),
            ));
        }

        let path = self.layout.archive_path(symbol, resolution, date);
        let bytes = self.provider.fetch(&path).await?.ok_or_else(|| {
            ConversionError::NotFound(path.display().to_string())
        })?;

        let bars = decode_archive(bytes, &path.display().to_string(), date, &symbol.to_lowercase(), resolution)?;
        debug!("Read {} {} bars for {} on {}", bars.len(), resolution, symbol, date);
        Ok(bars)
    }

    /// Bars for every stored day in `from..=to`; missing days are skipped
    pub async fn read_range(
        &self,
        symbol: &str,
        resolution: Resolution,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<QuoteBar>> {
        let mut bars = Vec::new();
        for date in from.iter_days().take_while(|d| *d <= to) {
            match self.read(symbol, resolution, date).await {
                Ok(day) => bars.extend(day),
                Err(ConversionError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(bars)
    }

    /// Ticks of the raw source archive for `symbol` on `date`
    pub async fn read_ticks(&self, symbol: &str, date: NaiveDate) -> Result<Vec<Tick>> {
        let path = self.layout.archive_path(symbol, Resolution::Tick, date);
        let bytes = self.provider.fetch(&path).await?.ok_or_else(|| {
            ConversionError::NotFound(path.display().to_string())
        })?;
        TickReader::open(&path.display().to_string(), bytes)?.collect()
    }

    /// Dates with a stored archive for `symbol` at `resolution`, ascending
    ///
    /// Lists the local directory, so remote-only files are not included.
    pub async fn available_dates(&self, symbol: &str, resolution: Resolution) -> Result<Vec<NaiveDate>> {
        let dir = self.layout.symbol_dir(symbol, resolution);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ConversionError::NotFound(dir.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut dates = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with("_quote.zip") {
                continue;
            }
            if let Some(date) = parse_file_date(&name) {
                if name == format!("{}_quote.zip", format_file_date(date)) {
                    dates.push(date);
                }
            }
        }

        dates.sort();
        Ok(dates)
    }
}

/// Decode every entry of a bar archive
pub fn decode_archive(
    bytes: Vec<u8>,
    source_name: &str,
    date: NaiveDate,
    symbol: &str,
    resolution: Resolution,
) -> Result<Vec<QuoteBar>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(|e| {
        ConversionError::format(source_name, 0, format!("unreadable archive: {}", e))
    })?;

    let mut bars = Vec::new();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let entry_name = entry.name().to_string();
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents)?;

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(contents.as_slice());

        for result in reader.records() {
            let record = result.map_err(|e| {
                let line = e.position().map(|p| p.line() as usize).unwrap_or(0);
                ConversionError::format(&entry_name, line, e.to_string())
            })?;
            let line = record.position().map(|p| p.line() as usize).unwrap_or(0);
            bars.push(decode_bar(&record, date, symbol, resolution, &entry_name, line)?);
        }
    }
    Ok(bars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::bar_writer::{build_archive, BarWriter};
    use crate::data::consolidator::QuoteBarConsolidator;
    use crate::data::provider::DefaultDataProvider;
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn may(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2014, 5, day).unwrap()
    }

    fn ticks() -> Vec<Tick> {
        let mut ticks = Vec::new();
        for i in 0..240i64 {
            let time = may(1).and_hms_opt(23, 58, 0).unwrap() + chrono::Duration::milliseconds(i * 1_250);
            ticks.push(Tick {
                time,
                bid_price: if i % 7 == 3 { None } else { Some(Decimal::new(11000 + (i * 37) % 23, 4)) },
                bid_size: i % 5,
                ask_price: if i % 11 == 0 { None } else { Some(Decimal::new(110030 + (i * 13) % 17, 5)) },
                ask_size: i % 3,
            });
        }
        ticks
    }

    #[tokio::test]
    async fn test_writer_reader_roundtrip() {
        let dir = TempDir::new().unwrap();
        let layout = DataLayout::new(dir.path(), "forex", "fxcm");

        let mut consolidator = QuoteBarConsolidator::new("eurusd", Resolution::Second).unwrap();
        let mut bars: Vec<QuoteBar> = ticks().iter().filter_map(|t| consolidator.update(t)).collect();
        bars.extend(consolidator.scan());

        BarWriter::new(layout.clone(), "eurusd", Resolution::Second)
            .write(&bars)
            .await
            .unwrap();

        let reader = BarReader::new(Arc::new(DefaultDataProvider), layout);
        let read_back = reader
            .read_range("eurusd", Resolution::Second, may(1), may(3))
            .await
            .unwrap();
        assert_eq!(read_back, bars);

        let dates = reader.available_dates("eurusd", Resolution::Second).await.unwrap();
        assert_eq!(dates, vec![may(1), may(2)]);
    }

    #[tokio::test]
    async fn test_roundtrip_with_uppercase_symbol() {
        let dir = TempDir::new().unwrap();
        let layout = DataLayout::new(dir.path(), "forex", "fxcm");

        let mut consolidator = QuoteBarConsolidator::new("EURUSD", Resolution::Minute).unwrap();
        let mut bars: Vec<QuoteBar> = ticks().iter().filter_map(|t| consolidator.update(t)).collect();
        bars.extend(consolidator.scan());

        BarWriter::new(layout.clone(), "EURUSD", Resolution::Minute)
            .write(&bars)
            .await
            .unwrap();

        let reader = BarReader::new(Arc::new(DefaultDataProvider), layout);
        let read_back = reader
            .read_range("EURUSD", Resolution::Minute, may(1), may(2))
            .await
            .unwrap();
        assert_eq!(read_back, bars);
    }

    #[tokio::test]
    async fn test_missing_archive_is_not_found() {
        let dir = TempDir::new().unwrap();
        let reader = BarReader::new(Arc::new(DefaultDataProvider), DataLayout::new(dir.path(), "forex", "fxcm"));
        assert!(matches!(
            reader.read("eurusd", Resolution::Minute, may(1)).await,
            Err(ConversionError::NotFound(_))
        ));
        assert!(matches!(
            reader.available_dates("eurusd", Resolution::Minute).await,
            Err(ConversionError::NotFound(_))
        ));
    }

    #[test]
    fn test_decode_archive_rejects_short_line() {
        let bytes = build_archive("20140501_eurusd_minute_quote.csv", b"0,1,1,1,1,1,,,,,0\n60000,1,1,1\n").unwrap();
        let err = decode_archive(bytes, "test.zip", may(1), "eurusd", Resolution::Minute).unwrap_err();
        match err {
            ConversionError::Format { line, .. } => assert_eq!(line, 2),
            other => panic!("expected format error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_ticks() {
        let dir = TempDir::new().unwrap();
        let layout = DataLayout::new(dir.path(), "forex", "fxcm");
        let path = layout.archive_path("eurusd", Resolution::Tick, may(1));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            build_archive("20140501_eurusd_tick_quote.csv", b"1000,1.1,1.2\n").unwrap(),
        )
        .unwrap();

        let reader = BarReader::new(Arc::new(DefaultDataProvider), layout);
        let ticks = reader.read_ticks("eurusd", may(1)).await.unwrap();
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].ask_price, Some(Decimal::new(12, 1)));
    }
}
