/// Lazy tick decoding from per-day source files
use std::io::{Cursor, Read};

use chrono::NaiveDate;
use flate2::read::GzDecoder;
use tracing::debug;
use zip::ZipArchive;

use crate::data::layout::{decode_side, parse_offset, parse_price, parse_size, FIELD_COUNT};
use crate::error::{ConversionError, Result};
use crate::types::Tick;
use crate::utils::{parse_file_date, time_from_offset};

/// Compact forex layout: `msOffset,bid,ask`
const COMPACT_FIELD_COUNT: usize = 3;

type RecordIter = csv::StringRecordsIntoIter<Box<dyn Read + Send>>;

struct EntryCursor {
    name: String,
    date: NaiveDate,
    records: RecordIter,
}

/// Single-pass iterator over the ticks of one source file
///
/// Zip archives are decompressed one entry at a time; `.gz` and plain
/// `.csv` sources stream directly. The first error ends the iteration.
pub struct TickReader {
    source_name: String,
    archive: Option<ZipArchive<Cursor<Vec<u8>>>>,
    next_entry: usize,
    current: Option<EntryCursor>,
    finished: bool,
}

impl TickReader {
    pub fn open(source_name: &str, bytes: Vec<u8>) -> Result<Self> {
        let lower = source_name.to_lowercase();
        let mut reader = TickReader {
            source_name: source_name.to_string(),
            archive: None,
            next_entry: 0,
            current: None,
            finished: false,
        };

        if lower.ends_with(".zip") {
            let archive = ZipArchive::new(Cursor::new(bytes)).map_err(|e| {
                ConversionError::format(source_name, 0, format!("unreadable archive: {}", e))
            })?;
            reader.archive = Some(archive);
            return Ok(reader);
        }

        let date = parse_file_date(source_name).ok_or_else(|| {
            ConversionError::format(source_name, 0, "file name carries no yyyyMMdd date")
        })?;
        let stream: Box<dyn Read + Send> = if lower.ends_with(".gz") {
            Box::new(GzDecoder::new(Cursor::new(bytes)))
        } else {
            Box::new(Cursor::new(bytes))
        };
        reader.current = Some(EntryCursor {
            name: source_name.to_string(),
            date,
            records: csv_records(stream),
        });
        Ok(reader)
    }

    fn advance_entry(&mut self) -> Result<bool> {
        let Some(archive) = self.archive.as_mut() else {
            return Ok(false);
        };
        if self.next_entry >= archive.len() {
            return Ok(false);
        }

        let index = self.next_entry;
        self.next_entry += 1;

        let mut entry = archive.by_index(index).map_err(|e| {
            ConversionError::format(&self.source_name, 0, format!("bad archive entry {}: {}", index, e))
        })?;
        let name = entry.name().to_string();
        let date = parse_file_date(&name).ok_or_else(|| {
            ConversionError::format(&name, 0, "entry name carries no yyyyMMdd date")
        })?;

        let mut contents = Vec::new();
        entry.read_to_end(&mut contents)?;
        debug!("Reading {} ({} bytes) from {}", name, contents.len(), self.source_name);

        self.current = Some(EntryCursor {
            name,
            date,
            records: csv_records(Box::new(Cursor::new(contents))),
        });
        Ok(true)
    }

    fn next_tick(&mut self) -> Result<Option<Tick>> {
        loop {
            if let Some(cursor) = self.current.as_mut() {
                match cursor.records.next() {
                    Some(Ok(record)) => {
                        let line = record.position().map(|p| p.line() as usize).unwrap_or(0);
                        return decode_tick(&record, cursor.date, &cursor.name, line).map(Some);
                    }
                    Some(Err(e)) => {
                        let line = e.position().map(|p| p.line() as usize).unwrap_or(0);
                        return Err(ConversionError::format(&cursor.name, line, e.to_string()));
                    }
                    None => self.current = None,
                }
            }

            if !self.advance_entry()? {
                return Ok(None);
            }
        }
    }
}

impl Iterator for TickReader {
    type Item = Result<Tick>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.next_tick() {
            Ok(Some(tick)) => Some(Ok(tick)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

fn csv_records(stream: Box<dyn Read + Send>) -> RecordIter {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(stream)
        .into_records()
}

fn decode_tick(record: &csv::StringRecord, date: NaiveDate, source_name: &str, line: usize) -> Result<Tick> {
    match record.len() {
        FIELD_COUNT => {
            let offset = parse_offset(&record[0], source_name, line)?;
            let bid = decode_side(record, 1, source_name, line)?;
            let ask = decode_side(record, 6, source_name, line)?;
            Ok(Tick {
                time: time_from_offset(date, offset),
                bid_price: bid.map(|quad| quad.close),
                bid_size: size_or_zero(&record[5], source_name, line)?,
                ask_price: ask.map(|quad| quad.close),
                ask_size: size_or_zero(&record[10], source_name, line)?,
            })
        }
        COMPACT_FIELD_COUNT => {
            let offset = parse_offset(&record[0], source_name, line)?;
            Ok(Tick {
                time: time_from_offset(date, offset),
                bid_price: optional_price(&record[1], source_name, line)?,
                bid_size: 0,
                ask_price: optional_price(&record[2], source_name, line)?,
                ask_size: 0,
            })
        }
        n => Err(ConversionError::format(
            source_name,
            line,
            format!("expected {} or {} fields, got {}", FIELD_COUNT, COMPACT_FIELD_COUNT, n),
        )),
    }
}

fn optional_price(field: &str, source_name: &str, line: usize) -> Result<Option<rust_decimal::Decimal>> {
    if field.trim().is_empty() {
        Ok(None)
    } else {
        parse_price(field, source_name, line).map(Some)
    }
}

fn size_or_zero(field: &str, source_name: &str, line: usize) -> Result<i64> {
    if field.trim().is_empty() {
        Ok(0)
    } else {
        parse_size(field, source_name, line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::bar_writer::build_archive;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use rust_decimal::Decimal;
    use std::io::Write;

    fn may_first() -> NaiveDate {
        NaiveDate::from_ymd_opt(2014, 5, 1).unwrap()
    }

    const LINES: &str = "34200100,1.1000,1.1000,1.1000,1.1000,2,1.1002,1.1002,1.1002,1.1002,5\n\
                         34200400,,,,,,1.1004,1.1004,1.1004,1.1004,1\n\
                         \n\
                         34201200,0,0,0,0,7,,,,,\n";

    #[test]
    fn test_read_zip_archive() {
        let bytes = build_archive("20140501_eurusd_tick_quote.csv", LINES.as_bytes()).unwrap();
        let ticks: Vec<Tick> = TickReader::open("20140501_quote.zip", bytes)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(ticks.len(), 3);
        assert_eq!(ticks[0].time, may_first().and_hms_milli_opt(9, 30, 0, 100).unwrap());
        assert_eq!(ticks[0].bid_price, Some(Decimal::new(11000, 4)));
        assert_eq!(ticks[0].ask_size, 5);

        // bid-only absence vs a genuine zero price
        assert_eq!(ticks[1].bid_price, None);
        assert_eq!(ticks[1].bid_size, 0);
        assert_eq!(ticks[2].bid_price, Some(Decimal::ZERO));
        assert_eq!(ticks[2].ask_price, None);
    }

    #[test]
    fn test_read_gzip_compact_layout() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"1000,1.25,1.26\n2000,,1.27\n").unwrap();
        let bytes = encoder.finish().unwrap();

        let ticks: Vec<Tick> = TickReader::open("20140502.csv.gz", bytes)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(ticks.len(), 2);
        let day = NaiveDate::from_ymd_opt(2014, 5, 2).unwrap();
        assert_eq!(ticks[0].time, day.and_hms_opt(0, 0, 1).unwrap());
        assert_eq!(ticks[0].bid_price, Some(Decimal::new(125, 2)));
        assert_eq!(ticks[1].bid_price, None);
        assert_eq!(ticks[1].ask_price, Some(Decimal::new(127, 2)));
    }

    #[test]
    fn test_malformed_line_aborts_file() {
        let lines = "1000,1.25,1.26\n2000,abc,1.27\n3000,1.28,1.29\n";
        let mut reader = TickReader::open("20140501.csv", lines.as_bytes().to_vec()).unwrap();

        assert!(reader.next().unwrap().is_ok());
        match reader.next() {
            Some(Err(ConversionError::Format { line, .. })) => assert_eq!(line, 2),
            other => panic!("expected format error, got {:?}", other),
        }
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_wrong_field_count() {
        let mut reader = TickReader::open("20140501.csv", b"1000,1.25\n".to_vec()).unwrap();
        assert!(matches!(reader.next(), Some(Err(ConversionError::Format { .. }))));
    }

    #[test]
    fn test_source_without_date() {
        assert!(TickReader::open("eurusd.csv", Vec::new()).is_err());
        assert!(TickReader::open("20140501_quote.zip", b"not a zip".to_vec()).is_err());
    }
}
