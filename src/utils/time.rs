/// Time utilities for date-partitioned data files
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

const DATE_FORMAT: &str = "%Y%m%d";

/// Format a date the way file names carry it (`yyyyMMdd`)
pub fn format_file_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Parse the leading `yyyyMMdd` of a file or entry name
///
/// `20140501_quote.zip`, `20140501_eurusd_tick_quote.csv` and
/// `20140501.csv.gz` all yield 2014-05-01.
pub fn parse_file_date(name: &str) -> Option<NaiveDate> {
    let file_name = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let prefix: String = file_name.chars().take_while(|c| c.is_ascii_digit()).collect();
    if prefix.len() != 8 {
        return None;
    }
    NaiveDate::parse_from_str(&prefix, DATE_FORMAT).ok()
}

/// Absolute time of a millisecond offset into `date`
pub fn time_from_offset(date: NaiveDate, offset_ms: i64) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN) + Duration::milliseconds(offset_ms)
}

/// Milliseconds between midnight of `time`'s date and `time`
pub fn offset_millis(time: NaiveDateTime) -> i64 {
    (time - time.date().and_time(NaiveTime::MIN)).num_milliseconds()
}
