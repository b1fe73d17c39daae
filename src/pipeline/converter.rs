/// Tick-to-bar conversion across every configured source
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::data::{
    BarAggregator, BarReader, BarWriter, DataLayout, DataProvider, DefaultDataProvider,
    QuoteBarConsolidator, TickReader,
};
use crate::error::{ConversionError, Result};
use crate::pipeline::report::ConversionReport;
use crate::types::{ConverterConfig, QuoteBar, Resolution, SizeAggregation, Tick};
use crate::utils::parse_file_date;

const TICK_EXTENSIONS: [&str; 3] = ["zip", "gz", "csv"];

/// All tick files of one symbol and date
///
/// They are converted by a single worker, so every output partition has
/// exactly one writer.
#[derive(Debug, Clone)]
struct DayJob {
    source: usize,
    symbol: String,
    date: NaiveDate,
    paths: Vec<PathBuf>,
}

impl DayJob {
    fn describe(&self) -> String {
        self.paths
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Default)]
struct FileOutcome {
    ticks_read: usize,
    late_ticks: usize,
    bars_written: usize,
}

/// Second and minute consolidators fed from the same tick stream
struct DayConsolidator {
    second: QuoteBarConsolidator,
    minute: QuoteBarConsolidator,
    seconds: Vec<QuoteBar>,
    minutes: Vec<QuoteBar>,
    ticks_read: usize,
    late_ticks: usize,
}

impl DayConsolidator {
    fn new(symbol: &str) -> Result<Self> {
        Ok(DayConsolidator {
            second: QuoteBarConsolidator::new(symbol, Resolution::Second)?,
            minute: QuoteBarConsolidator::new(symbol, Resolution::Minute)?,
            seconds: Vec::new(),
            minutes: Vec::new(),
            ticks_read: 0,
            late_ticks: 0,
        })
    }

    fn push(&mut self, tick: &Tick) {
        self.ticks_read += 1;
        let dropped = (self.second.late_ticks(), self.minute.late_ticks());
        self.seconds.extend(self.second.update(tick));
        self.minutes.extend(self.minute.update(tick));
        // A tick late for either resolution counts once
        if (self.second.late_ticks(), self.minute.late_ticks()) != dropped {
            self.late_ticks += 1;
        }
    }

    fn finish(mut self) -> Self {
        self.seconds.extend(self.second.scan());
        self.minutes.extend(self.minute.scan());
        self
    }
}

/// Converts raw tick files into second/minute bars, then aggregates the
/// stored minute bars into hour and daily bars
pub struct QuoteBarConverter<P: DataProvider> {
    provider: Arc<P>,
    config: Arc<ConverterConfig>,
    destination: PathBuf,
}

impl<P: DataProvider> QuoteBarConverter<P> {
    pub fn new(provider: Arc<P>, config: Arc<ConverterConfig>, destination: impl Into<PathBuf>) -> Self {
        QuoteBarConverter {
            provider,
            config,
            destination: destination.into(),
        }
    }

    /// Run the full conversion, optionally restricted to one market
    ///
    /// Failed files and symbols are recorded in the report; only setup
    /// problems are returned as errors.
    pub async fn run(&self, market_filter: Option<&str>) -> Result<ConversionReport> {
        let mut report = ConversionReport::new(Utc::now());

        let sources: Vec<usize> = self
            .config
            .sources
            .iter()
            .enumerate()
            .filter(|(_, s)| market_filter.map_or(true, |m| s.market.eq_ignore_ascii_case(m)))
            .map(|(i, _)| i)
            .collect();
        if sources.is_empty() {
            return Err(ConversionError::InvalidParameter(format!(
                "no configured source for market {}",
                market_filter.unwrap_or("*")
            )));
        }

        info!("🚀 Starting quote bar conversion into {}", self.destination.display());
        info!("   Workers: {}", self.config.max_workers);

        let mut jobs = Vec::new();
        for &source in &sources {
            let layout = self.source_layout(source);
            match discover_tick_files(&layout, source).await {
                Ok((found, undated)) => {
                    info!("📂 {} tick day(s) found for {}", found.len(), layout.market());
                    jobs.extend(found);
                    for (path, e) in undated {
                        report.files_failed += 1;
                        report.record_failure(&path.display().to_string(), &e);
                    }
                }
                Err(e) => {
                    let dir = layout.resolution_dir(Resolution::Tick);
                    report.record_failure(&dir.display().to_string(), &e);
                }
            }
        }

        let (converted, aborted) = self.convert_files(jobs, &mut report).await?;

        let symbols: BTreeSet<(usize, String)> = converted.difference(&aborted).cloned().collect();
        for (source, symbol) in &aborted {
            warn!(
                "⚠️ Skipping aggregation for {} ({}): source data missing",
                symbol, self.config.sources[*source].market
            );
        }

        self.aggregate_symbols(symbols, &mut report).await?;

        report.finish();
        info!("✅ Conversion complete in {}ms", report.duration_ms);
        Ok(report)
    }

    fn source_layout(&self, source: usize) -> DataLayout {
        let s = &self.config.sources[source];
        DataLayout::new(&self.config.data_directory, &s.security_type, &s.market)
    }

    fn destination_layout(&self, source: usize) -> DataLayout {
        let s = &self.config.sources[source];
        DataLayout::new(&self.destination, &s.security_type, &s.market)
    }

    /// Phase one: one worker per symbol and day. Returns the symbols with
    /// at least one converted day and those aborted by missing input.
    async fn convert_files(
        &self,
        jobs: Vec<DayJob>,
        report: &mut ConversionReport,
    ) -> Result<(HashSet<(usize, String)>, HashSet<(usize, String)>)> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_workers));
        let mut workers = JoinSet::new();

        for job in jobs {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| ConversionError::Worker(e.to_string()))?;
            let provider = Arc::clone(&self.provider);
            let destination = self.destination_layout(job.source);

            workers.spawn(async move {
                // Inner task so a panicking worker still reports its files
                let task_job = job.clone();
                let handle = tokio::spawn(async move { convert_day(provider, task_job, destination).await });
                let result = match handle.await {
                    Ok(result) => result,
                    Err(e) => Err(ConversionError::from(e)),
                };
                drop(permit);
                (job, result)
            });
        }

        let mut converted = HashSet::new();
        let mut aborted = HashSet::new();
        while let Some(joined) = workers.join_next().await {
            let (job, result) = joined?;
            match result {
                Ok(outcome) => {
                    report.files_converted += job.paths.len();
                    report.ticks_read += outcome.ticks_read;
                    report.late_ticks += outcome.late_ticks;
                    report.bars_written += outcome.bars_written;
                    converted.insert((job.source, job.symbol));
                }
                Err(e) => {
                    report.files_failed += job.paths.len();
                    report.record_failure(&job.describe(), &e);
                    if e.aborts_symbol() {
                        aborted.insert((job.source, job.symbol));
                    }
                }
            }
        }
        Ok((converted, aborted))
    }

    /// Phase two: rebuild hour and daily bars from each symbol's stored minute bars
    async fn aggregate_symbols(
        &self,
        symbols: BTreeSet<(usize, String)>,
        report: &mut ConversionReport,
    ) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_workers));
        let mut workers = JoinSet::new();
        let size_aggregation = self.config.size_aggregation;

        for (source, symbol) in symbols {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| ConversionError::Worker(e.to_string()))?;
            let layout = self.destination_layout(source);

            workers.spawn(async move {
                let task_symbol = symbol.clone();
                let task_layout = layout.clone();
                let handle = tokio::spawn(async move {
                    aggregate_symbol(task_layout, &task_symbol, size_aggregation).await
                });
                let result = match handle.await {
                    Ok(result) => result,
                    Err(e) => Err(ConversionError::from(e)),
                };
                drop(permit);
                (layout, symbol, result)
            });
        }

        while let Some(joined) = workers.join_next().await {
            let (layout, symbol, result) = joined?;
            match result {
                Ok(bars_written) => {
                    report.symbols_aggregated += 1;
                    report.bars_written += bars_written;
                }
                Err(e) => {
                    let dir = layout.symbol_dir(&symbol, Resolution::Minute);
                    report.record_failure(&dir.display().to_string(), &e);
                }
            }
        }
        Ok(())
    }
}

/// List `{tick dir}/{symbol}/*.{zip,gz,csv}` grouped by symbol and file date
///
/// Files without a `yyyyMMdd` name prefix are returned separately as failures.
async fn discover_tick_files(
    layout: &DataLayout,
    source: usize,
) -> Result<(Vec<DayJob>, Vec<(PathBuf, ConversionError)>)> {
    let tick_dir = layout.resolution_dir(Resolution::Tick);
    let mut symbol_dirs = read_dir_sorted(&tick_dir).await?;
    symbol_dirs.retain(|p| p.is_dir());

    let mut days: BTreeMap<(String, NaiveDate), Vec<PathBuf>> = BTreeMap::new();
    let mut undated = Vec::new();
    for dir in symbol_dirs {
        let Some(symbol) = dir.file_name().map(|n| n.to_string_lossy().to_lowercase()) else {
            continue;
        };
        for path in read_dir_sorted(&dir).await? {
            let is_tick_file = path
                .extension()
                .map(|ext| TICK_EXTENSIONS.iter().any(|t| ext.eq_ignore_ascii_case(t)))
                .unwrap_or(false);
            if !is_tick_file || !path.is_file() {
                continue;
            }
            let name = path.display().to_string();
            match parse_file_date(&name) {
                Some(date) => days.entry((symbol.clone(), date)).or_default().push(path),
                None => undated.push((
                    path,
                    ConversionError::format(name, 0, "file name carries no yyyyMMdd date"),
                )),
            }
        }
    }

    let jobs = days
        .into_iter()
        .map(|((symbol, date), paths)| DayJob {
            source,
            symbol,
            date,
            paths,
        })
        .collect();
    Ok((jobs, undated))
}

async fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ConversionError::NotFound(dir.display().to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        paths.push(entry.path());
    }
    paths.sort();
    Ok(paths)
}

async fn convert_day<P: DataProvider>(
    provider: Arc<P>,
    job: DayJob,
    destination: DataLayout,
) -> Result<FileOutcome> {
    info!("🔄 Converting {} {} from {} file(s)", job.symbol, job.date, job.paths.len());

    let mut sources = Vec::with_capacity(job.paths.len());
    for path in &job.paths {
        let name = path.display().to_string();
        let bytes = provider
            .fetch(path)
            .await?
            .ok_or_else(|| ConversionError::NotFound(name.clone()))?;
        sources.push((name, bytes));
    }

    let symbol = job.symbol.clone();
    let date = job.date;
    let day = tokio::task::spawn_blocking(move || consolidate_day(sources, &symbol, date)).await??;

    // Nothing is written until every file of the day has decoded cleanly
    let mut bars_written = 0;
    for (resolution, bars) in [
        (Resolution::Minute, &day.minutes),
        (Resolution::Second, &day.seconds),
    ] {
        BarWriter::new(destination.clone(), &job.symbol, resolution)
            .write(bars)
            .await?;
        bars_written += bars.len();
    }

    info!(
        "✅ {} {}: {} ticks -> {} second / {} minute bars",
        job.symbol,
        job.date,
        day.ticks_read,
        day.seconds.len(),
        day.minutes.len()
    );
    Ok(FileOutcome {
        ticks_read: day.ticks_read,
        late_ticks: day.late_ticks,
        bars_written,
    })
}

/// Feed every tick of one symbol's day through the second and minute consolidators
///
/// A single file streams straight through. Several files are merged into one
/// time-ordered stream first; the sort is stable so equal timestamps keep
/// their file and line order.
fn consolidate_day(sources: Vec<(String, Vec<u8>)>, symbol: &str, date: NaiveDate) -> Result<DayConsolidator> {
    let mut day = DayConsolidator::new(symbol)?;
    let merge = sources.len() > 1;
    let mut pending = Vec::new();

    for (name, bytes) in sources {
        for tick in TickReader::open(&name, bytes)? {
            let tick = tick?;
            if tick.time.date() != date {
                return Err(ConversionError::format(
                    &name,
                    0,
                    format!("tick at {} falls outside file date {}", tick.time, date),
                ));
            }
            if merge {
                pending.push(tick);
            } else {
                day.push(&tick);
            }
        }
    }

    pending.sort_by_key(|t| t.time);
    for tick in &pending {
        day.push(tick);
    }
    Ok(day.finish())
}

async fn aggregate_symbol(layout: DataLayout, symbol: &str, size_aggregation: SizeAggregation) -> Result<usize> {
    let reader = BarReader::new(Arc::new(DefaultDataProvider), layout.clone());
    let mut minutes = Vec::new();
    for date in reader.available_dates(symbol, Resolution::Minute).await? {
        minutes.extend(reader.read(symbol, Resolution::Minute, date).await?);
    }
    debug!("Loaded {} minute bars for {}", minutes.len(), symbol);

    let (hours, days) = tokio::task::spawn_blocking(move || -> Result<_> {
        let aggregator = BarAggregator::new(size_aggregation);
        Ok((
            aggregator.aggregate(&minutes, Resolution::Hour)?,
            aggregator.aggregate(&minutes, Resolution::Daily)?,
        ))
    })
    .await??;

    BarWriter::new(layout.clone(), symbol, Resolution::Hour).write(&hours).await?;
    BarWriter::new(layout, symbol, Resolution::Daily).write(&days).await?;

    info!("📊 {}: {} hour / {} daily bars", symbol, hours.len(), days.len());
    Ok(hours.len() + days.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::bar_writer::build_archive;
    use crate::types::SourceConfig;
    use tempfile::TempDir;

    fn config(data: &Path) -> Arc<ConverterConfig> {
        Arc::new(ConverterConfig {
            data_directory: data.to_path_buf(),
            sources: vec![SourceConfig {
                market: "fxcm".to_string(),
                security_type: "forex".to_string(),
            }],
            max_workers: 2,
            ..ConverterConfig::default()
        })
    }

    fn write_ticks(data: &Path, symbol: &str, name: &str, contents: &[u8]) {
        let dir = data.join("forex/fxcm/tick").join(symbol);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(name), contents).unwrap();
    }

    fn may(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2014, 5, day).unwrap()
    }

    fn source(name: &str, contents: &[u8]) -> (String, Vec<u8>) {
        (name.to_string(), contents.to_vec())
    }

    #[test]
    fn test_consolidate_day_single_pass() {
        let sources = vec![source("20140501_eurusd.csv", b"100,1.1000,\n400,1.1005,\n60200,,1.1010\n")];
        let result = consolidate_day(sources, "eurusd", may(1)).unwrap();
        assert_eq!(result.ticks_read, 3);
        assert_eq!(result.seconds.len(), 2);
        assert_eq!(result.minutes.len(), 2);
        assert!(result.minutes[1].bid.is_none());
    }

    #[test]
    fn test_late_ticks_counted_across_resolutions() {
        // 900ms is late only for seconds, 30000ms is late for both
        let sources = vec![source(
            "20140501_eurusd.csv",
            b"100,1.1000,\n1200,1.1001,\n900,1.1002,\n61000,1.1003,\n30000,1.1004,\n",
        )];
        let result = consolidate_day(sources, "eurusd", may(1)).unwrap();
        assert_eq!(result.ticks_read, 5);
        assert_eq!(result.late_ticks, 2);
    }

    #[test]
    fn test_same_day_files_are_merged_in_time_order() {
        let sources = vec![
            source("20140501_quote.csv", b"100,1.1000,\n120000,1.1010,\n"),
            source("20140501_pm.csv", b"60000,1.1005,\n"),
        ];
        let result = consolidate_day(sources, "eurusd", may(1)).unwrap();
        assert_eq!(result.late_ticks, 0);
        assert_eq!(result.minutes.len(), 3);
        assert!(result.minutes.windows(2).all(|w| w[0].time < w[1].time));
    }

    #[test]
    fn test_entry_outside_file_date_is_rejected() {
        let archive = build_archive("20140502_eurusd_tick_quote.csv", b"100,1.1000,1.1002\n").unwrap();
        let sources = vec![("20140501_quote.zip".to_string(), archive)];
        assert!(matches!(
            consolidate_day(sources, "eurusd", may(1)),
            Err(ConversionError::Format { .. })
        ));
    }

    #[tokio::test]
    async fn test_run_converts_and_aggregates() {
        let data = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let entry = "20140501_eurusd_tick_quote.csv";
        write_ticks(
            data.path(),
            "eurusd",
            "20140501_quote.zip",
            &build_archive(entry, b"100,1.1000,1.1002\n3600100,1.1010,1.1012\n").unwrap(),
        );

        let converter = QuoteBarConverter::new(Arc::new(DefaultDataProvider), config(data.path()), dest.path());
        let report = converter.run(None).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.files_converted, 1);
        assert_eq!(report.symbols_aggregated, 1);
        assert_eq!(report.ticks_read, 2);
        // 2 second + 2 minute + 2 hour + 1 daily
        assert_eq!(report.bars_written, 7);

        let layout = DataLayout::new(dest.path(), "forex", "fxcm");
        let date = chrono::NaiveDate::from_ymd_opt(2014, 5, 1).unwrap();
        for resolution in [Resolution::Second, Resolution::Minute, Resolution::Hour, Resolution::Daily] {
            assert!(layout.archive_path("eurusd", resolution, date).exists());
        }
    }

    #[tokio::test]
    async fn test_malformed_file_fails_alone() {
        let data = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        write_ticks(data.path(), "eurusd", "20140501_quote.csv", b"100,1.1000,1.1002\n");
        write_ticks(data.path(), "eurusd", "20140502_quote.csv", b"100,1.1000,1.1002\nnot-a-number,1,1\n");

        let converter = QuoteBarConverter::new(Arc::new(DefaultDataProvider), config(data.path()), dest.path());
        let report = converter.run(None).await.unwrap();

        assert_eq!(report.files_converted, 1);
        assert_eq!(report.files_failed, 1);
        assert_eq!(report.failures[0].error_code, "SRC_002");
        assert_eq!(report.symbols_aggregated, 1);

        let layout = DataLayout::new(dest.path(), "forex", "fxcm");
        let bad_day = chrono::NaiveDate::from_ymd_opt(2014, 5, 2).unwrap();
        assert!(!layout.archive_path("eurusd", Resolution::Minute, bad_day).exists());
    }

    #[tokio::test]
    async fn test_missing_tick_directory_is_reported() {
        let data = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();

        let converter = QuoteBarConverter::new(Arc::new(DefaultDataProvider), config(data.path()), dest.path());
        let report = converter.run(None).await.unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].error_code, "SRC_001");

        assert!(matches!(
            converter.run(Some("oanda")).await,
            Err(ConversionError::InvalidParameter(_))
        ));
    }

    #[tokio::test]
    async fn test_same_day_sources_share_one_partition() {
        let data = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        write_ticks(
            data.path(),
            "eurusd",
            "20140501_quote.zip",
            &build_archive("20140501_eurusd_tick_quote.csv", b"100,1.1000,1.1002\n").unwrap(),
        );
        write_ticks(data.path(), "eurusd", "20140501_pm.csv", b"43200000,1.1010,1.1012\n");

        let converter = QuoteBarConverter::new(Arc::new(DefaultDataProvider), config(data.path()), dest.path());
        let report = converter.run(None).await.unwrap();
        assert!(report.is_success(), "failures: {:?}", report.failures);
        assert_eq!(report.files_converted, 2);
        assert_eq!(report.ticks_read, 2);

        let reader = BarReader::new(
            Arc::new(DefaultDataProvider),
            DataLayout::new(dest.path(), "forex", "fxcm"),
        );
        let minutes = reader.read("eurusd", Resolution::Minute, may(1)).await.unwrap();
        assert_eq!(minutes.len(), 2);
        assert_eq!(minutes[1].time, may(1).and_hms_opt(12, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn test_undated_file_is_reported() {
        let data = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        write_ticks(data.path(), "eurusd", "20140501_quote.csv", b"100,1.1000,1.1002\n");
        write_ticks(data.path(), "eurusd", "latest.csv", b"100,1.1000,1.1002\n");

        let converter = QuoteBarConverter::new(Arc::new(DefaultDataProvider), config(data.path()), dest.path());
        let report = converter.run(None).await.unwrap();
        assert_eq!(report.files_converted, 1);
        assert_eq!(report.files_failed, 1);
        assert!(report.failures[0].path.ends_with("latest.csv"));
    }
}
