/// Bar persistence: one zipped CSV per symbol, resolution and day
use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::data::layout::{encode_bar, DataLayout};
use crate::error::{ConversionError, Result};
use crate::types::{QuoteBar, Resolution};

/// Build a single-entry deflated zip archive in memory
pub fn build_archive(entry_name: &str, contents: &[u8]) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    writer.start_file(entry_name, options)?;
    writer.write_all(contents)?;
    Ok(writer.finish()?.into_inner())
}

/// Writes sealed bars for one symbol and resolution
pub struct BarWriter {
    layout: DataLayout,
    symbol: String,
    resolution: Resolution,
}

impl BarWriter {
    pub fn new(layout: DataLayout, symbol: &str, resolution: Resolution) -> Self {
        BarWriter {
            layout,
            symbol: symbol.to_lowercase(),
            resolution,
        }
    }

    /// Write `bars` in the order given, one archive per date
    ///
    /// An existing archive for the same date is replaced.
    pub async fn write(&self, bars: &[QuoteBar]) -> Result<Vec<PathBuf>> {
        if let Some(bar) = bars
            .iter()
            .find(|b| b.resolution != self.resolution || b.symbol != self.symbol)
        {
            return Err(ConversionError::InvalidParameter(format!(
                "{} {} bar handed to {} {} writer",
                bar.symbol, bar.resolution, self.symbol, self.resolution
            )));
        }

        // Validate every partition before committing any of them
        let days: Vec<&[QuoteBar]> = bars.chunk_by(|a, b| a.time.date() == b.time.date()).collect();
        let mut seen = HashSet::new();
        for day in &days {
            let date = day[0].time.date();
            if !seen.insert(date) {
                return Err(ConversionError::InvalidParameter(format!(
                    "bars for {} {} on {} are not contiguous",
                    self.symbol, self.resolution, date
                )));
            }
        }

        let mut written = Vec::new();
        for day in days {
            written.push(self.write_day(day[0].time.date(), day).await?);
        }

        if !written.is_empty() {
            info!(
                "💾 Wrote {} {} bars for {} across {} day(s)",
                bars.len(),
                self.resolution,
                self.symbol,
                written.len()
            );
        }
        Ok(written)
    }

    async fn write_day(&self, date: NaiveDate, bars: &[QuoteBar]) -> Result<PathBuf> {
        let entry_name = DataLayout::entry_name(&self.symbol, self.resolution, date);
        let archive = build_archive(&entry_name, &encode_lines(bars)?)?;

        let path = self.layout.archive_path(&self.symbol, self.resolution, date);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Unique temp sibling, renamed into place once complete
        let target = path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let parent = target.parent().unwrap_or_else(|| Path::new("."));
            let mut file = tempfile::Builder::new()
                .prefix(".quote-")
                .suffix(".zip.tmp")
                .tempfile_in(parent)?;
            file.write_all(&archive)?;
            file.as_file().sync_all()?;
            file.persist(&target).map_err(|e| ConversionError::Io(e.error))?;
            Ok(())
        })
        .await??;

        debug!("Wrote {} bars to {}", bars.len(), path.display());
        Ok(path)
    }
}

fn encode_lines(bars: &[QuoteBar]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    for bar in bars {
        writer
            .write_record(encode_bar(bar))
            .map_err(|e| ConversionError::Io(e.into()))?;
    }
    writer
        .into_inner()
        .map_err(|e| ConversionError::Io(e.into_error()))
}
