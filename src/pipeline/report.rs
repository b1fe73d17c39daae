/// Conversion run summary
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use crate::error::{ConversionError, Result};

/// One file or symbol that did not convert
#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub path: String,
    pub error_code: String,
    pub message: String,
}

impl FailureRecord {
    pub fn new(path: &str, error: &ConversionError) -> Self {
        FailureRecord {
            path: path.to_string(),
            error_code: error.error_code().to_string(),
            message: error.to_string(),
        }
    }
}

/// Comprehensive report for one conversion run
#[derive(Debug, Clone, Serialize)]
pub struct ConversionReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub files_converted: usize,
    pub files_failed: usize,
    pub symbols_aggregated: usize,
    pub ticks_read: usize,
    pub late_ticks: usize,
    pub bars_written: usize,
    pub failures: Vec<FailureRecord>,
}

impl ConversionReport {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        ConversionReport {
            started_at,
            duration_ms: 0,
            files_converted: 0,
            files_failed: 0,
            symbols_aggregated: 0,
            ticks_read: 0,
            late_ticks: 0,
            bars_written: 0,
            failures: Vec::new(),
        }
    }

    pub fn record_failure(&mut self, path: &str, error: &ConversionError) {
        error!("❌ {} failed: {} ({})", path, error, error.error_code());
        self.failures.push(FailureRecord::new(path, error));
    }

    pub fn finish(&mut self) {
        self.duration_ms = (Utc::now() - self.started_at).num_milliseconds();
    }

    /// True when every worker completed
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn log_summary(&self) {
        info!("📊 Summary:");
        info!("   Duration: {}ms", self.duration_ms);
        info!("   Files converted: {}", self.files_converted);
        info!("   Files failed: {}", self.files_failed);
        info!("   Symbols aggregated: {}", self.symbols_aggregated);
        info!("   Ticks read: {} ({} late)", self.ticks_read, self.late_ticks);
        info!("   Bars written: {}", self.bars_written);
        for failure in &self.failures {
            info!("      - {} [{}]: {}", failure.path, failure.error_code, failure.message);
        }
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json).await?;
        info!("💾 Report saved to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_report_save() {
        let dir = TempDir::new().unwrap();
        let mut report = ConversionReport::new(Utc::now());
        report.record_failure(
            "tick/eurusd/20140501_quote.zip",
            &ConversionError::format("20140501_quote.zip", 3, "bad size"),
        );
        report.finish();
        assert!(!report.is_success());

        let path = dir.path().join("reports/run.json");
        report.save(&path).await.unwrap();

        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["failures"][0]["error_code"], "SRC_002");
        assert_eq!(saved["files_converted"], 0);
    }
}
