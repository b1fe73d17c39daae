/// Centralized error types for the quote bar converter
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConversionError {
    // Source Errors
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Malformed data in {source_name} line {line}: {message}")]
    Format {
        source_name: String,
        line: usize,
        message: String,
    },

    // Storage Errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    // Network Errors
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    // Configuration Errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid resolution: {0}")]
    InvalidResolution(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    // Worker Errors
    #[error("Worker failed: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, ConversionError>;

impl ConversionError {
    /// Build a format error for a given source and 1-based line number
    pub fn format(source_name: impl Into<String>, line: usize, message: impl Into<String>) -> Self {
        ConversionError::Format {
            source_name: source_name.into(),
            line,
            message: message.into(),
        }
    }

    /// Missing input ends the whole symbol, not just the file
    pub fn aborts_symbol(&self) -> bool {
        matches!(self, ConversionError::NotFound(_))
    }

    /// Get error code for logging/reporting
    pub fn error_code(&self) -> &str {
        match self {
            ConversionError::NotFound(_) => "SRC_001",
            ConversionError::Format { .. } => "SRC_002",
            ConversionError::Io(_) => "FILE_001",
            ConversionError::Archive(_) => "FILE_002",
            ConversionError::Http(_) => "NET_001",
            ConversionError::Serialization(_) => "DATA_001",
            ConversionError::Config(_) => "CFG_001",
            ConversionError::InvalidResolution(_) => "CFG_002",
            ConversionError::InvalidParameter(_) => "CFG_003",
            ConversionError::Worker(_) => "SYS_001",
        }
    }
}

impl From<tokio::task::JoinError> for ConversionError {
    fn from(e: tokio::task::JoinError) -> Self {
        ConversionError::Worker(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_error_message() {
        let err = ConversionError::format("20140501_quote.zip", 12, "bad bid high");
        assert_eq!(
            err.to_string(),
            "Malformed data in 20140501_quote.zip line 12: bad bid high"
        );
        assert_eq!(err.error_code(), "SRC_002");
        assert!(!err.aborts_symbol());
    }

    #[test]
    fn test_not_found_aborts_symbol() {
        let err = ConversionError::NotFound("forex/fxcm/tick/eurusd".to_string());
        assert!(err.aborts_symbol());
        assert_eq!(err.error_code(), "SRC_001");
    }
}
