pub mod types;
pub mod error;
pub mod data;
pub mod config;
pub mod pipeline;
pub mod utils;

pub use types::*;
pub use error::{ConversionError, Result};
pub use pipeline::{ConversionReport, QuoteBarConverter};
