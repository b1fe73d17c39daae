/// Conversion pipeline: worker pool and run report
pub mod converter;
pub mod report;

pub use converter::QuoteBarConverter;
pub use report::{ConversionReport, FailureRecord};
