pub mod aggregator;
pub mod bar_reader;
pub mod bar_writer;
pub mod consolidator;
pub mod layout;
pub mod provider;
pub mod tick_reader;

pub use aggregator::BarAggregator;
pub use bar_reader::BarReader;
pub use bar_writer::BarWriter;
pub use consolidator::QuoteBarConsolidator;
pub use layout::DataLayout;
pub use provider::{ApiDataProvider, DataProvider, DefaultDataProvider};
pub use tick_reader::TickReader;
