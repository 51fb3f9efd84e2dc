//! Result aggregation and reporting.

mod aggregator;
mod result;

pub use aggregator::Aggregator;
pub use result::{BatchResult, CANCELLED, ResultItem, SKIPPED};
