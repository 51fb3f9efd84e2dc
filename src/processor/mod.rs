//! Batch execution - bounded-concurrency, retrying dispatch of work items.

mod config;
mod executor;
mod state;

pub use config::ProcessorConfig;
pub use executor::Processor;
pub use state::ItemState;
