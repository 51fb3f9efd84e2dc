//! batchr - rate-limited batch dispatch of prompts to an LLM agent
//!
//! A batch file is parsed into ordered work items, dispatched through a quota
//! gate that enforces concurrency, requests-per-minute and tokens-per-minute
//! limits, retried on failure, and reported back in input order.

pub mod agent;
pub mod error;
pub mod id;
pub mod input;
pub mod processor;
pub mod report;
pub mod scheduler;

pub use error::{BatchError, Result};
pub use processor::{ItemState, Processor, ProcessorConfig};
pub use report::{BatchResult, ResultItem};
pub use scheduler::{RateLimiterConfig, Tier};
