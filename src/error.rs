//! Error types for batchr
//!
//! Centralized error handling using thiserror. Only run-level (fatal) failures
//! travel through `BatchError`; per-item agent failures are recorded on the
//! item's result instead.

use thiserror::Error;

use crate::agent::AgentError;
use crate::input::ParseError;

/// All run-level errors that can abort a batch
#[derive(Debug, Error)]
pub enum BatchError {
    /// Processor or rate limiter configuration is unusable
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Input file contained invalid entries and fail-fast is in effect
    #[error("Invalid input: {}", describe_parse_errors(.errors))]
    InvalidInput { errors: Vec<ParseError> },

    /// Agent could not be constructed or reached at all
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for batchr operations
pub type Result<T> = std::result::Result<T, BatchError>;

fn describe_parse_errors(errors: &[ParseError]) -> String {
    match errors.first() {
        None => "no entries".to_string(),
        Some(first) if errors.len() == 1 => first.to_string(),
        Some(first) => format!("{} (and {} more)", first, errors.len() - 1),
    }
}
