//! Result types produced by a batch run.

use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::input::WorkItem;
use crate::processor::ItemState;

/// Error text of an item excluded before dispatch
pub const SKIPPED: &str = "skipped";

/// Error text of an item the run never started
pub const CANCELLED: &str = "cancelled";

/// Terminal outcome of one work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultItem {
    pub id: String,
    pub order: usize,
    pub success: bool,
    pub state: ItemState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tokens_used: u64,
    pub attempts: u32,
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,
}

impl ResultItem {
    pub fn succeeded(item: &WorkItem, output: String, tokens_used: u64, attempts: u32, duration: Duration) -> Self {
        Self {
            id: item.id.clone(),
            order: item.order,
            success: true,
            state: ItemState::Succeeded,
            output: Some(output),
            error: None,
            tokens_used,
            attempts,
            duration,
        }
    }

    /// A dispatched item that ran out of attempts (`Failed` or `TimedOut`)
    pub fn failed(item: &WorkItem, state: ItemState, error: String, attempts: u32, duration: Duration) -> Self {
        Self {
            id: item.id.clone(),
            order: item.order,
            success: false,
            state,
            output: None,
            error: Some(error),
            tokens_used: 0,
            attempts,
            duration,
        }
    }

    pub fn skipped(id: impl Into<String>, order: usize) -> Self {
        Self {
            id: id.into(),
            order,
            success: false,
            state: ItemState::Skipped,
            output: None,
            error: Some(SKIPPED.to_string()),
            tokens_used: 0,
            attempts: 0,
            duration: Duration::ZERO,
        }
    }

    pub fn cancelled(item: &WorkItem) -> Self {
        Self {
            id: item.id.clone(),
            order: item.order,
            success: false,
            state: ItemState::Cancelled,
            output: None,
            error: Some(CANCELLED.to_string()),
            tokens_used: 0,
            attempts: 0,
            duration: Duration::ZERO,
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.state == ItemState::Skipped
    }
}

/// Frozen result of a whole run, items in input order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub total: usize,
    pub succeeded: usize,
    /// Everything not succeeded, skipped and cancelled items included
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
    pub total_tokens: u64,
    #[serde(rename = "elapsed_ms", with = "duration_ms")]
    pub elapsed: Duration,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub items: Vec<ResultItem>,
}

impl BatchResult {
    /// Fixed multi-line report: counts and elapsed time only
    pub fn summary(&self) -> String {
        format!(
            "Total:     {}\nSucceeded: {}\nFailed:    {} ({} skipped, {} cancelled)\nTokens:    {}\nElapsed:   {:.2}s",
            self.total,
            self.succeeded,
            self.failed,
            self.skipped,
            self.cancelled,
            self.total_tokens,
            self.elapsed.as_secs_f64()
        )
    }

    /// Items that failed for a reason other than being skipped
    pub fn failures(&self) -> impl Iterator<Item = &ResultItem> {
        self.items.iter().filter(|item| !item.success && !item.is_skipped())
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    /// Serialize the whole result as one pretty-printed JSON document
    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
