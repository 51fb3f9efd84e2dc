//! Result aggregation.
//!
//! Workers finish in any order; the aggregator restores input order and
//! computes the run-level counts when it is frozen.

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::result::{BatchResult, ResultItem};
use crate::processor::ItemState;

/// Accumulates results for one run.
#[derive(Debug)]
pub struct Aggregator {
    started: Instant,
    started_at: chrono::DateTime<Utc>,
    items: Vec<ResultItem>,
}

impl Aggregator {
    /// Start the run clock.
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            started_at: Utc::now(),
            items: Vec::new(),
        }
    }

    pub fn push(&mut self, item: ResultItem) {
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drain `rx` until every sender is gone.
    pub async fn collect(&mut self, rx: &mut mpsc::UnboundedReceiver<ResultItem>) {
        while let Some(item) = rx.recv().await {
            self.push(item);
        }
    }

    /// Freeze into a result sorted by input order.
    pub fn finish(mut self) -> BatchResult {
        self.items.sort_by_key(|item| item.order);

        let count = |state: ItemState| self.items.iter().filter(|item| item.state == state).count();
        let succeeded = count(ItemState::Succeeded);
        let skipped = count(ItemState::Skipped);
        let cancelled = count(ItemState::Cancelled);
        let total = self.items.len();

        BatchResult {
            total,
            succeeded,
            failed: total - succeeded,
            skipped,
            cancelled,
            total_tokens: self.items.iter().map(|item| item.tokens_used).sum(),
            elapsed: self.started.elapsed(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            items: self.items,
        }
    }
}
