//! Batch processor - dispatches work items to the agent.
//!
//! A fixed pool of workers pulls items from a shared queue. For each item a
//! worker loops acquire → call → (retry) until the item reaches a terminal
//! state, then hands the `ResultItem` to the aggregator over a channel.
//!
//! Cancelling the run token stops new acquisitions and retries right away;
//! attempts already talking to the agent run to completion (or to their own
//! deadline). Items never started are reported as cancelled.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::ProcessorConfig;
use super::state::ItemState;
use crate::agent::{Agent, ChatRequest};
use crate::error::Result;
use crate::input::{AdmittedInput, InputFormat, WorkItem, parse_file};
use crate::report::{Aggregator, BatchResult, ResultItem};
use crate::scheduler::{QuotaGate, RateLimiterConfig};

/// Runs batches against one agent.
pub struct Processor {
    agent: Arc<dyn Agent>,
    config: ProcessorConfig,
    limits: Option<RateLimiterConfig>,
}

impl Processor {
    /// Create a processor without rate limiting (concurrency bound only).
    pub fn new(agent: Arc<dyn Agent>, config: ProcessorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            agent,
            config,
            limits: None,
        })
    }

    /// Enforce provider RPM/TPM limits on every dispatch.
    pub fn with_rate_limiter(mut self, limits: RateLimiterConfig) -> Result<Self> {
        limits.validate()?;
        self.limits = Some(limits);
        Ok(self)
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn rate_limiter(&self) -> Option<&RateLimiterConfig> {
        self.limits.as_ref()
    }

    /// Parse `path`, apply the invalid-entry policy and run what is left.
    ///
    /// Unreadable files and fail-fast input errors abort before any dispatch.
    pub async fn run_file(
        &self,
        path: &Path,
        format: Option<InputFormat>,
        cancel: CancellationToken,
    ) -> Result<BatchResult> {
        let parsed = parse_file(path, format)?;
        let admitted = parsed.admit(self.config.skip_invalid, self.config.validate_input)?;
        Ok(self.execute(admitted, cancel).await)
    }

    /// Run already-parsed work items.
    pub async fn run(&self, items: Vec<WorkItem>, cancel: CancellationToken) -> BatchResult {
        let admitted = AdmittedInput {
            items,
            skipped: Vec::new(),
        };
        self.execute(admitted, cancel).await
    }

    fn build_gate(&self) -> QuotaGate {
        match &self.limits {
            Some(limits) => QuotaGate::new(self.config.max_concurrency, limits),
            None => QuotaGate::unlimited(self.config.max_concurrency),
        }
    }

    async fn execute(&self, admitted: AdmittedInput, cancel: CancellationToken) -> BatchResult {
        let mut aggregator = Aggregator::start();
        let AdmittedInput { items, skipped } = admitted;

        for error in &skipped {
            aggregator.push(ResultItem::skipped(error.entry_id(), error.order));
        }

        let gate = self.build_gate();
        let workers = gate.max_concurrency().min(items.len());
        info!(
            agent = self.agent.name(),
            items = items.len(),
            skipped = aggregator.len(),
            workers,
            rate_limited = gate.is_rate_limited(),
            "Starting batch"
        );

        let context = Arc::new(RunContext {
            agent: Arc::clone(&self.agent),
            config: self.config.clone(),
            gate,
        });
        let queue = Arc::new(Mutex::new(VecDeque::from(items)));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handles: Vec<_> = (0..workers)
            .map(|worker_id| {
                let context = Arc::clone(&context);
                let queue = Arc::clone(&queue);
                let tx = tx.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { context.work(worker_id, &queue, &tx, &cancel).await })
            })
            .collect();
        drop(tx);

        for (worker_id, joined) in join_all(handles).await.into_iter().enumerate() {
            if let Err(e) = joined {
                error!(worker_id, error = %e, "Worker task failed");
            }
        }
        aggregator.collect(&mut rx).await;
        debug!(gate = ?context.gate.snapshot(), "Quota gate after run");

        // left in the queue only when cancelled
        let remaining: Vec<WorkItem> = pop_all(&queue);
        if !remaining.is_empty() {
            info!(count = remaining.len(), "Run cancelled, marking unstarted items");
        }
        for item in &remaining {
            aggregator.push(ResultItem::cancelled(item));
        }

        let result = aggregator.finish();
        info!(
            total = result.total,
            succeeded = result.succeeded,
            failed = result.failed,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "Batch finished"
        );
        result
    }
}

/// State shared by the workers of one run.
struct RunContext {
    agent: Arc<dyn Agent>,
    config: ProcessorConfig,
    gate: QuotaGate,
}

impl RunContext {
    async fn work(
        &self,
        worker_id: usize,
        queue: &Mutex<VecDeque<WorkItem>>,
        tx: &mpsc::UnboundedSender<ResultItem>,
        cancel: &CancellationToken,
    ) {
        debug!(worker_id, "Worker started");
        while !cancel.is_cancelled() {
            let Some(item) = pop_front(queue) else {
                break;
            };
            // a panicking agent fails its item, not the worker
            let result = match AssertUnwindSafe(self.process_item(&item, cancel)).catch_unwind().await {
                Ok(result) => result,
                Err(_) => {
                    error!(worker_id, item_id = %item.id, "Agent panicked");
                    ResultItem::failed(&item, ItemState::Failed, "agent panicked".to_string(), 0, Duration::ZERO)
                }
            };
            if tx.send(result).is_err() {
                break;
            }
        }
        debug!(worker_id, "Worker stopped");
    }

    /// Drive one item to a terminal state.
    async fn process_item(&self, item: &WorkItem, cancel: &CancellationToken) -> ResultItem {
        let started = Instant::now();
        let max_attempts = self.config.max_attempts();
        let mut attempts = 0;
        let mut last_failure: Option<(ItemState, String)> = None;

        while attempts < max_attempts {
            let Some(permit) = self.gate.acquire(cancel).await else {
                break;
            };
            attempts += 1;
            debug!(item_id = %item.id, attempt = attempts, state = ?ItemState::Dispatching, "Dispatching");

            let request = ChatRequest::new(item.prompt.clone());
            let outcome = tokio::time::timeout(self.config.timeout, self.agent.chat(request)).await;

            let retry_after = match outcome {
                Ok(Ok(response)) => {
                    permit.complete(response.tokens_used);
                    debug!(item_id = %item.id, attempt = attempts, tokens = response.tokens_used, "Succeeded");
                    return ResultItem::succeeded(item, response.text, response.tokens_used, attempts, started.elapsed());
                }
                Ok(Err(e)) => {
                    drop(permit);
                    warn!(item_id = %item.id, attempt = attempts, error = %e, "Attempt failed");
                    let retry_after = e.retry_after();
                    last_failure = Some((ItemState::Failed, e.to_string()));
                    retry_after
                }
                Err(_) => {
                    drop(permit);
                    let message = format!("timed out after {}ms", self.config.timeout.as_millis());
                    warn!(item_id = %item.id, attempt = attempts, "Attempt {}", message);
                    last_failure = Some((ItemState::TimedOut, message));
                    None
                }
            };

            if attempts >= max_attempts {
                break;
            }

            let delay = retry_after.map_or(self.config.retry_delay, |d| d.max(self.config.retry_delay));
            debug!(
                item_id = %item.id,
                delay_ms = delay.as_millis() as u64,
                state = ?ItemState::Retrying,
                "Retrying"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        match last_failure {
            Some((state, message)) => ResultItem::failed(item, state, message, attempts, started.elapsed()),
            None => ResultItem::cancelled(item),
        }
    }
}

fn pop_front(queue: &Mutex<VecDeque<WorkItem>>) -> Option<WorkItem> {
    queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front()
}

fn pop_all(queue: &Mutex<VecDeque<WorkItem>>) -> Vec<WorkItem> {
    queue.lock().unwrap_or_else(|e| e.into_inner()).drain(..).collect()
}
