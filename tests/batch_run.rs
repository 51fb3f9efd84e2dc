//! Batch run integration tests
//!
//! Drives the processor end to end from files on disk with in-test agents.

use async_trait::async_trait;
use batchr::agent::{Agent, AgentError, ChatRequest, ChatResponse, EchoAgent};
use batchr::error::{BatchError, Result};
use batchr::input::parse_file;
use batchr::{BatchResult, ItemState, Processor, ProcessorConfig, RateLimiterConfig};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn write_input(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

fn single_file_config() -> ProcessorConfig {
    ProcessorConfig::default()
        .with_concurrency(1)
        .with_retries(0, Duration::ZERO)
}

async fn run_echo(path: &Path, config: ProcessorConfig) -> Result<BatchResult> {
    let processor = Processor::new(Arc::new(EchoAgent::new()), config)?;
    processor.run_file(path, None, CancellationToken::new()).await
}

/// Records when each call started and how many ran at once.
#[derive(Default)]
struct RecordingAgent {
    starts: Mutex<Vec<Instant>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl Agent for RecordingAgent {
    async fn chat(&self, request: ChatRequest) -> std::result::Result<ChatResponse, AgentError> {
        self.starts.lock().unwrap().push(Instant::now());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(ChatResponse::new(request.message, 20))
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// First call takes 30s; every call reports zero tokens.
#[derive(Default)]
struct SlowStartAgent {
    starts: Mutex<Vec<Instant>>,
    calls: AtomicUsize,
}

#[async_trait]
impl Agent for SlowStartAgent {
    async fn chat(&self, request: ChatRequest) -> std::result::Result<ChatResponse, AgentError> {
        self.starts.lock().unwrap().push(Instant::now());
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        Ok(ChatResponse::new(request.message, 0))
    }

    fn name(&self) -> &str {
        "slow-start"
    }
}

/// Largest number of starts inside any rolling 60s window.
fn busiest_minute(starts: &[Instant]) -> usize {
    starts
        .iter()
        .map(|start| {
            starts
                .iter()
                .filter(|other| **other >= *start && **other < *start + Duration::from_secs(60))
                .count()
        })
        .max()
        .unwrap_or(0)
}

/// Cancels the run from inside its first call.
struct CancellingAgent {
    cancel: CancellationToken,
    calls: AtomicUsize,
}

#[async_trait]
impl Agent for CancellingAgent {
    async fn chat(&self, request: ChatRequest) -> std::result::Result<ChatResponse, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.cancel.cancel();
        Ok(ChatResponse::new(request.message, 1))
    }

    fn name(&self) -> &str {
        "cancelling"
    }
}

#[tokio::test]
async fn test_text_file_blank_and_comment_lines() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_input(&dir, "prompts.txt", "hello\n\n# skip me\nworld\n");

    let result = run_echo(&path, single_file_config()).await?;

    assert_eq!(result.total, 2);
    assert_eq!(result.succeeded, 2);
    assert_eq!(result.skipped, 0);
    let ids: Vec<&str> = result.items.iter().map(|item| item.id.as_str()).collect();
    assert_eq!(ids, vec!["line-1", "line-4"]);
    assert_eq!(result.items[0].output.as_deref(), Some("hello"));
    assert_eq!(result.items[1].output.as_deref(), Some("world"));
    assert!(result.items.iter().all(|item| item.attempts == 1));
    Ok(())
}

#[tokio::test]
async fn test_duplicate_ids_abort_before_dispatch() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_input(
        &dir,
        "batch.jsonl",
        "{\"id\":\"a\",\"message\":\"x\"}\n{\"id\":\"a\",\"message\":\"y\"}\n",
    );

    let agent = Arc::new(RecordingAgent::default());
    let processor = Processor::new(agent.clone(), ProcessorConfig::default())?;
    let err = processor
        .run_file(&path, None, CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        BatchError::InvalidInput { errors } => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].line, 2);
            assert!(errors[0].message.contains("duplicate"));
        }
        other => panic!("expected InvalidInput, got {other:?}"),
    }
    assert!(agent.starts.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_skip_invalid_records_skipped_entries() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_input(
        &dir,
        "batch.jsonl",
        "{\"id\":\"a\",\"message\":\"first\"}\nnot json\n{\"id\":\"c\",\"message\":\"third\"}\n",
    );

    let result = run_echo(&path, single_file_config().with_skip_invalid(true)).await?;

    assert_eq!(result.total, 3);
    assert_eq!(result.succeeded, 2);
    assert_eq!(result.skipped, 1);
    assert_eq!(result.failures().count(), 0);

    let skipped = &result.items[1];
    assert_eq!(skipped.id, "line-2");
    assert_eq!(skipped.state, ItemState::Skipped);
    assert!(skipped.is_skipped());
    assert_eq!(result.items[2].id, "c");
    Ok(())
}

#[tokio::test]
async fn test_skipped_entry_keeps_its_own_id() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_input(
        &dir,
        "batch.jsonl",
        "{\"id\":\"line-2\",\"message\":\"first\"}\n{\"id\":\"q\"}\n",
    );

    let result = run_echo(&path, single_file_config().with_skip_invalid(true)).await?;

    let ids: Vec<&str> = result.items.iter().map(|item| item.id.as_str()).collect();
    assert_eq!(ids, vec!["line-2", "q"]);
    assert_eq!(result.items[0].state, ItemState::Succeeded);
    assert_eq!(result.items[1].state, ItemState::Skipped);
    Ok(())
}

#[tokio::test]
async fn test_invalid_entries_abort_without_skip() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_input(&dir, "batch.jsonl", "{\"id\":\"a\"}\n");

    let err = run_echo(&path, single_file_config()).await.unwrap_err();
    assert!(matches!(err, BatchError::InvalidInput { .. }));
    Ok(())
}

#[tokio::test]
async fn test_missing_input_file_is_fatal() {
    let dir = TempDir::new().unwrap();
    let err = run_echo(&dir.path().join("absent.txt"), single_file_config())
        .await
        .unwrap_err();
    assert!(matches!(err, BatchError::Io(_)));
}

#[tokio::test]
async fn test_rerun_yields_identical_ids() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_input(&dir, "prompts.txt", "one\ntwo\n\nthree\n");

    let first = run_echo(&path, ProcessorConfig::default()).await?;
    let second = run_echo(&path, ProcessorConfig::default()).await?;

    let ids = |result: &BatchResult| result.items.iter().map(|item| item.id.clone()).collect::<Vec<_>>();
    assert_eq!(ids(&first), vec!["line-1", "line-2", "line-4"]);
    assert_eq!(ids(&first), ids(&second));

    let parsed = parse_file(&path, None)?;
    assert_eq!(parsed.items.iter().map(|item| item.id.clone()).collect::<Vec<_>>(), ids(&first));
    Ok(())
}

#[tokio::test]
async fn test_cancel_after_first_item() -> Result<()> {
    let dir = TempDir::new()?;
    let content: String = (1..=10).map(|n| format!("prompt {}\n", n)).collect();
    let path = write_input(&dir, "prompts.txt", &content);

    let cancel = CancellationToken::new();
    let agent = Arc::new(CancellingAgent {
        cancel: cancel.clone(),
        calls: AtomicUsize::new(0),
    });
    let processor = Processor::new(agent.clone(), single_file_config())?;
    let result = processor.run_file(&path, None, cancel).await?;

    assert_eq!(result.total, 10);
    assert_eq!(agent.calls.load(Ordering::SeqCst), 1);
    assert_eq!(result.succeeded, 1);
    assert_eq!(result.cancelled, 9);
    assert_eq!(result.items[0].state, ItemState::Succeeded);
    assert!(result.items[1..].iter().all(|item| item.state == ItemState::Cancelled && !item.success));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_rate_limits_hold_over_rolling_window() -> Result<()> {
    let dir = TempDir::new()?;
    let content: String = (1..=12).map(|n| format!("prompt {}\n", n)).collect();
    let path = write_input(&dir, "prompts.txt", &content);

    let limits = RateLimiterConfig::new(2, 5, 1_000_000).with_token_estimate(50);
    let agent = Arc::new(RecordingAgent::default());
    let processor = Processor::new(agent.clone(), ProcessorConfig::default().with_concurrency(8))?
        .with_rate_limiter(limits)?;

    let started = Instant::now();
    let result = processor.run_file(&path, None, CancellationToken::new()).await?;

    assert_eq!(result.succeeded, 12);
    assert!(agent.peak.load(Ordering::SeqCst) <= 2);

    let starts = agent.starts.lock().unwrap().clone();
    assert_eq!(starts.len(), 12);
    let busiest = busiest_minute(&starts);
    assert!(busiest <= 5, "{} requests inside one minute", busiest);

    // 12 requests at 5 per minute need at least two full windows
    assert!(started.elapsed() >= Duration::from_secs(120));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_request_limit_holds_while_waiting_on_tokens() -> Result<()> {
    let dir = TempDir::new()?;
    let content: String = (1..=10).map(|n| format!("prompt {}\n", n)).collect();
    let path = write_input(&dir, "prompts.txt", &content);

    // one estimate fills the token budget, so every worker queues on tokens
    let limits = RateLimiterConfig::new(10, 5, 100).with_token_estimate(100);
    let agent = Arc::new(SlowStartAgent::default());
    let processor = Processor::new(agent.clone(), ProcessorConfig::default().with_concurrency(10))?
        .with_rate_limiter(limits)?;

    let result = processor.run_file(&path, None, CancellationToken::new()).await?;

    assert_eq!(result.succeeded, 10);
    let starts = agent.starts.lock().unwrap().clone();
    assert_eq!(starts.len(), 10);
    let busiest = busiest_minute(&starts);
    assert!(busiest <= 5, "{} requests inside one minute", busiest);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_token_budget_limits_dispatch() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_input(&dir, "prompts.txt", "a\nb\nc\nd\n");

    // each call reports 20 tokens; 40 per minute admits two calls per window
    let limits = RateLimiterConfig::new(4, 1_000, 40).with_token_estimate(20);
    let agent = Arc::new(RecordingAgent::default());
    let processor = Processor::new(agent.clone(), ProcessorConfig::default().with_concurrency(4))?
        .with_rate_limiter(limits)?;

    let started = Instant::now();
    let result = processor.run_file(&path, None, CancellationToken::new()).await?;

    assert_eq!(result.succeeded, 4);
    assert_eq!(result.total_tokens, 80);
    assert!(started.elapsed() >= Duration::from_secs(60));
    Ok(())
}

#[tokio::test]
async fn test_results_written_as_json() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_input(&dir, "prompts.txt", "alpha\nbeta\n");
    let output = dir.path().join("out").join("results.json");

    let result = run_echo(&path, ProcessorConfig::default()).await?;
    result.write_json(&output)?;

    let document: serde_json::Value = serde_json::from_str(&fs::read_to_string(&output)?)?;
    assert_eq!(document["total"], 2);
    assert_eq!(document["succeeded"], 2);
    let items = document["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["id"], "line-1");
    assert_eq!(items[0]["state"], "succeeded");
    assert_eq!(items[1]["output"], "beta");
    Ok(())
}
