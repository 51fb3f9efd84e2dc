//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - batch: dispatch every prompt of an input file
//! - tiers: list the rate limiter presets

use batchr::input::InputFormat;
use batchr::scheduler::{BudgetStrategy, Tier};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// batchr - rate-limited batch dispatcher for LLM agent requests
#[derive(Parser, Debug)]
#[command(name = "batchr")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Dispatch every prompt of an input file to the agent
    Batch(BatchArgs),

    /// Show the rate limiter tier presets
    Tiers,
}

/// Arguments of the batch subcommand
#[derive(Args, Debug, Clone)]
pub struct BatchArgs {
    /// Input file (text: one prompt per line, or .jsonl with id/message)
    #[arg(short, long)]
    pub input: PathBuf,

    /// Write the full result as JSON to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Max concurrent dispatches [default: 3]
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Per-item timeout in seconds [default: 60]
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Rate limiter preset (3, 4 or 5); no rate limiting when omitted
    #[arg(long)]
    pub tier: Option<Tier>,

    /// Force the input format instead of detecting it from the extension
    #[arg(long)]
    pub format: Option<InputFormat>,

    /// Retries per item after the first attempt
    #[arg(long)]
    pub retries: Option<u32>,

    /// Delay between attempts in milliseconds
    #[arg(long)]
    pub retry_delay_ms: Option<u64>,

    /// Record invalid entries as skipped instead of aborting
    #[arg(long)]
    pub skip_invalid: bool,

    /// Do not abort on invalid entries (they are skipped)
    #[arg(long)]
    pub no_validate: bool,

    /// Budget accounting (sliding_window or token_bucket)
    #[arg(long)]
    pub rate_strategy: Option<BudgetStrategy>,

    /// Tokens reserved per dispatch before actual usage is known
    #[arg(long)]
    pub token_estimate: Option<u64>,

    /// Answer every prompt locally instead of calling the API
    #[arg(long)]
    pub dry_run: bool,

    /// List failed items with their errors after the summary
    #[arg(long)]
    pub show_failures: bool,
}
