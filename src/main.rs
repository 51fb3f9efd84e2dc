use batchr::agent::{Agent, AnthropicAgent, EchoAgent};
use batchr::scheduler::Tier;
use batchr::{BatchResult, Processor};
use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::{info, warn};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

mod cli;
mod config;

use cli::Cli;
use cli::commands::{BatchArgs, Commands};
use config::Config;

fn setup_logging(default_level: Option<&str>) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("batchr")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("batchr.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    // RUST_LOG wins over the configured level
    let env = env_logger::Env::default().default_filter_or(default_level.unwrap_or("info"));
    env_logger::Builder::from_env(env)
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Batch(args) => handle_batch_command(args, config, cli.is_verbose()).await,
        Commands::Tiers => handle_tiers_command(),
    }
}

fn build_agent(args: &BatchArgs, config: &Config) -> Result<Arc<dyn Agent>> {
    if args.dry_run {
        info!("Dry run: answering prompts with the echo agent");
        return Ok(Arc::new(EchoAgent::new()));
    }
    let agent = AnthropicAgent::new(config.llm.agent_config()).context("Failed to create agent")?;
    Ok(Arc::new(agent))
}

fn build_processor(args: &BatchArgs, config: &Config, agent: Arc<dyn Agent>) -> Result<Processor> {
    let batch = &config.batch;
    let mut processor_config = batch.processor_config();
    if let Some(concurrency) = args.concurrency {
        processor_config.max_concurrency = concurrency;
    }
    if let Some(secs) = args.timeout {
        processor_config.timeout = std::time::Duration::from_secs(secs);
    }
    if let Some(retries) = args.retries {
        processor_config.retry_count = retries;
    }
    if let Some(delay_ms) = args.retry_delay_ms {
        processor_config.retry_delay = std::time::Duration::from_millis(delay_ms);
    }
    if args.skip_invalid {
        processor_config.skip_invalid = true;
    }
    if args.no_validate {
        processor_config.validate_input = false;
    }

    let processor = Processor::new(agent, processor_config).context("Invalid batch settings")?;
    match args.tier {
        Some(tier) => {
            let limits = tier
                .config()
                .with_token_estimate(args.token_estimate.unwrap_or(batch.token_estimate))
                .with_strategy(args.rate_strategy.unwrap_or(batch.rate_strategy));
            info!("Rate limiting with {}: {:?}", tier, limits);
            processor.with_rate_limiter(limits).context("Invalid rate limiter settings")
        }
        None => Ok(processor),
    }
}

/// Cancel the batch on the first Ctrl-C. In-flight attempts are allowed to finish.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling batch");
            eprintln!("{}", "Interrupted: finishing in-flight requests...".yellow());
            cancel.cancel();
        }
    });
}

async fn handle_batch_command(args: &BatchArgs, config: &Config, verbose: bool) -> Result<()> {
    info!("Running batch from {}", args.input.display());

    let agent = build_agent(args, config)?;
    let processor = build_processor(args, config, agent)?;

    if verbose {
        let settings = processor.config();
        println!(
            "{} {} (concurrency {}, timeout {:?}, {} attempt(s) per item)",
            "Dispatching:".cyan(),
            args.input.display(),
            settings.max_concurrency,
            settings.timeout,
            settings.max_attempts()
        );
        if let Some(limits) = processor.rate_limiter() {
            println!(
                "{} {} rpm, {} tpm, {} concurrent",
                "Rate limit:".cyan(),
                limits.requests_per_minute,
                limits.tokens_per_minute,
                limits.max_concurrency
            );
        }
    }

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let result = processor
        .run_file(&args.input, args.format, cancel)
        .await
        .context(format!("Batch failed for {}", args.input.display()))?;

    print_summary(&result);
    if args.show_failures {
        print_failures(&result);
    }

    if let Some(output) = &args.output {
        result
            .write_json(output)
            .context(format!("Failed to write results to {}", output.display()))?;
        println!("{} {}", "Results written to".green(), output.display());
    }

    Ok(())
}

fn print_summary(result: &BatchResult) {
    let heading = if result.all_succeeded() {
        "Batch complete".green().bold()
    } else {
        "Batch complete with failures".red().bold()
    };
    println!("{}", heading);
    for line in result.summary().lines() {
        println!("  {}", line);
    }
}

fn print_failures(result: &BatchResult) {
    let mut failures = result.failures().peekable();
    if failures.peek().is_none() {
        return;
    }
    println!("{}", "Failures:".red());
    for item in failures {
        println!(
            "  {} [{:?}] {}",
            item.id.bold(),
            item.state,
            item.error.as_deref().unwrap_or("unknown error")
        );
    }
}

fn handle_tiers_command() -> Result<()> {
    println!("{:<8} {:>12} {:>8} {:>12}", "TIER", "CONCURRENCY", "RPM", "TPM");
    for tier in Tier::ALL {
        let limits = tier.config();
        println!(
            "{} {:>12} {:>8} {:>12}",
            format!("{:<8}", tier.number()).cyan(),
            limits.max_concurrency,
            limits.requests_per_minute,
            limits.tokens_per_minute
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    setup_logging(config.log_level.as_deref()).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
