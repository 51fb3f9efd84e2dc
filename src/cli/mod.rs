//! CLI module for batchr - command-line interface and subcommands.
//!
//! Provides the main entry point with the batch and tiers subcommands.

pub mod commands;

pub use commands::Cli;
