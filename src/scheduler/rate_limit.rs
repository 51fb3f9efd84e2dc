//! Rate limiter configuration and provider tier presets.
//!
//! A tier bundles the three limits a provider enforces on one account:
//! concurrent calls, requests per minute and tokens per minute.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::budget::BudgetStrategy;
use crate::error::{BatchError, Result};

/// Tokens reserved per dispatch before the real usage is known.
pub const DEFAULT_TOKEN_ESTIMATE: u64 = 1000;

/// Rate limiter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Max concurrent agent calls; can only tighten the processor's own limit.
    pub max_concurrency: usize,
    /// Requests accepted per rolling minute.
    pub requests_per_minute: u64,
    /// Tokens consumed per rolling minute.
    pub tokens_per_minute: u64,
    /// Tokens reserved at acquisition, reconciled with actual usage afterwards.
    #[serde(default = "default_token_estimate")]
    pub token_estimate: u64,
    #[serde(default)]
    pub strategy: BudgetStrategy,
}

fn default_token_estimate() -> u64 {
    DEFAULT_TOKEN_ESTIMATE
}

pub const TIER_3: RateLimiterConfig = RateLimiterConfig::preset(200, 5_000, 3_000_000);
pub const TIER_4: RateLimiterConfig = RateLimiterConfig::preset(400, 5_000, 4_000_000);
pub const TIER_5: RateLimiterConfig = RateLimiterConfig::preset(1_000, 10_000, 5_000_000);

impl RateLimiterConfig {
    const fn preset(max_concurrency: usize, requests_per_minute: u64, tokens_per_minute: u64) -> Self {
        Self {
            max_concurrency,
            requests_per_minute,
            tokens_per_minute,
            token_estimate: DEFAULT_TOKEN_ESTIMATE,
            strategy: BudgetStrategy::SlidingWindow,
        }
    }

    /// Create config with custom limits.
    pub fn new(max_concurrency: usize, requests_per_minute: u64, tokens_per_minute: u64) -> Self {
        Self::preset(max_concurrency, requests_per_minute, tokens_per_minute)
    }

    pub fn with_token_estimate(mut self, token_estimate: u64) -> Self {
        self.token_estimate = token_estimate;
        self
    }

    pub fn with_strategy(mut self, strategy: BudgetStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Reject zero limits.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(BatchError::InvalidConfig("rate limiter max_concurrency must be > 0".to_string()));
        }
        if self.requests_per_minute == 0 {
            return Err(BatchError::InvalidConfig("requests_per_minute must be > 0".to_string()));
        }
        if self.tokens_per_minute == 0 {
            return Err(BatchError::InvalidConfig("tokens_per_minute must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Named provider service level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tier {
    Tier3,
    Tier4,
    Tier5,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Tier3, Tier::Tier4, Tier::Tier5];

    pub fn config(self) -> RateLimiterConfig {
        match self {
            Tier::Tier3 => TIER_3,
            Tier::Tier4 => TIER_4,
            Tier::Tier5 => TIER_5,
        }
    }

    pub fn number(self) -> u8 {
        match self {
            Tier::Tier3 => 3,
            Tier::Tier4 => 4,
            Tier::Tier5 => 5,
        }
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().trim_start_matches("tier").trim_start_matches('-') {
            "3" => Ok(Tier::Tier3),
            "4" => Ok(Tier::Tier4),
            "5" => Ok(Tier::Tier5),
            other => Err(format!("unknown tier '{}' (expected 3, 4 or 5)", other)),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tier {}", self.number())
    }
}
