//! Scheduler module - the quota gate in front of the agent.
//!
//! This module provides:
//! - **Budgets**: per-minute request and token accounting, either as an exact
//!   sliding window or a continuously refilled token bucket.
//! - **Tier presets**: named provider limits (`TIER_3`, `TIER_4`, `TIER_5`).
//! - **QuotaGate**: concurrency slots plus both budgets, acquired in a fixed
//!   order by every dispatch attempt.
//!
//! # Example
//!
//! ```ignore
//! use batchr::scheduler::{QuotaGate, Tier};
//!
//! let gate = QuotaGate::new(8, &Tier::Tier3.config());
//! let permit = gate.acquire(&cancel).await.expect("not cancelled");
//! let response = agent.chat(request).await?;
//! permit.complete(response.tokens_used);
//! ```

mod budget;
mod gate;
mod rate_limit;

pub use budget::{Budget, BudgetStrategy, Reservation, WINDOW};
pub use gate::{GateSnapshot, QuotaGate, QuotaPermit};
pub use rate_limit::{DEFAULT_TOKEN_ESTIMATE, RateLimiterConfig, TIER_3, TIER_4, TIER_5, Tier};
