//! Quota gate - admission control for agent dispatches.
//!
//! Every dispatch attempt acquires, in this fixed order:
//! 1. a concurrency slot
//! 2. one request credit
//! 3. a token reservation (`token_estimate`)
//!
//! The request credit is only held while waiting for tokens. Its window starts
//! once all three are in hand, which is when the call starts, so the request
//! budget counts call starts. Credits are consumed, never returned; only the
//! token reservation is corrected once the agent reports real usage. The slot
//! goes back when the permit is dropped.

use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::budget::{Budget, Reservation};
use super::rate_limit::RateLimiterConfig;

/// Point-in-time view of the gate, for logs and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateSnapshot {
    pub max_concurrency: usize,
    pub available_slots: usize,
    pub requests_remaining: Option<i64>,
    pub tokens_remaining: Option<i64>,
}

/// Shared admission control for all workers of one run.
#[derive(Debug)]
pub struct QuotaGate {
    slots: Semaphore,
    max_concurrency: usize,
    requests: Option<Budget>,
    tokens: Option<Budget>,
    token_estimate: u64,
}

impl QuotaGate {
    /// Gate that only bounds concurrency.
    pub fn unlimited(max_concurrency: usize) -> Self {
        Self {
            slots: Semaphore::new(max_concurrency),
            max_concurrency,
            requests: None,
            tokens: None,
            token_estimate: 0,
        }
    }

    /// Gate enforcing `limits`; its concurrency can only tighten `max_concurrency`.
    pub fn new(max_concurrency: usize, limits: &RateLimiterConfig) -> Self {
        let max_concurrency = max_concurrency.min(limits.max_concurrency);
        Self {
            slots: Semaphore::new(max_concurrency),
            max_concurrency,
            requests: Some(Budget::new("requests", limits.requests_per_minute, limits.strategy)),
            tokens: Some(Budget::new("tokens", limits.tokens_per_minute, limits.strategy)),
            token_estimate: limits.token_estimate,
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn token_estimate(&self) -> u64 {
        self.token_estimate
    }

    pub fn is_rate_limited(&self) -> bool {
        self.requests.is_some()
    }

    /// Wait until a slot, a request credit and a token reservation are all held.
    ///
    /// Returns `None` once `cancel` fires; a partially acquired slot is released.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Option<QuotaPermit<'_>> {
        let slot = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            slot = self.slots.acquire() => slot.ok()?,
        };

        let request = match &self.requests {
            Some(requests) => Some((requests, requests.hold(1, cancel).await?)),
            None => None,
        };

        let tokens = match &self.tokens {
            Some(tokens) => match tokens.reserve(self.token_estimate, cancel).await {
                Some(reservation) => Some(reservation),
                None => {
                    if let Some((requests, credit)) = &request {
                        requests.release(credit);
                    }
                    return None;
                }
            },
            None => None,
        };

        if let Some((requests, credit)) = &request {
            requests.commit(credit);
        }

        debug!(available_slots = self.slots.available_permits(), "Quota acquired");

        Some(QuotaPermit {
            gate: self,
            _slot: slot,
            tokens,
        })
    }

    pub fn snapshot(&self) -> GateSnapshot {
        GateSnapshot {
            max_concurrency: self.max_concurrency,
            available_slots: self.slots.available_permits(),
            requests_remaining: self.requests.as_ref().map(Budget::remaining),
            tokens_remaining: self.tokens.as_ref().map(Budget::remaining),
        }
    }
}

/// Admission for one dispatch attempt; dropping it frees the concurrency slot.
#[derive(Debug)]
pub struct QuotaPermit<'a> {
    gate: &'a QuotaGate,
    _slot: SemaphorePermit<'a>,
    tokens: Option<Reservation>,
}

impl QuotaPermit<'_> {
    /// Settle the token reservation with the usage the agent reported.
    ///
    /// A permit dropped without calling this keeps the estimate charged.
    pub fn complete(self, tokens_used: u64) {
        if let (Some(budget), Some(reservation)) = (&self.gate.tokens, &self.tokens) {
            budget.reconcile(reservation, tokens_used);
        }
    }
}
