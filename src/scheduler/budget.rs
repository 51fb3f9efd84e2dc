//! Per-minute consumable budgets (requests or tokens).
//!
//! A budget is charged when a dispatch is admitted and is only replenished by
//! time passing. Charges can be corrected after the fact with
//! [`Budget::reconcile`], which is how the token budget turns an up-front
//! estimate into the real usage reported by the agent.
//!
//! A charge can also be *held* ([`Budget::hold`]): it counts against the
//! budget but carries no timestamp until [`Budget::commit`] stamps it, and it
//! never expires in between. [`Budget::release`] gives a held charge back.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Length of the rolling window all budgets are expressed in.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Shortest wait between two admission checks.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// How a budget accounts for consumption over time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetStrategy {
    /// Exact rolling 60s ledger: charges expire one window after they were made.
    #[default]
    SlidingWindow,
    /// Bucket of `capacity` refilled continuously at `capacity / 60` per second.
    TokenBucket,
}

impl FromStr for BudgetStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "sliding_window" | "window" => Ok(BudgetStrategy::SlidingWindow),
            "token_bucket" | "bucket" => Ok(BudgetStrategy::TokenBucket),
            other => Err(format!("unknown rate strategy '{}'", other)),
        }
    }
}

impl fmt::Display for BudgetStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BudgetStrategy::SlidingWindow => write!(f, "sliding_window"),
            BudgetStrategy::TokenBucket => write!(f, "token_bucket"),
        }
    }
}

/// An admitted charge against a budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    seq: u64,
    amount: u64,
}

impl Reservation {
    pub fn amount(&self) -> u64 {
        self.amount
    }
}

#[derive(Debug)]
struct Charge {
    seq: u64,
    at: Instant,
    amount: u64,
}

#[derive(Debug)]
enum Ledger {
    /// `used` covers both timed `charges` and `held` ones.
    Window {
        charges: VecDeque<Charge>,
        held: Vec<Reservation>,
        used: u64,
    },
    Bucket { level: f64, last_refill: Instant },
}

#[derive(Debug)]
struct BudgetState {
    ledger: Ledger,
    next_seq: u64,
}

/// A per-minute budget shared by all workers.
#[derive(Debug)]
pub struct Budget {
    name: &'static str,
    capacity: u64,
    state: Mutex<BudgetState>,
    /// Wakes waiters when budget is handed back before its window ends.
    freed: Notify,
}

impl Budget {
    /// Create a full budget.
    pub fn new(name: &'static str, capacity: u64, strategy: BudgetStrategy) -> Self {
        let ledger = match strategy {
            BudgetStrategy::SlidingWindow => Ledger::Window {
                charges: VecDeque::new(),
                held: Vec::new(),
                used: 0,
            },
            BudgetStrategy::TokenBucket => Ledger::Bucket {
                level: capacity as f64,
                last_refill: Instant::now(),
            },
        };

        Self {
            name,
            capacity,
            state: Mutex::new(BudgetState { ledger, next_seq: 0 }),
            freed: Notify::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, BudgetState> {
        // state is updated in single assignments, so a poisoned guard is still consistent
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Charge `amount` now if the budget allows it, otherwise return how long to wait.
    ///
    /// `amount` is clamped to the capacity so that any single charge can
    /// eventually be admitted. Nothing is admitted while the budget is overdrawn.
    pub fn try_reserve(&self, amount: u64) -> Result<Reservation, Duration> {
        self.try_charge(amount, false)
    }

    /// Like [`Budget::try_reserve`], but the charge stays untimed until committed.
    pub fn try_hold(&self, amount: u64) -> Result<Reservation, Duration> {
        self.try_charge(amount, true)
    }

    fn try_charge(&self, amount: u64, hold: bool) -> Result<Reservation, Duration> {
        let amount = amount.min(self.capacity);
        let now = Instant::now();
        let capacity = self.capacity;
        let mut guard = self.lock();
        let state = &mut *guard;
        let seq = state.next_seq;

        let admitted = match &mut state.ledger {
            Ledger::Window { charges, held, used } => {
                prune(charges, used, now);
                if *used + amount <= capacity {
                    if hold {
                        held.push(Reservation { seq, amount });
                    } else {
                        charges.push_back(Charge { seq, at: now, amount });
                    }
                    *used += amount;
                    Ok(())
                } else {
                    Err(window_wait(charges, *used + amount - capacity, now))
                }
            }
            Ledger::Bucket { level, last_refill } => {
                refill(level, last_refill, capacity, now);
                if *level >= amount as f64 {
                    *level -= amount as f64;
                    Ok(())
                } else {
                    let rate = capacity as f64 / WINDOW.as_secs_f64();
                    Err(Duration::from_secs_f64((amount as f64 - *level) / rate))
                }
            }
        };

        match admitted {
            Ok(()) => {
                state.next_seq += 1;
                Ok(Reservation { seq, amount })
            }
            Err(wait) => Err(wait.max(MIN_WAIT)),
        }
    }

    /// Wait until `amount` can be charged. Returns `None` if cancelled first.
    pub async fn reserve(&self, amount: u64, cancel: &CancellationToken) -> Option<Reservation> {
        self.wait_for(amount, false, cancel).await
    }

    /// Wait until `amount` can be held. Returns `None` if cancelled first.
    pub async fn hold(&self, amount: u64, cancel: &CancellationToken) -> Option<Reservation> {
        self.wait_for(amount, true, cancel).await
    }

    async fn wait_for(&self, amount: u64, hold: bool, cancel: &CancellationToken) -> Option<Reservation> {
        loop {
            let freed = self.freed.notified();
            tokio::pin!(freed);
            freed.as_mut().enable();

            match self.try_charge(amount, hold) {
                Ok(reservation) => return Some(reservation),
                Err(wait) => {
                    debug!(budget = self.name, wait_ms = wait.as_millis() as u64, "Budget exhausted, waiting");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return None,
                        _ = freed.as_mut() => {}
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
            }
        }
    }

    /// Start the window of a held charge now.
    ///
    /// Charges that are not held (or already committed) are left alone.
    pub fn commit(&self, reservation: &Reservation) {
        let now = Instant::now();
        let mut guard = self.lock();

        if let Ledger::Window { charges, held, .. } = &mut guard.ledger
            && let Some(pos) = held.iter().position(|h| h.seq == reservation.seq)
        {
            let held = held.swap_remove(pos);
            charges.push_back(Charge {
                seq: held.seq,
                at: now,
                amount: held.amount,
            });
        }
    }

    /// Give a held charge back unused.
    pub fn release(&self, reservation: &Reservation) {
        let now = Instant::now();
        let capacity = self.capacity;
        let mut guard = self.lock();

        match &mut guard.ledger {
            Ledger::Window { held, used, .. } => {
                if let Some(pos) = held.iter().position(|h| h.seq == reservation.seq) {
                    *used -= held.swap_remove(pos).amount;
                }
            }
            Ledger::Bucket { level, last_refill } => {
                refill(level, last_refill, capacity, now);
                *level = (*level + reservation.amount as f64).min(capacity as f64);
            }
        }
        drop(guard);
        self.freed.notify_waiters();
    }

    /// Replace a reservation's amount with the actual consumption.
    ///
    /// Overestimates are credited back, shortfalls debited; the budget may go
    /// negative, which blocks new reservations until time catches up.
    pub fn reconcile(&self, reservation: &Reservation, actual: u64) {
        let now = Instant::now();
        let capacity = self.capacity;
        let mut guard = self.lock();
        let state = &mut *guard;
        let next_seq = state.next_seq;

        match &mut state.ledger {
            Ledger::Window { charges, used, .. } => {
                prune(charges, used, now);
                if let Some(charge) = charges.iter_mut().find(|c| c.seq == reservation.seq) {
                    *used = *used - charge.amount + actual;
                    charge.amount = actual;
                } else if actual > reservation.amount {
                    // original charge already left the window; book the shortfall now
                    let extra = actual - reservation.amount;
                    charges.push_back(Charge {
                        seq: next_seq,
                        at: now,
                        amount: extra,
                    });
                    *used += extra;
                    state.next_seq += 1;
                }
            }
            Ledger::Bucket { level, last_refill } => {
                refill(level, last_refill, capacity, now);
                *level = (*level + reservation.amount as f64 - actual as f64).min(capacity as f64);
            }
        }
        drop(guard);
        if actual < reservation.amount {
            self.freed.notify_waiters();
        }
    }

    /// Budget left right now; negative when overdrawn.
    pub fn remaining(&self) -> i64 {
        let now = Instant::now();
        let capacity = self.capacity;
        let mut guard = self.lock();
        let state = &mut *guard;

        match &mut state.ledger {
            Ledger::Window { charges, used, .. } => {
                prune(charges, used, now);
                capacity as i64 - *used as i64
            }
            Ledger::Bucket { level, last_refill } => {
                refill(level, last_refill, capacity, now);
                level.floor() as i64
            }
        }
    }
}

fn prune(charges: &mut VecDeque<Charge>, used: &mut u64, now: Instant) {
    while let Some(front) = charges.front() {
        if front.at + WINDOW > now {
            break;
        }
        *used -= front.amount;
        charges.pop_front();
    }
}

/// Time until enough of the oldest charges expire to free `needed`.
///
/// Held charges never expire; when they are what blocks, the caller waits a
/// full window or until one is released.
fn window_wait(charges: &VecDeque<Charge>, needed: u64, now: Instant) -> Duration {
    let mut freed = 0;
    for charge in charges {
        freed += charge.amount;
        if freed >= needed {
            return (charge.at + WINDOW).saturating_duration_since(now);
        }
    }
    WINDOW
}

fn refill(level: &mut f64, last_refill: &mut Instant, capacity: u64, now: Instant) {
    let elapsed = now.saturating_duration_since(*last_refill);
    let rate = capacity as f64 / WINDOW.as_secs_f64();
    *level = (*level + elapsed.as_secs_f64() * rate).min(capacity as f64);
    *last_refill = now;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_window_admits_up_to_capacity() {
        let budget = Budget::new("requests", 3, BudgetStrategy::SlidingWindow);

        assert!(budget.try_reserve(1).is_ok());
        assert!(budget.try_reserve(1).is_ok());
        assert!(budget.try_reserve(1).is_ok());

        let wait = budget.try_reserve(1).unwrap_err();
        assert_eq!(wait, WINDOW);
        assert_eq!(budget.remaining(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_frees_oldest_charge() {
        let budget = Budget::new("requests", 2, BudgetStrategy::SlidingWindow);

        budget.try_reserve(1).unwrap();
        tokio::time::advance(Duration::from_secs(20)).await;
        budget.try_reserve(1).unwrap();

        // the first charge expires at t=60, 40s from now
        let wait = budget.try_reserve(1).unwrap_err();
        assert_eq!(wait, Duration::from_secs(40));

        tokio::time::advance(Duration::from_secs(40)).await;
        assert!(budget.try_reserve(1).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_reconcile_credits_overestimate() {
        let budget = Budget::new("tokens", 1000, BudgetStrategy::SlidingWindow);

        let reservation = budget.try_reserve(800).unwrap();
        assert!(budget.try_reserve(800).is_err());

        budget.reconcile(&reservation, 150);
        assert_eq!(budget.remaining(), 850);
        assert!(budget.try_reserve(800).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_overdraft_blocks_new_reservations() {
        let budget = Budget::new("tokens", 1000, BudgetStrategy::SlidingWindow);

        let reservation = budget.try_reserve(100).unwrap();
        budget.reconcile(&reservation, 1500);
        assert_eq!(budget.remaining(), -500);

        // even a zero-cost charge waits while overdrawn
        assert!(budget.try_reserve(0).is_err());

        tokio::time::advance(WINDOW).await;
        assert_eq!(budget.remaining(), 1000);
        assert!(budget.try_reserve(0).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_reconcile_after_expiry_books_shortfall() {
        let budget = Budget::new("tokens", 1000, BudgetStrategy::SlidingWindow);

        let reservation = budget.try_reserve(100).unwrap();
        tokio::time::advance(Duration::from_secs(90)).await;
        assert_eq!(budget.remaining(), 1000);

        budget.reconcile(&reservation, 400);
        assert_eq!(budget.remaining(), 700);

        // an overestimate that already expired changes nothing
        let reservation = budget.try_reserve(100).unwrap();
        tokio::time::advance(Duration::from_secs(90)).await;
        budget.reconcile(&reservation, 10);
        assert_eq!(budget.remaining(), 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_held_charge_does_not_expire_until_committed() {
        let budget = Budget::new("requests", 1, BudgetStrategy::SlidingWindow);

        let credit = budget.try_hold(1).unwrap();
        tokio::time::advance(Duration::from_secs(90)).await;
        assert_eq!(budget.remaining(), 0);
        assert_eq!(budget.try_reserve(1).unwrap_err(), WINDOW);

        // the window runs from the commit, not from the hold
        budget.commit(&credit);
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(budget.try_reserve(1).is_err());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(budget.try_reserve(1).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_returns_held_charge() {
        let budget = Budget::new("requests", 2, BudgetStrategy::SlidingWindow);

        let credit = budget.try_hold(1).unwrap();
        budget.try_reserve(1).unwrap();
        assert_eq!(budget.remaining(), 0);

        budget.release(&credit);
        assert_eq!(budget.remaining(), 1);

        // releasing twice or committing afterwards changes nothing
        budget.release(&credit);
        budget.commit(&credit);
        assert_eq!(budget.remaining(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_wakes_on_release() {
        let budget = Budget::new("requests", 1, BudgetStrategy::SlidingWindow);
        let cancel = CancellationToken::new();
        let credit = budget.try_hold(1).unwrap();

        let start = Instant::now();
        let waiter = budget.reserve(1, &cancel);
        let releaser = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            budget.release(&credit);
        };
        let (reservation, ()) = tokio::join!(waiter, releaser);

        assert!(reservation.is_some());
        assert!(start.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_charge_is_clamped() {
        let budget = Budget::new("tokens", 500, BudgetStrategy::SlidingWindow);
        let reservation = budget.try_reserve(10_000).unwrap();
        assert_eq!(reservation.amount(), 500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_refills_continuously() {
        // 60 per minute = 1 per second
        let budget = Budget::new("requests", 60, BudgetStrategy::TokenBucket);

        for _ in 0..60 {
            budget.try_reserve(1).unwrap();
        }
        let wait = budget.try_reserve(1).unwrap_err();
        assert_eq!(wait.as_millis(), 1000);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(budget.try_reserve(1).is_ok());
        assert!(budget.try_reserve(1).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_reconcile_debits_and_credits() {
        let budget = Budget::new("tokens", 600, BudgetStrategy::TokenBucket);

        let reservation = budget.try_reserve(100).unwrap();
        budget.reconcile(&reservation, 700);
        assert_eq!(budget.remaining(), -100);
        assert!(budget.try_reserve(1).is_err());

        let budget = Budget::new("tokens", 600, BudgetStrategy::TokenBucket);
        let reservation = budget.try_reserve(300).unwrap();
        budget.reconcile(&reservation, 50);
        assert_eq!(budget.remaining(), 550);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserve_waits_for_budget() {
        let budget = Budget::new("requests", 1, BudgetStrategy::SlidingWindow);
        let cancel = CancellationToken::new();

        budget.reserve(1, &cancel).await.unwrap();
        let start = Instant::now();
        budget.reserve(1, &cancel).await.unwrap();
        assert!(start.elapsed() >= WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserve_stops_on_cancel() {
        let budget = Budget::new("requests", 1, BudgetStrategy::SlidingWindow);
        let cancel = CancellationToken::new();
        budget.try_reserve(1).unwrap();

        cancel.cancel();
        assert!(budget.reserve(1, &cancel).await.is_none());
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("token-bucket".parse::<BudgetStrategy>(), Ok(BudgetStrategy::TokenBucket));
        assert_eq!("sliding_window".parse::<BudgetStrategy>(), Ok(BudgetStrategy::SlidingWindow));
        assert!("leaky".parse::<BudgetStrategy>().is_err());
        assert_eq!(BudgetStrategy::TokenBucket.to_string(), "token_bucket");
    }
}
