//! Per-item execution states.

use serde::{Deserialize, Serialize};

/// Where a work item is in its lifecycle.
///
/// `Pending -> Dispatching -> { Succeeded | Retrying -> Dispatching | Failed | TimedOut }`,
/// with `Skipped` and `Cancelled` reachable from `Pending` only.
///
/// A `ResultItem` always carries a terminal state. The non-terminal ones name
/// the phases an item passes through while queued or in flight and only show
/// up in debug logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    /// Queued, no attempt yet
    Pending,
    /// An attempt holds a quota permit and is waiting on the agent
    Dispatching,
    /// Between a failed attempt and the next one
    Retrying,
    Succeeded,
    /// Last attempt returned an agent error
    Failed,
    /// Last attempt exceeded its deadline
    TimedOut,
    /// Excluded before dispatch (invalid input)
    Skipped,
    /// Never started because the run was cancelled
    Cancelled,
}

impl ItemState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ItemState::Succeeded | ItemState::Failed | ItemState::TimedOut | ItemState::Skipped | ItemState::Cancelled
        )
    }

    pub fn is_success(self) -> bool {
        self == ItemState::Succeeded
    }
}
