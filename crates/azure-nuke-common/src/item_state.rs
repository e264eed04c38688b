//! Lifecycle of a discovered resource
//!
//! ```text
//! New ──► Filtered
//!  │
//!  └──► Pending ──► Waiting ──► Finished
//!          │           │
//!          └───────────┴──────► Failed
//! ```
//!
//! `New` is the only creation state. `Filtered`, `Finished` and `Failed` are
//! terminal. `Pending` and `Waiting` belong to the removal loop.

use std::fmt;

/// State of a queued item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemState {
    /// Freshly discovered, not yet evaluated
    New,
    /// Rejected by the filter stage; will never be removed
    Filtered,
    /// Accepted for removal, removal not yet requested
    Pending,
    /// Removal requested, waiting for it to complete
    Waiting,
    /// Removed
    Finished,
    /// Removal failed
    Failed,
}

impl ItemState {
    /// Every state, in lifecycle order
    pub const ALL: [ItemState; 6] = [
        ItemState::New,
        ItemState::Filtered,
        ItemState::Pending,
        ItemState::Waiting,
        ItemState::Finished,
        ItemState::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ItemState::New => "new",
            ItemState::Filtered => "filtered",
            ItemState::Pending => "pending",
            ItemState::Waiting => "waiting",
            ItemState::Finished => "finished",
            ItemState::Failed => "failed",
        }
    }

    /// True when no further transition is allowed
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ItemState::Filtered | ItemState::Finished | ItemState::Failed
        )
    }

    /// Whether `self → next` is a legal transition
    pub fn can_transition_to(self, next: ItemState) -> bool {
        matches!(
            (self, next),
            (ItemState::New, ItemState::Filtered)
                | (ItemState::New, ItemState::Pending)
                | (ItemState::Pending, ItemState::Waiting)
                | (ItemState::Pending, ItemState::Failed)
                | (ItemState::Waiting, ItemState::Finished)
                | (ItemState::Waiting, ItemState::Failed)
        )
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
