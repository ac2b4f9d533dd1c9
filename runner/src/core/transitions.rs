//! Task lifecycle state machine.
//!
//! ```text
//! pending --dispatch--> running --success--> done
//!    |                     |  \--failure--> failed --retry--> pending
//!    |                     \--recover--> pending        |
//!    \--skip--> skipped <------------skip---------------/
//! ```
//!
//! `failed --dispatch--> running` is allowed for explicitly targeted runs.

use crate::core::types::TaskStatus;

/// Returns true if `from -> to` is a legal lifecycle transition.
pub fn is_allowed(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::{Done, Failed, Pending, Running, Skipped};
    matches!(
        (from, to),
        (Pending, Running)
            | (Failed, Running)
            | (Running, Done)
            | (Running, Failed)
            | (Running, Pending)
            | (Pending, Skipped)
            | (Failed, Skipped)
            | (Failed, Pending)
    )
}

/// Statuses from which a task may be dispatched by explicit id.
pub fn is_dispatchable(status: TaskStatus) -> bool {
    matches!(status, TaskStatus::Pending | TaskStatus::Failed)
}
