//! Deterministic selection of the next task to work on.

use crate::core::types::{Task, TaskStatus};

/// Pick the active task from a project snapshot.
///
/// A `running` task (left over from an interrupted dispatch) takes priority over
/// any `pending` one; otherwise the lowest-sequence `pending` task is returned.
/// Done, failed and skipped tasks are never selected.
pub fn next_eligible(tasks: &[Task]) -> Option<&Task> {
    let lowest = |status: TaskStatus| {
        tasks
            .iter()
            .filter(|task| task.status == status)
            .min_by_key(|task| task.sequence)
    };
    lowest(TaskStatus::Running).or_else(|| lowest(TaskStatus::Pending))
}

/// Lowest-sequence failed task, if any.
pub fn first_failed(tasks: &[Task]) -> Option<&Task> {
    tasks
        .iter()
        .filter(|task| task.status == TaskStatus::Failed)
        .min_by_key(|task| task.sequence)
}
