//! Error taxonomy for plan loading, task storage, and dispatch.
//!
//! Orchestration code wraps these in `anyhow::Error`; callers that need to react to a
//! specific failure recover it with `err.downcast_ref::<RunnerError>()`.

use std::path::PathBuf;

use crate::core::types::{ConfigTier, TaskId, TaskStatus};

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("plan contains no recognized task lines")]
    EmptyPlan,

    #[error("sequence {sequence} already exists in project '{project_id}'")]
    DuplicateSequence { project_id: String, sequence: u32 },

    #[error("task {task_id}: invalid transition {from} -> {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("task {task_id} is {status} and cannot be dispatched")]
    TaskNotEligible { task_id: TaskId, status: TaskStatus },

    #[error("task {task_id} was claimed or changed by another invocation")]
    ConcurrentClaim { task_id: TaskId },

    #[error("task {task_id} not found")]
    TaskNotFound { task_id: TaskId },

    #[error("failed to parse {tier} config fragment {}: {message}", .path.display())]
    FragmentParse {
        tier: ConfigTier,
        path: PathBuf,
        message: String,
    },

    #[error("{tier} config is read-only; only the run-local tier can be edited")]
    ReadOnlyTier { tier: ConfigTier },

    #[error("unknown skill '{name}'")]
    UnknownSkill { name: String },

    #[error("service '{name}' is not defined in the run-local config")]
    UnknownService { name: String },

    #[error("task store: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
