//! Shared deterministic types for runner core logic.
//!
//! These types define stable contracts between core components. They should not
//! depend on external state or I/O and must remain deterministic across runs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub type TaskId = i64;

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Done,
        TaskStatus::Failed,
        TaskStatus::Skipped,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
        }
    }

    /// Done and skipped tasks never run again.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Skipped)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| format!("unknown task status '{value}'"))
    }
}

/// One unit of work derived from a plan line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub project_id: String,
    /// 1-based position in the project's plan; contiguous and immutable.
    pub sequence: u32,
    pub description: String,
    pub status: TaskStatus,
    pub result_summary: Option<String>,
    /// Resolved skill; written once on first dispatch.
    pub skill: Option<String>,
    /// Number of times the task has been claimed for execution.
    pub attempts: u32,
    pub created_at: String,
    pub updated_at: String,
}

/// A task parsed from a plan document, before insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanItem {
    pub description: String,
    /// `- [x]` items are imported as already done.
    pub checked: bool,
}

/// Outcome reported by the executor bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub summary: String,
}

impl ExecutionResult {
    pub fn success(summary: impl Into<String>) -> Self {
        Self {
            success: true,
            summary: summary.into(),
        }
    }

    pub fn failure(summary: impl Into<String>) -> Self {
        Self {
            success: false,
            summary: summary.into(),
        }
    }
}

/// Precedence tier of a config fragment, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigTier {
    RunLocal,
    ProjectShared,
    UserGlobal,
}

impl ConfigTier {
    /// Tiers ordered from highest to lowest precedence.
    pub const PRECEDENCE: [ConfigTier; 3] = [
        ConfigTier::RunLocal,
        ConfigTier::ProjectShared,
        ConfigTier::UserGlobal,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ConfigTier::RunLocal => "run-local",
            ConfigTier::ProjectShared => "project-shared",
            ConfigTier::UserGlobal => "user-global",
        }
    }
}

impl fmt::Display for ConfigTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Specialized executor variant a skill dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Handler {
    Coder,
    Tester,
    Shipper,
}

impl Handler {
    pub fn as_str(self) -> &'static str {
        match self {
            Handler::Coder => "coder",
            Handler::Tester => "tester",
            Handler::Shipper => "shipper",
        }
    }
}

impl fmt::Display for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Handler {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "coder" => Ok(Handler::Coder),
            "tester" => Ok(Handler::Tester),
            "shipper" => Ok(Handler::Shipper),
            other => Err(format!(
                "unknown handler '{other}' (expected coder, tester or shipper)"
            )),
        }
    }
}

/// Read-only facts about the project, supplied by an external scanner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectProfile {
    pub languages: Vec<String>,
    pub frameworks: Vec<String>,
    pub test_framework: Option<String>,
}
