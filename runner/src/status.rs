//! Project progress report.

use crate::core::types::{Task, TaskStatus};

/// Snapshot of a project's tasks for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    /// All tasks in sequence order.
    pub tasks: Vec<Task>,
}

impl StatusReport {
    pub fn from_tasks(tasks: Vec<Task>) -> Self {
        Self { tasks }
    }

    pub fn total(&self) -> usize {
        self.tasks.len()
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    /// Count per status, in lifecycle order.
    pub fn counts(&self) -> Vec<(TaskStatus, usize)> {
        TaskStatus::ALL
            .into_iter()
            .map(|status| (status, self.count(status)))
            .collect()
    }

    pub fn with_status(&self, status: TaskStatus) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(move |t| t.status == status)
    }

    /// True when no task is waiting, running or failed.
    pub fn is_complete(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_terminal())
    }

    /// Human-readable report used by `status`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if self.tasks.is_empty() {
            out.push_str("No tasks. Load a plan with `plan-runner plan FILE`.\n");
            return out;
        }
        let counts: Vec<String> = self
            .counts()
            .into_iter()
            .filter(|(_, n)| *n > 0)
            .map(|(status, n)| format!("{n} {status}"))
            .collect();
        out.push_str(&format!("{} tasks: {}\n", self.total(), counts.join(", ")));

        for status in [TaskStatus::Running, TaskStatus::Pending] {
            let tasks: Vec<&Task> = self.with_status(status).collect();
            if tasks.is_empty() {
                continue;
            }
            out.push_str(&format!("\n{status}:\n"));
            for task in tasks {
                out.push_str(&format!("  #{} [{}] {}\n", task.sequence, task.id, task.description));
            }
        }
        let failed: Vec<&Task> = self.with_status(TaskStatus::Failed).collect();
        if !failed.is_empty() {
            out.push_str("\nfailed:\n");
            for task in failed {
                out.push_str(&format!("  #{} [{}] {}\n", task.sequence, task.id, task.description));
                if let Some(summary) = &task.result_summary {
                    out.push_str(&format!("      {}\n", summary.lines().next().unwrap_or("")));
                }
            }
        }
        out
    }
}
