//! Durable, project-scoped task storage backed by SQLite.
//!
//! Every mutation runs in an `IMMEDIATE` transaction so concurrent invocations
//! against the same database serialize. Status changes are compare-and-set on the
//! status the caller observed; losing that race is [`RunnerError::ConcurrentClaim`].

use std::path::Path;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{
    Connection, ErrorCode, OptionalExtension, Row, Transaction, TransactionBehavior, params,
};
use tracing::{debug, info};

use crate::core::selector;
use crate::core::transitions::is_allowed;
use crate::core::types::{PlanItem, Task, TaskId, TaskStatus};
use crate::error::RunnerError;

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    description TEXT NOT NULL,
    status TEXT NOT NULL,
    result_summary TEXT,
    skill TEXT,
    attempts INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (project_id, sequence)
);

CREATE INDEX IF NOT EXISTS idx_tasks_project_status ON tasks(project_id, status);
"#;

const TASK_COLUMNS: &str = "id, project_id, sequence, description, status, result_summary, \
                            skill, attempts, created_at, updated_at";

/// Summary stored on tasks that were already checked off in the plan.
pub const CHECKED_IN_PLAN: &str = "checked off in plan";

pub struct TaskStore {
    conn: Connection,
}

impl TaskStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path) -> Result<Self, RunnerError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::bootstrap(conn)
    }

    pub fn open_in_memory() -> Result<Self, RunnerError> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(conn: Connection) -> Result<Self, RunnerError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Append tasks after the project's current highest sequence.
    ///
    /// Checked plan items are stored as `done`. The whole batch commits or none of it does.
    pub fn insert_many(
        &mut self,
        project_id: &str,
        items: &[PlanItem],
    ) -> Result<Vec<Task>, RunnerError> {
        let now = now_timestamp();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let max: Option<u32> = tx.query_row(
            "SELECT MAX(sequence) FROM tasks WHERE project_id = ?1",
            params![project_id],
            |row| row.get(0),
        )?;
        let start = max.unwrap_or(0);

        let mut ids = Vec::with_capacity(items.len());
        for (offset, item) in items.iter().enumerate() {
            let sequence = start + offset as u32 + 1;
            let (status, summary) = if item.checked {
                (TaskStatus::Done, Some(CHECKED_IN_PLAN))
            } else {
                (TaskStatus::Pending, None)
            };
            tx.execute(
                "INSERT INTO tasks (project_id, sequence, description, status, result_summary, \
                 created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    project_id,
                    sequence,
                    item.description,
                    status.as_str(),
                    summary,
                    now
                ],
            )
            .map_err(|err| match err.sqlite_error_code() {
                Some(ErrorCode::ConstraintViolation) => RunnerError::DuplicateSequence {
                    project_id: project_id.to_string(),
                    sequence,
                },
                _ => RunnerError::Store(err),
            })?;
            ids.push(tx.last_insert_rowid());
        }

        let tasks = ids
            .into_iter()
            .map(|id| fetch_tx(&tx, id))
            .collect::<Result<Vec<_>, _>>()?;
        tx.commit()?;
        info!(project_id, count = tasks.len(), first_sequence = start + 1, "inserted tasks");
        Ok(tasks)
    }

    pub fn get(&self, task_id: TaskId) -> Result<Task, RunnerError> {
        self.conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![task_id],
                map_task,
            )
            .optional()?
            .ok_or(RunnerError::TaskNotFound { task_id })
    }

    /// All tasks of a project in ascending sequence.
    pub fn list(&self, project_id: &str) -> Result<Vec<Task>, RunnerError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE project_id = ?1 ORDER BY sequence ASC"
        ))?;
        let rows = stmt.query_map(params![project_id], map_task)?;
        let tasks = rows.collect::<Result<Vec<_>, _>>()?;
        debug!(project_id, count = tasks.len(), "listed tasks");
        Ok(tasks)
    }

    /// The active task: a `running` task if one exists, else the lowest `pending` one.
    pub fn next_eligible(&self, project_id: &str) -> Result<Option<Task>, RunnerError> {
        let tasks = self.list(project_id)?;
        Ok(selector::next_eligible(&tasks).cloned())
    }

    /// Validated status transition with timestamp bump.
    ///
    /// `summary` replaces the stored result summary when given and leaves it alone otherwise.
    pub fn update_status(
        &mut self,
        task_id: TaskId,
        to: TaskStatus,
        summary: Option<&str>,
    ) -> Result<Task, RunnerError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let from = fetch_tx(&tx, task_id)?.status;
        if !is_allowed(from, to) {
            return Err(RunnerError::InvalidTransition { task_id, from, to });
        }
        let changed = tx.execute(
            "UPDATE tasks SET status = ?3, result_summary = COALESCE(?4, result_summary), \
             updated_at = ?5 WHERE id = ?1 AND status = ?2",
            params![task_id, from.as_str(), to.as_str(), summary, now_timestamp()],
        )?;
        if changed == 0 {
            return Err(RunnerError::ConcurrentClaim { task_id });
        }
        let task = fetch_tx(&tx, task_id)?;
        tx.commit()?;
        info!(task_id, %from, %to, "task status updated");
        Ok(task)
    }

    /// Atomically move a task from `expected` to `running` and count the attempt.
    ///
    /// Fails with [`RunnerError::ConcurrentClaim`] if the stored status is no longer
    /// `expected`.
    pub fn claim(&mut self, task_id: TaskId, expected: TaskStatus) -> Result<Task, RunnerError> {
        if !is_allowed(expected, TaskStatus::Running) {
            return Err(RunnerError::InvalidTransition {
                task_id,
                from: expected,
                to: TaskStatus::Running,
            });
        }
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            "UPDATE tasks SET status = 'running', attempts = attempts + 1, updated_at = ?3 \
             WHERE id = ?1 AND status = ?2",
            params![task_id, expected.as_str(), now_timestamp()],
        )?;
        if changed == 0 {
            // Distinguish a lost race from a bad id.
            fetch_tx(&tx, task_id)?;
            return Err(RunnerError::ConcurrentClaim { task_id });
        }
        let task = fetch_tx(&tx, task_id)?;
        tx.commit()?;
        info!(task_id, attempts = task.attempts, "task claimed");
        Ok(task)
    }

    /// Return an orphaned `running` task to `pending`.
    ///
    /// Compare-and-set on `running`: if the task already finished or changed hands,
    /// nothing is written and [`RunnerError::ConcurrentClaim`] is returned. The caller
    /// must hold the task's claim lock.
    pub fn recover(&mut self, task_id: TaskId) -> Result<Task, RunnerError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            "UPDATE tasks SET status = 'pending', updated_at = ?2 \
             WHERE id = ?1 AND status = 'running'",
            params![task_id, now_timestamp()],
        )?;
        if changed == 0 {
            fetch_tx(&tx, task_id)?;
            return Err(RunnerError::ConcurrentClaim { task_id });
        }
        let task = fetch_tx(&tx, task_id)?;
        tx.commit()?;
        info!(task_id, attempts = task.attempts, "orphaned task returned to pending");
        Ok(task)
    }

    /// Record the routed skill unless one is already stored; returns the stored task.
    pub fn assign_skill(&mut self, task_id: TaskId, skill: &str) -> Result<Task, RunnerError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "UPDATE tasks SET skill = ?2 WHERE id = ?1 AND skill IS NULL",
            params![task_id, skill],
        )?;
        let task = fetch_tx(&tx, task_id)?;
        tx.commit()?;
        Ok(task)
    }

    /// Delete every task of a project. Sequences restart at 1 afterwards.
    pub fn reset(&mut self, project_id: &str) -> Result<usize, RunnerError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let deleted = tx.execute(
            "DELETE FROM tasks WHERE project_id = ?1",
            params![project_id],
        )?;
        tx.commit()?;
        info!(project_id, deleted, "project tasks reset");
        Ok(deleted)
    }
}

fn fetch_tx(tx: &Transaction<'_>, task_id: TaskId) -> Result<Task, RunnerError> {
    tx.query_row(
        &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
        params![task_id],
        map_task,
    )
    .optional()?
    .ok_or(RunnerError::TaskNotFound { task_id })
}

fn map_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    let status: String = row.get(4)?;
    let status = status.parse::<TaskStatus>().map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::from(err))
    })?;
    Ok(Task {
        id: row.get(0)?,
        project_id: row.get(1)?,
        sequence: row.get(2)?,
        description: row.get(3)?,
        status,
        result_summary: row.get(5)?,
        skill: row.get(6)?,
        attempts: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::plan_items;

    const PROJECT: &str = "demo";

    fn store_with(descriptions: &[&str]) -> (TaskStore, Vec<Task>) {
        let mut store = TaskStore::open_in_memory().expect("store");
        let tasks = store
            .insert_many(PROJECT, &plan_items(descriptions))
            .expect("insert");
        (store, tasks)
    }

    #[test]
    fn insert_then_list_preserves_order_and_text() {
        let descriptions = ["First  task", "Second: with `code`", "Third\twith tab"];
        let (store, inserted) = store_with(&descriptions);
        let listed = store.list(PROJECT).expect("list");
        assert_eq!(listed, inserted);
        let sequences: Vec<u32> = listed.iter().map(|t| t.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        let texts: Vec<&str> = listed.iter().map(|t| t.description.as_str()).collect();
        assert_eq!(texts, descriptions);
        assert!(listed.iter().all(|t| t.status == TaskStatus::Pending));
    }

    #[test]
    fn insert_appends_after_current_max() {
        let (mut store, _) = store_with(&["a", "b"]);
        let appended = store
            .insert_many(PROJECT, &plan_items(&["c"]))
            .expect("append");
        assert_eq!(appended[0].sequence, 3);
    }

    #[test]
    fn projects_are_isolated() {
        let (mut store, _) = store_with(&["a", "b"]);
        let other = store
            .insert_many("other", &plan_items(&["x"]))
            .expect("insert other");
        assert_eq!(other[0].sequence, 1);
        assert_eq!(store.list(PROJECT).expect("list").len(), 2);
        assert_eq!(store.list("other").expect("list").len(), 1);
    }

    #[test]
    fn checked_items_are_stored_done() {
        let mut store = TaskStore::open_in_memory().expect("store");
        let items = vec![
            PlanItem {
                description: "done already".to_string(),
                checked: true,
            },
            PlanItem {
                description: "todo".to_string(),
                checked: false,
            },
        ];
        let tasks = store.insert_many(PROJECT, &items).expect("insert");
        assert_eq!(tasks[0].status, TaskStatus::Done);
        assert_eq!(tasks[0].result_summary.as_deref(), Some(CHECKED_IN_PLAN));
        assert_eq!(
            store.next_eligible(PROJECT).expect("next").map(|t| t.id),
            Some(tasks[1].id)
        );
    }

    #[test]
    fn done_task_is_never_eligible_and_cannot_rerun() {
        let (mut store, tasks) = store_with(&["a", "b"]);
        let first = tasks[0].id;
        store.claim(first, TaskStatus::Pending).expect("claim");
        store
            .update_status(first, TaskStatus::Done, Some("ok"))
            .expect("done");

        let next = store.next_eligible(PROJECT).expect("next").expect("some");
        assert_eq!(next.id, tasks[1].id);

        let err = store
            .update_status(first, TaskStatus::Running, None)
            .expect_err("done -> running");
        assert!(matches!(
            err,
            RunnerError::InvalidTransition {
                from: TaskStatus::Done,
                to: TaskStatus::Running,
                ..
            }
        ));
    }

    #[test]
    fn running_task_is_returned_before_pending() {
        let (mut store, tasks) = store_with(&["a", "b", "c"]);
        store
            .claim(tasks[1].id, TaskStatus::Pending)
            .expect("claim second");
        let next = store.next_eligible(PROJECT).expect("next").expect("some");
        assert_eq!(next.id, tasks[1].id);
        assert_eq!(next.status, TaskStatus::Running);
    }

    #[test]
    fn claim_is_check_and_set() {
        let (mut store, tasks) = store_with(&["a"]);
        let id = tasks[0].id;
        let claimed = store.claim(id, TaskStatus::Pending).expect("claim");
        assert_eq!(claimed.status, TaskStatus::Running);
        assert_eq!(claimed.attempts, 1);

        let err = store
            .claim(id, TaskStatus::Pending)
            .expect_err("second claim");
        assert!(matches!(err, RunnerError::ConcurrentClaim { task_id } if task_id == id));
    }

    #[test]
    fn recover_only_rewrites_running_tasks() {
        let (mut store, tasks) = store_with(&["a", "b"]);
        let (first, second) = (tasks[0].id, tasks[1].id);

        store.claim(first, TaskStatus::Pending).expect("claim");
        let recovered = store.recover(first).expect("recover");
        assert_eq!(recovered.status, TaskStatus::Pending);
        assert_eq!(recovered.attempts, 1);

        // The owner finished before recovery got to it: nothing is written.
        store.claim(second, TaskStatus::Pending).expect("claim");
        store
            .update_status(second, TaskStatus::Done, Some("ok"))
            .expect("done");
        let err = store.recover(second).expect_err("already finished");
        assert!(matches!(err, RunnerError::ConcurrentClaim { task_id } if task_id == second));
        let task = store.get(second).expect("get");
        assert_eq!(task.status, TaskStatus::Done);
        assert_eq!(task.result_summary.as_deref(), Some("ok"));

        assert!(matches!(
            store.recover(99),
            Err(RunnerError::TaskNotFound { task_id: 99 })
        ));
    }

    #[test]
    fn claim_unknown_task_is_not_found() {
        let mut store = TaskStore::open_in_memory().expect("store");
        let err = store
            .claim(42, TaskStatus::Pending)
            .expect_err("missing task");
        assert!(matches!(err, RunnerError::TaskNotFound { task_id: 42 }));
    }

    #[test]
    fn update_status_keeps_summary_unless_replaced() {
        let (mut store, tasks) = store_with(&["a"]);
        let id = tasks[0].id;
        store.claim(id, TaskStatus::Pending).expect("claim");
        store
            .update_status(id, TaskStatus::Failed, Some("boom"))
            .expect("fail");
        let retried = store
            .update_status(id, TaskStatus::Pending, None)
            .expect("retry");
        assert_eq!(retried.result_summary.as_deref(), Some("boom"));
    }

    #[test]
    fn update_status_bumps_updated_at() {
        let (mut store, tasks) = store_with(&["a"]);
        let before = tasks[0].updated_at.clone();
        std::thread::sleep(Duration::from_millis(5));
        let after = store
            .update_status(tasks[0].id, TaskStatus::Skipped, None)
            .expect("skip");
        assert!(after.updated_at > before);
        assert_eq!(after.created_at, tasks[0].created_at);
    }

    #[test]
    fn skill_is_sticky_once_assigned() {
        let (mut store, tasks) = store_with(&["a"]);
        let id = tasks[0].id;
        let first = store.assign_skill(id, "test").expect("assign");
        assert_eq!(first.skill.as_deref(), Some("test"));
        let second = store.assign_skill(id, "code").expect("assign again");
        assert_eq!(second.skill.as_deref(), Some("test"));
    }

    #[test]
    fn reset_deletes_tasks_and_restarts_sequences() {
        let (mut store, _) = store_with(&["a", "b"]);
        assert_eq!(store.reset(PROJECT).expect("reset"), 2);
        assert!(store.list(PROJECT).expect("list").is_empty());
        let fresh = store
            .insert_many(PROJECT, &plan_items(&["c"]))
            .expect("insert");
        assert_eq!(fresh[0].sequence, 1);
    }

    #[test]
    fn store_survives_reopen() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tasks.db");
        {
            let mut store = TaskStore::open(&path).expect("open");
            store
                .insert_many(PROJECT, &plan_items(&["persisted"]))
                .expect("insert");
        }
        let store = TaskStore::open(&path).expect("reopen");
        let tasks = store.list(PROJECT).expect("list");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].description, "persisted");
    }
}
