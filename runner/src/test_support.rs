//! Test-only helpers: task builders, a scripted executor and an initialized project.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::core::types::{ExecutionResult, Handler, PlanItem, Task, TaskId, TaskStatus};
use crate::io::config::{RunnerConfig, write_config};
use crate::io::executor::{Executor, InvokeRequest};
use crate::io::init::{AgentPaths, InitOptions, init_agent};
use crate::io::profile::StoredProfile;
use crate::io::task_store::TaskStore;

/// Project id written into every [`TestProject`] config.
pub const TEST_PROJECT_ID: &str = "test-project";

/// Create a deterministic task with the given id, sequence and status.
pub fn task(id: TaskId, sequence: u32, status: TaskStatus) -> Task {
    Task {
        id,
        project_id: TEST_PROJECT_ID.to_string(),
        sequence,
        description: format!("task {id}"),
        status,
        result_summary: None,
        skill: None,
        attempts: 0,
        created_at: "2026-01-01T00:00:00.000Z".to_string(),
        updated_at: "2026-01-01T00:00:00.000Z".to_string(),
    }
}

/// Unchecked plan items, one per description.
pub fn plan_items(descriptions: &[&str]) -> Vec<PlanItem> {
    descriptions
        .iter()
        .map(|description| PlanItem {
            description: description.to_string(),
            checked: false,
        })
        .collect()
}

/// What the executor was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub task_id: TaskId,
    pub description: String,
    pub skill: String,
    pub handler: Handler,
    pub services: Vec<String>,
    pub run_dir: PathBuf,
    pub timeout: Option<Duration>,
}

/// Executor that replays queued results and records each call.
///
/// `Err` entries simulate an executor that could not run. An exhausted queue is an error.
pub struct ScriptedExecutor {
    results: RefCell<VecDeque<Result<ExecutionResult, String>>>,
    calls: RefCell<Vec<RecordedCall>>,
}

impl ScriptedExecutor {
    pub fn new(results: Vec<Result<ExecutionResult, String>>) -> Self {
        Self {
            results: RefCell::new(results.into()),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.borrow().clone()
    }
}

impl Executor for ScriptedExecutor {
    fn invoke(&self, request: &InvokeRequest<'_>) -> Result<ExecutionResult> {
        self.calls.borrow_mut().push(RecordedCall {
            task_id: request.task.id,
            description: request.task.description.clone(),
            skill: request.skill.to_string(),
            handler: request.handler,
            services: request.effective_config.keys().cloned().collect(),
            run_dir: request.run_dir.clone(),
            timeout: request.timeout,
        });
        match self.results.borrow_mut().pop_front() {
            Some(Ok(result)) => Ok(result),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted executor exhausted")),
        }
    }
}

/// An initialized project in a temp directory, isolated from the user's home config.
pub struct TestProject {
    temp: tempfile::TempDir,
    paths: AgentPaths,
}

impl TestProject {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir()?;
        let root = temp.path().join("project");
        std::fs::create_dir_all(&root)?;
        let paths = init_agent(&root, &InitOptions { force: false })?;
        let config = RunnerConfig {
            project_id: Some(TEST_PROJECT_ID.to_string()),
            user_fragment_path: Some(temp.path().join("home").join(".claude.json")),
            ..RunnerConfig::default()
        };
        write_config(&paths.config_path, &config)?;
        Ok(Self { temp, paths })
    }

    pub fn root(&self) -> &Path {
        &self.paths.root
    }

    pub fn paths(&self) -> &AgentPaths {
        &self.paths
    }

    /// Path of the isolated user-global fragment.
    pub fn user_fragment_path(&self) -> PathBuf {
        self.temp.path().join("home").join(".claude.json")
    }

    pub fn profile(&self) -> StoredProfile {
        StoredProfile::new(&self.paths.profile_path)
    }

    /// A second connection to the project's store.
    pub fn store(&self) -> Result<TaskStore> {
        Ok(TaskStore::open(&self.paths.db_path)?)
    }
}
