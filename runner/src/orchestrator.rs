//! Sequential task dispatch: selection, routing, claiming, execution and recording.
//!
//! One [`Orchestrator`] serves one invocation. A `running` task whose claim lock is
//! free was left behind by a dead process. It stays `running` in the store, so it keeps
//! priority over pending work across invocations, and the next dispatch recovers it
//! under its claim lock.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::router::{SkillRegistry, select_skill};
use crate::core::selector;
use crate::core::transitions::is_dispatchable;
use crate::core::types::{ExecutionResult, Handler, ProjectProfile, Task, TaskId, TaskStatus};
use crate::error::RunnerError;
use crate::io::claim_lock;
use crate::io::config::{RunnerConfig, load_config};
use crate::io::executor::{Executor, InvokeRequest};
use crate::io::fragments::FragmentSources;
use crate::io::init::{AgentPaths, require_initialized};
use crate::io::profile::ProfileProvider;
use crate::io::skills::load_registry;
use crate::io::task_store::TaskStore;
use crate::plan::{LoadedPlan, load_plan};
use crate::status::StatusReport;

/// Per-invocation dispatch options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Allows dispatching tasks routed to a shipper skill.
    pub confirm_ship: bool,
    /// Overrides the configured executor timeout.
    pub timeout: Option<Duration>,
}

/// Why a run stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStop {
    /// Every dispatched task succeeded and nothing is left to do.
    Success,
    /// A task failed; it stays `failed` until retried or skipped.
    PartialFailure { task_id: TaskId, summary: String },
    /// Nothing was eligible to run.
    NoEligibleTask,
    /// The next task ships and the caller did not confirm shipping.
    ShipConfirmationRequired { task_id: TaskId },
}

/// Summary of a run invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// Dispatched tasks in their final state, in dispatch order.
    pub executed: Vec<Task>,
    pub stop: RunStop,
}

enum Step {
    Completed(Task),
    Failed(Task),
    NoEligible,
    NeedsShipConfirmation(TaskId),
}

pub struct Orchestrator {
    paths: AgentPaths,
    config: RunnerConfig,
    project_id: String,
    store: TaskStore,
    registry: SkillRegistry,
    sources: FragmentSources,
    profile: ProjectProfile,
    /// Orphaned `running` tasks seen at startup, not yet re-dispatched.
    interrupted: Vec<TaskId>,
}

impl Orchestrator {
    /// Open the project at `root` and note orphaned `running` tasks. Nothing is written.
    pub fn open<P: ProfileProvider>(root: &Path, profiles: &P) -> Result<Self> {
        let paths = require_initialized(root)?;
        let config = load_config(&paths.config_path)
            .with_context(|| format!("load {}", paths.config_path.display()))?;
        let registry = load_registry(&paths.skills_path)?;
        let store = TaskStore::open(&paths.db_path)
            .with_context(|| format!("open task store {}", paths.db_path.display()))?;
        let sources = FragmentSources::new(&paths, &config);
        let project_id = config.project_id_for(&paths.root);
        let profile = profiles.scan(&paths.root);

        let mut orchestrator = Self {
            paths,
            config,
            project_id,
            store,
            registry,
            sources,
            profile,
            interrupted: Vec::new(),
        };
        orchestrator.interrupted = orchestrator.find_orphans()?;
        Ok(orchestrator)
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn paths(&self) -> &AgentPaths {
        &self.paths
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    /// Orphaned `running` tasks awaiting recovery; the next dispatch takes them first.
    pub fn interrupted(&self) -> &[TaskId] {
        &self.interrupted
    }

    /// `running` tasks whose claim lock no live invocation holds.
    fn find_orphans(&self) -> Result<Vec<TaskId>> {
        let mut orphans = Vec::new();
        for task in self.store.list(&self.project_id)? {
            if task.status != TaskStatus::Running {
                continue;
            }
            if claim_lock::is_orphaned(&self.paths.claims_dir, task.id)? {
                info!(task_id = task.id, attempts = task.attempts, "interrupted task awaits recovery");
                orphans.push(task.id);
            } else {
                info!(task_id = task.id, "running task is owned by a live invocation");
            }
        }
        Ok(orphans)
    }

    /// Parse `text` and append its tasks. Nothing is stored if parsing fails.
    pub fn load_plan(&mut self, text: &str) -> Result<LoadedPlan> {
        load_plan(&mut self.store, &self.project_id, text)
    }

    pub fn status(&self) -> Result<StatusReport> {
        Ok(StatusReport::from_tasks(self.store.list(&self.project_id)?))
    }

    /// Delete every task of the project.
    pub fn reset(&mut self) -> Result<usize> {
        self.interrupted.clear();
        Ok(self.store.reset(&self.project_id)?)
    }

    /// Move a failed task back to `pending`.
    pub fn retry(&mut self, task_id: TaskId) -> Result<Task> {
        let task = self.project_task(task_id)?;
        if task.status != TaskStatus::Failed {
            return Err(RunnerError::InvalidTransition {
                task_id,
                from: task.status,
                to: TaskStatus::Pending,
            }
            .into());
        }
        let task = self.store.update_status(task_id, TaskStatus::Pending, None)?;
        info!(task_id, "task queued for retry");
        Ok(task)
    }

    /// Mark a pending or failed task as skipped.
    pub fn skip(&mut self, task_id: TaskId) -> Result<Task> {
        self.project_task(task_id)?;
        let task = self.store.update_status(task_id, TaskStatus::Skipped, None)?;
        info!(task_id, "task skipped");
        Ok(task)
    }

    /// Dispatch the next eligible task.
    pub fn run_next<E: Executor>(&mut self, executor: &E, options: &RunOptions) -> Result<RunOutcome> {
        let mut executed = Vec::new();
        let stop = match self.next_step(executor, options)? {
            Step::Completed(task) => {
                executed.push(task);
                RunStop::Success
            }
            Step::Failed(task) => {
                let stop = failure_stop(&task);
                executed.push(task);
                stop
            }
            Step::NoEligible => RunStop::NoEligibleTask,
            Step::NeedsShipConfirmation(task_id) => RunStop::ShipConfirmationRequired { task_id },
        };
        Ok(RunOutcome { executed, stop })
    }

    /// Dispatch exactly `task_id`, which must be `pending` or `failed`.
    pub fn run_task<E: Executor>(
        &mut self,
        task_id: TaskId,
        executor: &E,
        options: &RunOptions,
    ) -> Result<RunOutcome> {
        let step = match self.targeted_step(task_id, executor, options) {
            Err(err) if is_concurrent_claim(&err) => {
                info!(task_id, "claim lost; retrying once");
                self.targeted_step(task_id, executor, options)?
            }
            other => other?,
        };
        let (executed, stop) = match step {
            Step::Completed(task) => (vec![task], RunStop::Success),
            Step::Failed(task) => {
                let stop = failure_stop(&task);
                (vec![task], stop)
            }
            Step::NoEligible => (Vec::new(), RunStop::NoEligibleTask),
            Step::NeedsShipConfirmation(task_id) => {
                (Vec::new(), RunStop::ShipConfirmationRequired { task_id })
            }
        };
        Ok(RunOutcome { executed, stop })
    }

    /// Drain: dispatch eligible tasks in order until none remain or one fails.
    ///
    /// A drain never starts past an unresolved failure.
    pub fn run_all<E: Executor>(&mut self, executor: &E, options: &RunOptions) -> Result<RunOutcome> {
        let tasks = self.store.list(&self.project_id)?;
        if let Some(failed) = selector::first_failed(&tasks) {
            warn!(task_id = failed.id, "drain blocked by an unresolved failed task");
            return Ok(RunOutcome {
                executed: Vec::new(),
                stop: failure_stop(failed),
            });
        }

        let mut executed = Vec::new();
        loop {
            let stop = match self.next_step(executor, options)? {
                Step::Completed(task) => {
                    executed.push(task);
                    continue;
                }
                Step::Failed(task) => {
                    let stop = failure_stop(&task);
                    executed.push(task);
                    stop
                }
                Step::NoEligible if executed.is_empty() => RunStop::NoEligibleTask,
                Step::NoEligible => RunStop::Success,
                Step::NeedsShipConfirmation(task_id) => {
                    RunStop::ShipConfirmationRequired { task_id }
                }
            };
            info!(executed = executed.len(), stop = ?stop, "drain stopped");
            return Ok(RunOutcome { executed, stop });
        }
    }

    fn next_step<E: Executor>(&mut self, executor: &E, options: &RunOptions) -> Result<Step> {
        match self.try_next_step(executor, options) {
            Err(err) if is_concurrent_claim(&err) => {
                info!("claim lost; reselecting once");
                self.try_next_step(executor, options)
            }
            other => other,
        }
    }

    fn try_next_step<E: Executor>(&mut self, executor: &E, options: &RunOptions) -> Result<Step> {
        let Some(task) = self.store.next_eligible(&self.project_id)? else {
            return Ok(Step::NoEligible);
        };
        self.dispatch(task, executor, options)
    }

    fn targeted_step<E: Executor>(
        &mut self,
        task_id: TaskId,
        executor: &E,
        options: &RunOptions,
    ) -> Result<Step> {
        let task = self.project_task(task_id)?;
        if !is_dispatchable(task.status) {
            return Err(RunnerError::TaskNotEligible {
                task_id,
                status: task.status,
            }
            .into());
        }
        self.dispatch(task, executor, options)
    }

    #[instrument(skip_all, fields(task_id = task.id, sequence = task.sequence))]
    fn dispatch<E: Executor>(&mut self, task: Task, executor: &E, options: &RunOptions) -> Result<Step> {
        let skill = match &task.skill {
            Some(skill) => skill.clone(),
            None => select_skill(
                &task.description,
                &self.registry,
                &self.profile,
                &self.config.default_skill,
            ),
        };
        let handler = self.registry.handler_for(&skill);
        if handler == Handler::Shipper && !options.confirm_ship {
            info!(skill = %skill, "ship task needs explicit confirmation");
            return Ok(Step::NeedsShipConfirmation(task.id));
        }
        let effective = self.sources.effective()?;

        // A held lock means a live invocation owns the task; only one task runs per project.
        let Some(_claim) = claim_lock::try_acquire(&self.paths.claims_dir, task.id)? else {
            return Err(RunnerError::ConcurrentClaim { task_id: task.id }.into());
        };
        let expected = if task.status == TaskStatus::Running {
            let recovered = self.store.recover(task.id)?;
            warn!(
                task_id = task.id,
                attempts = recovered.attempts,
                "recovered orphaned running task"
            );
            recovered.status
        } else {
            task.status
        };
        let claimed = self.store.claim(task.id, expected)?;
        let claimed = self.store.assign_skill(claimed.id, &skill)?;
        self.interrupted.retain(|id| *id != task.id);
        info!(skill = %skill, %handler, attempt = claimed.attempts, "dispatching task");

        let timeout = options
            .timeout
            .or(self.config.executor.timeout_secs.map(Duration::from_secs));
        let request = InvokeRequest {
            task: &claimed,
            skill: &skill,
            handler,
            skill_description: self.registry.get(&skill).map(|s| s.description.as_str()),
            effective_config: &effective,
            profile: &self.profile,
            workdir: &self.paths.root,
            run_dir: self.paths.run_dir(claimed.id, claimed.attempts),
            timeout,
        };
        let result = match executor.invoke(&request) {
            Ok(result) => result,
            Err(err) => {
                let message = format!("{err:#}");
                warn!(err = %message, "executor could not run");
                ExecutionResult::failure(message)
            }
        };

        let to = if result.success {
            TaskStatus::Done
        } else {
            TaskStatus::Failed
        };
        let finished = self
            .store
            .update_status(claimed.id, to, Some(&result.summary))?;
        if result.success {
            info!("task done");
            Ok(Step::Completed(finished))
        } else {
            warn!(summary = %result.summary, "task failed");
            Ok(Step::Failed(finished))
        }
    }

    fn project_task(&self, task_id: TaskId) -> Result<Task> {
        let task = self.store.get(task_id)?;
        if task.project_id != self.project_id {
            return Err(RunnerError::TaskNotFound { task_id }.into());
        }
        Ok(task)
    }
}

fn failure_stop(task: &Task) -> RunStop {
    RunStop::PartialFailure {
        task_id: task.id,
        summary: task.result_summary.clone().unwrap_or_default(),
    }
}

fn is_concurrent_claim(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<RunnerError>(),
        Some(RunnerError::ConcurrentClaim { .. })
    )
}
