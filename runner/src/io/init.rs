//! Initialization helpers for `.agent/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{RunnerConfig, write_config};
use super::skills::save_registry;
use super::task_store::TaskStore;
use crate::core::router::SkillRegistry;
use crate::core::types::TaskId;

/// All canonical paths within `.agent/` for a project root.
#[derive(Debug, Clone)]
pub struct AgentPaths {
    pub root: PathBuf,
    pub agent_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub db_path: PathBuf,
    pub config_path: PathBuf,
    pub skills_path: PathBuf,
    pub profile_path: PathBuf,
    /// Run-local service config fragment.
    pub run_fragment_path: PathBuf,
    /// Project-shared service config fragment, checked into the repository.
    pub project_fragment_path: PathBuf,
    pub claims_dir: PathBuf,
    pub runs_dir: PathBuf,
}

impl AgentPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let agent_dir = root.join(".agent");
        Self {
            root: root.clone(),
            agent_dir: agent_dir.clone(),
            gitignore_path: agent_dir.join(".gitignore"),
            db_path: agent_dir.join("tasks.db"),
            config_path: agent_dir.join("config.toml"),
            skills_path: agent_dir.join("skills.toml"),
            profile_path: agent_dir.join("profile.json"),
            run_fragment_path: agent_dir.join("mcp.json"),
            project_fragment_path: root.join(".mcp.json"),
            claims_dir: agent_dir.join("claims"),
            runs_dir: agent_dir.join("runs"),
        }
    }

    /// Artifact directory for one dispatch attempt.
    pub fn run_dir(&self, task_id: TaskId, attempt: u32) -> PathBuf {
        self.runs_dir
            .join(task_id.to_string())
            .join(attempt.to_string())
    }
}

/// Options for `init_agent`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing runner-owned files. Tasks are kept.
    pub force: bool,
}

/// Create `.agent/` scaffolding in `root`.
///
/// Fails if `.agent/` already exists unless `options.force` is set.
pub fn init_agent(root: &Path, options: &InitOptions) -> Result<AgentPaths> {
    let paths = AgentPaths::new(root);
    if paths.agent_dir.exists() && !paths.agent_dir.is_dir() {
        return Err(anyhow!("init: .agent exists but is not a directory"));
    }
    if paths.agent_dir.exists() && !options.force {
        return Err(anyhow!(
            "init: .agent already exists (use --force to overwrite)"
        ));
    }

    create_dir(&paths.agent_dir)?;
    create_dir(&paths.claims_dir)?;
    create_dir(&paths.runs_dir)?;

    fs::write(&paths.gitignore_path, AGENT_GITIGNORE)
        .with_context(|| format!("write file {}", paths.gitignore_path.display()))?;
    write_config(&paths.config_path, &RunnerConfig::default())?;
    save_registry(&paths.skills_path, &SkillRegistry::default())?;
    TaskStore::open(&paths.db_path)
        .with_context(|| format!("open task store {}", paths.db_path.display()))?;

    Ok(paths)
}

/// Fail unless `init` has been run for `root`.
pub fn require_initialized(root: &Path) -> Result<AgentPaths> {
    let paths = AgentPaths::new(root);
    if !paths.agent_dir.is_dir() {
        return Err(anyhow!(
            "{} is not initialized (run `plan-runner init`)",
            root.display()
        ));
    }
    Ok(paths)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

const AGENT_GITIGNORE: &str = "claims/\nruns/\ntasks.db\ntasks.db-*\n";
