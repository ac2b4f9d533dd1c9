//! Runner configuration stored under `.agent/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::router::DEFAULT_SKILL;

/// Runner configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// sensible values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Project identifier used to scope tasks. Defaults to the project directory name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    /// Skill used when routing finds no keyword match.
    pub default_skill: String,

    /// Overrides the user-global service config location (`$HOME/.claude.json`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_fragment_path: Option<PathBuf>,

    pub executor: ExecutorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Command that runs the coding assistant; the prompt is fed on stdin.
    pub command: Vec<String>,

    /// Wall-clock limit per task in seconds. No limit when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Truncate executor stdout/stderr logs beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Longest result summary stored on a task.
    pub summary_limit_bytes: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command: vec!["claude".to_string(), "-p".to_string()],
            timeout_secs: None,
            output_limit_bytes: 100_000,
            summary_limit_bytes: 2_000,
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            default_skill: DEFAULT_SKILL.to_string(),
            user_fragment_path: None,
            executor: ExecutorConfig::default(),
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.default_skill.trim().is_empty() {
            return Err(anyhow!("default_skill must not be empty"));
        }
        if let Some(project_id) = &self.project_id
            && project_id.trim().is_empty()
        {
            return Err(anyhow!("project_id must not be empty when set"));
        }
        if self.executor.command.is_empty() || self.executor.command[0].trim().is_empty() {
            return Err(anyhow!("executor.command must be a non-empty array"));
        }
        if self.executor.timeout_secs == Some(0) {
            return Err(anyhow!("executor.timeout_secs must be > 0"));
        }
        if self.executor.output_limit_bytes == 0 {
            return Err(anyhow!("executor.output_limit_bytes must be > 0"));
        }
        if self.executor.summary_limit_bytes == 0 {
            return Err(anyhow!("executor.summary_limit_bytes must be > 0"));
        }
        Ok(())
    }

    /// Project id from config, falling back to the root directory's name.
    pub fn project_id_for(&self, root: &Path) -> String {
        if let Some(id) = &self.project_id {
            return id.clone();
        }
        root.canonicalize()
            .ok()
            .as_deref()
            .unwrap_or(root)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "default".to_string())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RunnerConfig::default()`.
pub fn load_config(path: &Path) -> Result<RunnerConfig> {
    if !path.exists() {
        let cfg = RunnerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RunnerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RunnerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Write `contents` next to `path` and rename over it.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents).with_context(|| format!("write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
