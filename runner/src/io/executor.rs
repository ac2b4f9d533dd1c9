//! Executor bridge to the external coding assistant.
//!
//! The [`Executor`] trait decouples dispatch from the assistant backend. Tests use
//! scripted executors that return predetermined results without spawning processes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use super::config::ExecutorConfig;
use super::fragments::write_effective;
use super::process::{CommandOutput, run_command};
use super::prompt::{PromptInputs, render_prompt};
use crate::core::config_merge::EffectiveConfig;
use crate::core::types::{ExecutionResult, Handler, ProjectProfile, Task};

/// Parameters for one executor invocation.
#[derive(Debug, Clone)]
pub struct InvokeRequest<'a> {
    pub task: &'a Task,
    pub skill: &'a str,
    pub handler: Handler,
    pub skill_description: Option<&'a str>,
    pub effective_config: &'a EffectiveConfig,
    pub profile: &'a ProjectProfile,
    /// Working directory for the executor process (the project root).
    pub workdir: &'a Path,
    /// Where per-attempt artifacts are written.
    pub run_dir: PathBuf,
    /// Wall-clock limit; `None` blocks until the executor exits.
    pub timeout: Option<Duration>,
}

/// Abstraction over execution backends.
///
/// `Ok` carries the task outcome, successful or not. `Err` means the executor could
/// not be run at all; callers record both kinds of failure on the task.
pub trait Executor {
    fn invoke(&self, request: &InvokeRequest<'_>) -> Result<ExecutionResult>;
}

/// Runs the configured assistant command with the prompt on stdin.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    command: Vec<String>,
    output_limit_bytes: usize,
    summary_limit_bytes: usize,
}

impl CommandExecutor {
    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self {
            command: config.command.clone(),
            output_limit_bytes: config.output_limit_bytes,
            summary_limit_bytes: config.summary_limit_bytes,
        }
    }
}

impl Executor for CommandExecutor {
    #[instrument(skip_all, fields(task_id = request.task.id, skill = request.skill, handler = %request.handler))]
    fn invoke(&self, request: &InvokeRequest<'_>) -> Result<ExecutionResult> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("executor command is empty"))?;
        fs::create_dir_all(&request.run_dir)
            .with_context(|| format!("create run dir {}", request.run_dir.display()))?;

        let mut services: Vec<&str> = request.effective_config.keys().map(String::as_str).collect();
        services.sort_unstable();
        let prompt = render_prompt(
            request.handler,
            &PromptInputs {
                task: request.task,
                skill: request.skill,
                skill_description: request.skill_description,
                profile: request.profile,
                services,
                workdir: request.workdir,
            },
        )?;
        let prompt_path = request.run_dir.join("prompt.md");
        fs::write(&prompt_path, &prompt)
            .with_context(|| format!("write prompt {}", prompt_path.display()))?;
        let mcp_path = request.run_dir.join("mcp.json");
        write_effective(&mcp_path, request.effective_config)?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg("--mcp-config")
            .arg(&mcp_path)
            .current_dir(request.workdir);

        info!(program = %program, run_dir = %request.run_dir.display(), "starting executor");
        let output = run_command(
            cmd,
            Some(prompt.as_bytes()),
            request.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run executor `{program}`"))?;
        write_executor_log(&request.run_dir.join("executor.log"), &output)?;

        if output.timed_out {
            let secs = request.timeout.map(|t| t.as_secs()).unwrap_or_default();
            warn!(timeout_secs = secs, "executor timed out");
            return Ok(ExecutionResult::failure(format!(
                "executor timed out after {secs}s"
            )));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "executor failed");
            let detail = last_paragraph(&output.stderr_lossy())
                .or_else(|| last_paragraph(&output.stdout_lossy()))
                .unwrap_or_default();
            let summary = match output.status.code() {
                Some(code) => format!("executor exited with status {code}: {detail}"),
                None => format!("executor terminated by signal: {detail}"),
            };
            return Ok(ExecutionResult::failure(truncate_summary(
                summary.trim_end_matches([' ', ':']),
                self.summary_limit_bytes,
            )));
        }

        debug!("executor completed successfully");
        let summary = last_paragraph(&output.stdout_lossy())
            .unwrap_or_else(|| "completed without output".to_string());
        Ok(ExecutionResult::success(truncate_summary(
            &summary,
            self.summary_limit_bytes,
        )))
    }
}

/// Last blank-line separated block of `text`, trimmed.
fn last_paragraph(text: &str) -> Option<String> {
    text.trim()
        .split("\n\n")
        .map(str::trim)
        .filter(|block| !block.is_empty())
        .last()
        .map(str::to_string)
}

/// Cut `text` to at most `limit` bytes on a char boundary.
pub fn truncate_summary(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

fn write_executor_log(path: &Path, output: &CommandOutput) -> Result<()> {
    let mut buf = String::new();
    buf.push_str("=== stdout ===\n");
    buf.push_str(&output.stdout_lossy());
    if output.stdout_truncated > 0 {
        buf.push_str(&format!("\n[stdout truncated {} bytes]\n", output.stdout_truncated));
    }
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&output.stderr_lossy());
    if output.stderr_truncated > 0 {
        buf.push_str(&format!("\n[stderr truncated {} bytes]\n", output.stderr_truncated));
    }
    if output.timed_out {
        buf.push_str("\n[executor timed out]\n");
    }
    fs::write(path, buf).with_context(|| format!("write executor log {}", path.display()))
}
