//! Plan loading: parse a plan document, then append its tasks to the store.

use std::fs;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::core::plan_parser::parse_plan;
use crate::core::types::Task;
use crate::io::task_store::TaskStore;

/// Tasks created from one plan document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedPlan {
    /// Text of the first `# ` heading, if any.
    pub title: Option<String>,
    pub tasks: Vec<Task>,
}

/// Parse `text` and insert its tasks for `project_id`.
///
/// Parsing completes before the store is touched, so a rejected document leaves no tasks.
pub fn load_plan(store: &mut TaskStore, project_id: &str, text: &str) -> Result<LoadedPlan> {
    let parsed = parse_plan(text)?;
    let tasks = store.insert_many(project_id, &parsed.items)?;
    info!(
        project_id,
        title = parsed.title.as_deref().unwrap_or(""),
        tasks = tasks.len(),
        "plan loaded"
    );
    Ok(LoadedPlan {
        title: parsed.title,
        tasks,
    })
}

/// Read a plan document from `path`, or from stdin when `path` is `-`.
pub fn read_plan_source(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("read plan from stdin")?;
        return Ok(buf);
    }
    fs::read_to_string(path).with_context(|| format!("read plan {}", path.display()))
}
