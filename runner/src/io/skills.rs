//! Skill registry persisted as `.agent/skills.toml`.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::info;

use super::config::write_atomic;
use crate::core::router::{SkillEntry, SkillRegistry};
use crate::error::RunnerError;

/// Load the registry. A missing file yields the builtin registry.
pub fn load_registry(path: &Path) -> Result<SkillRegistry> {
    if !path.exists() {
        return Ok(SkillRegistry::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let registry: SkillRegistry =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    validate(&registry).with_context(|| format!("invalid skill registry {}", path.display()))?;
    Ok(registry)
}

pub fn save_registry(path: &Path, registry: &SkillRegistry) -> Result<()> {
    validate(registry)?;
    let mut buf = toml::to_string_pretty(registry).context("serialize skill registry")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Enable or disable a skill and persist the change immediately.
pub fn set_enabled(path: &Path, name: &str, enabled: bool) -> Result<SkillRegistry> {
    let mut registry = load_registry(path)?;
    let skill = registry
        .get_mut(name)
        .ok_or_else(|| RunnerError::UnknownSkill {
            name: name.to_string(),
        })?;
    skill.enabled = enabled;
    save_registry(path, &registry)?;
    info!(skill = name, enabled, "skill registry updated");
    Ok(registry)
}

/// Append a custom skill. Later entries lose ties to earlier ones.
pub fn add_skill(path: &Path, entry: SkillEntry) -> Result<SkillRegistry> {
    let mut registry = load_registry(path)?;
    if registry.get(&entry.name).is_some() {
        return Err(anyhow!("skill '{}' already exists", entry.name));
    }
    info!(skill = %entry.name, handler = %entry.handler, "skill added");
    registry.skills.push(entry);
    save_registry(path, &registry)?;
    Ok(registry)
}

fn validate(registry: &SkillRegistry) -> Result<()> {
    let mut seen = BTreeSet::new();
    for skill in &registry.skills {
        if skill.name.trim().is_empty() {
            return Err(anyhow!("skill name must not be empty"));
        }
        if !seen.insert(skill.name.as_str()) {
            return Err(anyhow!("duplicate skill '{}'", skill.name));
        }
    }
    Ok(())
}
