//! Keyword routing of task descriptions to skills.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::core::types::{Handler, ProjectProfile};

/// Name of the skill used when nothing matches and no default is configured.
pub const DEFAULT_SKILL: &str = "code";

/// One registered skill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillEntry {
    pub name: String,
    pub enabled: bool,
    pub handler: Handler,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub description: String,
}

/// Ordered skill registry. Order matters: ties go to the earlier entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillRegistry {
    /// When false, every task routes to the default skill.
    #[serde(default = "default_true")]
    pub auto_select: bool,
    #[serde(default)]
    pub skills: Vec<SkillEntry>,
}

fn default_true() -> bool {
    true
}

impl Default for SkillRegistry {
    fn default() -> Self {
        Self {
            auto_select: true,
            skills: vec![
                builtin(
                    "code",
                    Handler::Coder,
                    "Implement or modify code",
                    &[
                        "implement", "add", "create", "build", "feature", "fix", "refactor",
                        "update", "write",
                    ],
                ),
                builtin(
                    "test",
                    Handler::Tester,
                    "Write and run tests",
                    &["test", "tests", "testing", "coverage", "verify", "validate", "spec"],
                ),
                builtin(
                    "ship",
                    Handler::Shipper,
                    "Commit, release or deploy finished work",
                    &["ship", "release", "deploy", "publish", "commit", "push", "tag"],
                ),
            ],
        }
    }
}

fn builtin(name: &str, handler: Handler, description: &str, keywords: &[&str]) -> SkillEntry {
    SkillEntry {
        name: name.to_string(),
        enabled: true,
        handler,
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        description: description.to_string(),
    }
}

impl SkillRegistry {
    pub fn get(&self, name: &str) -> Option<&SkillEntry> {
        self.skills.iter().find(|skill| skill.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut SkillEntry> {
        self.skills.iter_mut().find(|skill| skill.name == name)
    }

    /// Handler for a skill name; unknown names run as code.
    pub fn handler_for(&self, name: &str) -> Handler {
        self.get(name)
            .map(|skill| skill.handler)
            .unwrap_or(Handler::Coder)
    }
}

/// Lowercased word tokens of a description. Hyphens and underscores stay inside words.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '_'))
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Route a task description to a skill name.
///
/// Each enabled skill scores one point per distinct keyword present among the
/// description's tokens. The highest score wins, ties go to the earliest
/// registered skill, and a zero score everywhere yields `default_skill`.
/// Tester skills also count the profile's test framework as a keyword.
pub fn select_skill(
    description: &str,
    registry: &SkillRegistry,
    profile: &ProjectProfile,
    default_skill: &str,
) -> String {
    if !registry.auto_select {
        return default_skill.to_string();
    }
    let tokens = tokenize(description);

    let mut best: Option<(&SkillEntry, usize)> = None;
    for skill in registry.skills.iter().filter(|skill| skill.enabled) {
        let mut keywords: BTreeSet<String> =
            skill.keywords.iter().map(|k| k.to_lowercase()).collect();
        if skill.handler == Handler::Tester
            && let Some(framework) = &profile.test_framework
        {
            keywords.insert(framework.to_lowercase());
        }
        let score = keywords.iter().filter(|k| tokens.contains(*k)).count();
        if score > 0 && best.is_none_or(|(_, top)| score > top) {
            best = Some((skill, score));
        }
    }

    best.map(|(skill, _)| skill.name.clone())
        .unwrap_or_else(|| default_skill.to_string())
}
