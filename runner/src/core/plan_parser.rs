//! Plan document parsing.
//!
//! Recognizes two line forms, in document order:
//! - checkbox items: `- [ ] text`, `- [x] text`
//! - numbered items: `N. text`
//!
//! Everything else (prose, headings, nested notes) is ignored. Parsing is pure;
//! inserting the resulting items is the caller's job.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::PlanItem;
use crate::error::RunnerError;

static CHECKBOX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*-\s+\[( |x|X)\]\s+(\S.*)$").expect("checkbox pattern is valid")
});
static NUMBERED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\d+\.\s+(\S.*)$").expect("numbered pattern is valid"));
static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#\s+(\S.*)$").expect("title pattern is valid"));

/// Result of parsing a plan document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPlan {
    /// First level-one heading, if any.
    pub title: Option<String>,
    /// Recognized items in document order; item `i` gets sequence `i + 1`.
    pub items: Vec<PlanItem>,
}

/// Parse a plan document into ordered items.
///
/// Fails with [`RunnerError::EmptyPlan`] when no line is recognized.
pub fn parse_plan(text: &str) -> Result<ParsedPlan, RunnerError> {
    let mut title = None;
    let mut items = Vec::new();

    for line in text.lines() {
        let line = line.trim_end();
        if let Some(caps) = CHECKBOX_RE.captures(line) {
            items.push(PlanItem {
                description: caps[2].trim().to_string(),
                checked: !caps[1].trim().is_empty(),
            });
        } else if let Some(caps) = NUMBERED_RE.captures(line) {
            items.push(PlanItem {
                description: caps[1].trim().to_string(),
                checked: false,
            });
        } else if title.is_none()
            && let Some(caps) = TITLE_RE.captures(line)
        {
            title = Some(caps[1].trim().to_string());
        }
    }

    if items.is_empty() {
        return Err(RunnerError::EmptyPlan);
    }
    Ok(ParsedPlan { title, items })
}
