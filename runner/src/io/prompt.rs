//! Handler prompts rendered from templates.

use std::path::Path;

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::core::types::{Handler, ProjectProfile, Task};

const CODER_TEMPLATE: &str = include_str!("prompts/coder.md");
const TESTER_TEMPLATE: &str = include_str!("prompts/tester.md");
const SHIPPER_TEMPLATE: &str = include_str!("prompts/shipper.md");

/// Everything a handler prompt may mention.
#[derive(Debug, Clone)]
pub struct PromptInputs<'a> {
    pub task: &'a Task,
    pub skill: &'a str,
    pub skill_description: Option<&'a str>,
    pub profile: &'a ProjectProfile,
    /// Names of the services in the effective configuration.
    pub services: Vec<&'a str>,
    pub workdir: &'a Path,
}

struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Result<Self> {
        let mut env = Environment::new();
        for handler in [Handler::Coder, Handler::Tester, Handler::Shipper] {
            env.add_template(handler.as_str(), template_for(handler))
                .with_context(|| format!("load {handler} template"))?;
        }
        Ok(Self { env })
    }

    fn render(&self, handler: Handler, input: &PromptInputs<'_>) -> Result<String> {
        let template = self.env.get_template(handler.as_str())?;
        let rendered = template.render(context! {
            task => input.task,
            skill => input.skill,
            skill_description => input.skill_description.map(str::trim).filter(|s| !s.is_empty()),
            profile => profile_summary(input.profile),
            test_framework => input.profile.test_framework.as_deref(),
            services => &input.services,
            workdir => input.workdir.display().to_string(),
        })?;
        Ok(rendered)
    }
}

fn template_for(handler: Handler) -> &'static str {
    match handler {
        Handler::Coder => CODER_TEMPLATE,
        Handler::Tester => TESTER_TEMPLATE,
        Handler::Shipper => SHIPPER_TEMPLATE,
    }
}

fn profile_summary(profile: &ProjectProfile) -> Option<String> {
    let mut parts = Vec::new();
    if !profile.languages.is_empty() {
        parts.push(format!("Languages: {}", profile.languages.join(", ")));
    }
    if !profile.frameworks.is_empty() {
        parts.push(format!("Frameworks: {}", profile.frameworks.join(", ")));
    }
    if let Some(framework) = &profile.test_framework {
        parts.push(format!("Tests: {framework}"));
    }
    (!parts.is_empty()).then(|| parts.join("\n"))
}

/// Render the prompt for `handler`.
pub fn render_prompt(handler: Handler, input: &PromptInputs<'_>) -> Result<String> {
    PromptEngine::new()?
        .render(handler, input)
        .with_context(|| format!("render {handler} prompt"))
}
