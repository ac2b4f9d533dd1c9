//! Precedence resolution of layered service configuration.
//!
//! For each service name the descriptor from the highest tier that defines it wins
//! outright. Descriptors are never merged field by field.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::types::ConfigTier;

/// How to launch one auxiliary service. Unknown keys are carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ServiceDescriptor {
    pub fn command(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: Some(command.into()),
            args,
            ..Self::default()
        }
    }

    /// Build a descriptor from a command line given by the user.
    ///
    /// A bare npm package (`@scope/pkg` with no arguments) expands to `npx -y @scope/pkg`.
    pub fn from_command_line(command: &str, args: Vec<String>) -> Self {
        if args.is_empty() && command.starts_with('@') && command.contains('/') {
            return Self::command("npx", vec!["-y".to_string(), command.to_string()]);
        }
        Self::command(command, args)
    }

    /// `command arg1 arg2 ...` for display; empty for non-command services.
    pub fn command_line(&self) -> String {
        let mut parts: Vec<&str> = self.command.as_deref().into_iter().collect();
        parts.extend(self.args.iter().map(String::as_str));
        parts.join(" ")
    }
}

/// Entries from one tier.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFragment {
    pub tier: ConfigTier,
    pub entries: BTreeMap<String, ServiceDescriptor>,
}

impl ConfigFragment {
    pub fn empty(tier: ConfigTier) -> Self {
        Self {
            tier,
            entries: BTreeMap::new(),
        }
    }
}

/// Merged service configuration handed to executors.
pub type EffectiveConfig = BTreeMap<String, ServiceDescriptor>;

/// A resolved service and the tier it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedService {
    pub descriptor: ServiceDescriptor,
    pub tier: ConfigTier,
}

/// Resolve fragments given highest-precedence first.
pub fn resolve(fragments: &[ConfigFragment]) -> EffectiveConfig {
    resolve_with_tiers(fragments)
        .into_iter()
        .map(|(name, resolved)| (name, resolved.descriptor))
        .collect()
}

/// Like [`resolve`], but records which tier each service resolved from.
pub fn resolve_with_tiers(fragments: &[ConfigFragment]) -> BTreeMap<String, ResolvedService> {
    let mut resolved = BTreeMap::new();
    for fragment in fragments {
        for (name, descriptor) in &fragment.entries {
            resolved
                .entry(name.clone())
                .or_insert_with(|| ResolvedService {
                    descriptor: descriptor.clone(),
                    tier: fragment.tier,
                });
        }
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(command: &str) -> ServiceDescriptor {
        ServiceDescriptor::command(command, Vec::new())
    }

    fn fragment(tier: ConfigTier, entries: &[(&str, &str)]) -> ConfigFragment {
        ConfigFragment {
            tier,
            entries: entries
                .iter()
                .map(|(name, command)| (name.to_string(), descriptor(command)))
                .collect(),
        }
    }

    #[test]
    fn higher_tiers_shadow_lower_and_gaps_fall_through() {
        let fragments = vec![
            fragment(ConfigTier::RunLocal, &[("a", "X")]),
            fragment(ConfigTier::ProjectShared, &[("a", "Y"), ("b", "Z")]),
            fragment(ConfigTier::UserGlobal, &[("b", "W"), ("c", "V")]),
        ];
        let effective = resolve(&fragments);
        let expected: EffectiveConfig = [("a", "X"), ("b", "Z"), ("c", "V")]
            .into_iter()
            .map(|(name, command)| (name.to_string(), descriptor(command)))
            .collect();
        assert_eq!(effective, expected);
    }

    #[test]
    fn winning_descriptor_replaces_whole_lower_descriptor() {
        let mut low = ServiceDescriptor::command("npx", vec!["server".to_string()]);
        low.env.insert("TOKEN".to_string(), "low".to_string());
        let high = ServiceDescriptor::command("docker", Vec::new());

        let fragments = vec![
            ConfigFragment {
                tier: ConfigTier::RunLocal,
                entries: BTreeMap::from([("svc".to_string(), high.clone())]),
            },
            ConfigFragment {
                tier: ConfigTier::UserGlobal,
                entries: BTreeMap::from([("svc".to_string(), low)]),
            },
        ];
        let effective = resolve(&fragments);
        assert_eq!(effective["svc"], high);
        assert!(effective["svc"].env.is_empty());
    }

    #[test]
    fn empty_fragments_resolve_to_empty_config() {
        let fragments: Vec<ConfigFragment> = ConfigTier::PRECEDENCE
            .into_iter()
            .map(ConfigFragment::empty)
            .collect();
        assert!(resolve(&fragments).is_empty());
        assert!(resolve(&[]).is_empty());
    }

    #[test]
    fn resolve_with_tiers_reports_winning_tier() {
        let fragments = vec![
            fragment(ConfigTier::RunLocal, &[("a", "X")]),
            fragment(ConfigTier::ProjectShared, &[("a", "Y"), ("b", "Z")]),
            fragment(ConfigTier::UserGlobal, &[("c", "V")]),
        ];
        let listed = resolve_with_tiers(&fragments);
        assert_eq!(listed["a"].tier, ConfigTier::RunLocal);
        assert_eq!(listed["b"].tier, ConfigTier::ProjectShared);
        assert_eq!(listed["c"].tier, ConfigTier::UserGlobal);
    }

    #[test]
    fn descriptor_preserves_unknown_keys() {
        let raw = r#"{"type":"http","url":"http://localhost:9000","env":{"A":"1"}}"#;
        let parsed: ServiceDescriptor = serde_json::from_str(raw).expect("parse");
        assert_eq!(parsed.command, None);
        assert_eq!(parsed.extra["url"], "http://localhost:9000");
        let back: Value = serde_json::to_value(&parsed).expect("serialize");
        assert_eq!(back["type"], "http");
        assert_eq!(back["env"]["A"], "1");
    }

    #[test]
    fn npm_package_shorthand_expands_to_npx() {
        let svc = ServiceDescriptor::from_command_line("@acme/mcp-server", Vec::new());
        assert_eq!(svc.command_line(), "npx -y @acme/mcp-server");

        let explicit =
            ServiceDescriptor::from_command_line("@acme/mcp-server", vec!["--port".to_string()]);
        assert_eq!(explicit.command.as_deref(), Some("@acme/mcp-server"));

        let plain = ServiceDescriptor::from_command_line("uvx", vec!["mcp-git".to_string()]);
        assert_eq!(plain.command_line(), "uvx mcp-git");
    }

    #[test]
    fn command_line_joins_command_and_args() {
        let svc = ServiceDescriptor::command("npx", vec!["-y".to_string(), "pkg".to_string()]);
        assert_eq!(svc.command_line(), "npx -y pkg");
        assert_eq!(ServiceDescriptor::default().command_line(), "");
    }
}
