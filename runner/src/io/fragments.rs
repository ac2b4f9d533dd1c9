//! Service config fragments on disk.
//!
//! Each tier is a JSON document whose `mcpServers` object maps service names to
//! descriptors. Only the run-local fragment is ever written; the project-shared and
//! user-global files belong to other tools.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::config::{RunnerConfig, write_atomic};
use super::init::AgentPaths;
use crate::core::config_merge::{
    ConfigFragment, EffectiveConfig, ResolvedService, ServiceDescriptor, resolve,
    resolve_with_tiers,
};
use crate::core::types::ConfigTier;
use crate::error::RunnerError;

const SERVERS_KEY: &str = "mcpServers";

/// What was found at a tier's location. `resolve` treats `Absent` and `Empty` alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentState {
    Absent,
    Empty,
    Loaded(usize),
}

/// One tier as read from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedFragment {
    pub fragment: ConfigFragment,
    pub path: Option<PathBuf>,
    pub state: FragmentState,
}

/// Per-tier provenance plus the resolved services, for `mcp list`.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceListing {
    pub services: BTreeMap<String, ResolvedService>,
    pub tiers: Vec<(ConfigTier, Option<PathBuf>, FragmentState)>,
}

/// Fixed locations of the three fragment tiers.
#[derive(Debug, Clone)]
pub struct FragmentSources {
    run_local: PathBuf,
    project_shared: PathBuf,
    user_global: Option<PathBuf>,
}

impl FragmentSources {
    pub fn new(paths: &AgentPaths, config: &RunnerConfig) -> Self {
        let user_global = config.user_fragment_path.clone().or_else(|| {
            std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".claude.json"))
        });
        Self {
            run_local: paths.run_fragment_path.clone(),
            project_shared: paths.project_fragment_path.clone(),
            user_global,
        }
    }

    pub fn from_paths(
        run_local: impl Into<PathBuf>,
        project_shared: impl Into<PathBuf>,
        user_global: Option<PathBuf>,
    ) -> Self {
        Self {
            run_local: run_local.into(),
            project_shared: project_shared.into(),
            user_global,
        }
    }

    pub fn path(&self, tier: ConfigTier) -> Option<&Path> {
        match tier {
            ConfigTier::RunLocal => Some(&self.run_local),
            ConfigTier::ProjectShared => Some(&self.project_shared),
            ConfigTier::UserGlobal => self.user_global.as_deref(),
        }
    }

    /// Read every tier, highest precedence first. A corrupt tier aborts the load.
    pub fn load_all(&self) -> Result<Vec<LoadedFragment>, RunnerError> {
        ConfigTier::PRECEDENCE
            .into_iter()
            .map(|tier| match self.path(tier) {
                Some(path) => load_fragment(tier, path),
                None => Ok(LoadedFragment {
                    fragment: ConfigFragment::empty(tier),
                    path: None,
                    state: FragmentState::Absent,
                }),
            })
            .collect()
    }

    /// Effective configuration computed fresh from disk.
    pub fn effective(&self) -> Result<EffectiveConfig, RunnerError> {
        let fragments: Vec<ConfigFragment> =
            self.load_all()?.into_iter().map(|l| l.fragment).collect();
        Ok(resolve(&fragments))
    }

    pub fn list(&self) -> Result<ServiceListing, RunnerError> {
        let loaded = self.load_all()?;
        let tiers = loaded
            .iter()
            .map(|l| (l.fragment.tier, l.path.clone(), l.state))
            .collect();
        let fragments: Vec<ConfigFragment> = loaded.into_iter().map(|l| l.fragment).collect();
        Ok(ServiceListing {
            services: resolve_with_tiers(&fragments),
            tiers,
        })
    }

    /// Define or replace a service in the run-local fragment.
    pub fn add(&self, tier: ConfigTier, name: &str, descriptor: &ServiceDescriptor) -> Result<()> {
        self.ensure_writable(tier)?;
        let mut doc = self.read_run_local()?;
        let value = serde_json::to_value(descriptor).context("serialize service descriptor")?;
        let mut servers = take_servers(&mut doc);
        servers.insert(name.to_string(), value);
        doc.insert(SERVERS_KEY.to_string(), Value::Object(servers));
        self.write_run_local(&doc)?;
        info!(service = name, "service added to run-local config");
        Ok(())
    }

    /// Remove a service from the run-local fragment. Returns whether it was present.
    pub fn remove(&self, tier: ConfigTier, name: &str) -> Result<bool> {
        self.ensure_writable(tier)?;
        if !self.run_local.exists() {
            return Ok(false);
        }
        let mut doc = self.read_run_local()?;
        let mut servers = take_servers(&mut doc);
        let removed = servers.remove(name).is_some();
        if removed {
            doc.insert(SERVERS_KEY.to_string(), Value::Object(servers));
            self.write_run_local(&doc)?;
            info!(service = name, "service removed from run-local config");
        }
        Ok(removed)
    }

    /// Merge environment variables into a run-local service.
    pub fn set_env(&self, name: &str, env: &BTreeMap<String, String>) -> Result<()> {
        let mut doc = self.read_run_local()?;
        let mut servers = take_servers(&mut doc);
        let Some(entry) = servers.get_mut(name) else {
            return Err(RunnerError::UnknownService {
                name: name.to_string(),
            }
            .into());
        };
        let mut descriptor: ServiceDescriptor = serde_json::from_value(entry.clone())
            .with_context(|| format!("parse run-local service '{name}'"))?;
        descriptor
            .env
            .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        *entry = serde_json::to_value(&descriptor).context("serialize service descriptor")?;
        doc.insert(SERVERS_KEY.to_string(), Value::Object(servers));
        self.write_run_local(&doc)?;
        info!(service = name, keys = env.len(), "service env updated");
        Ok(())
    }

    fn ensure_writable(&self, tier: ConfigTier) -> Result<(), RunnerError> {
        if tier == ConfigTier::RunLocal {
            Ok(())
        } else {
            Err(RunnerError::ReadOnlyTier { tier })
        }
    }

    fn read_run_local(&self) -> Result<Map<String, Value>> {
        let raw = match fs::read_to_string(&self.run_local) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("read {}", self.run_local.display()));
            }
        };
        if raw.trim().is_empty() {
            return Ok(Map::new());
        }
        // Never rewrite a file that would fail to load.
        parse_document(ConfigTier::RunLocal, &self.run_local, &raw)?;
        match serde_json::from_str(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            _ => Ok(Map::new()),
        }
    }

    fn write_run_local(&self, doc: &Map<String, Value>) -> Result<()> {
        let mut buf = serde_json::to_string_pretty(doc).context("serialize run-local config")?;
        buf.push('\n');
        write_atomic(&self.run_local, &buf)
    }
}

fn take_servers(doc: &mut Map<String, Value>) -> Map<String, Value> {
    match doc.remove(SERVERS_KEY) {
        Some(Value::Object(servers)) => servers,
        _ => Map::new(),
    }
}

/// Load one tier. Missing file is `Absent`; a blank file or no services is `Empty`.
pub fn load_fragment(tier: ConfigTier, path: &Path) -> Result<LoadedFragment, RunnerError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(%tier, path = %path.display(), "fragment absent");
            return Ok(LoadedFragment {
                fragment: ConfigFragment::empty(tier),
                path: Some(path.to_path_buf()),
                state: FragmentState::Absent,
            });
        }
        Err(err) => return Err(err.into()),
    };
    let entries = if raw.trim().is_empty() {
        BTreeMap::new()
    } else {
        parse_document(tier, path, &raw)?
    };
    let state = if entries.is_empty() {
        FragmentState::Empty
    } else {
        FragmentState::Loaded(entries.len())
    };
    debug!(%tier, path = %path.display(), ?state, "fragment loaded");
    Ok(LoadedFragment {
        fragment: ConfigFragment { tier, entries },
        path: Some(path.to_path_buf()),
        state,
    })
}

fn parse_document(
    tier: ConfigTier,
    path: &Path,
    raw: &str,
) -> Result<BTreeMap<String, ServiceDescriptor>, RunnerError> {
    let parse_error = |message: String| RunnerError::FragmentParse {
        tier,
        path: path.to_path_buf(),
        message,
    };
    let doc: Value = serde_json::from_str(raw).map_err(|err| parse_error(err.to_string()))?;
    let Value::Object(mut doc) = doc else {
        return Err(parse_error("top level must be a JSON object".to_string()));
    };
    match doc.remove(SERVERS_KEY) {
        None | Some(Value::Null) => Ok(BTreeMap::new()),
        Some(servers @ Value::Object(_)) => {
            serde_json::from_value(servers).map_err(|err| parse_error(err.to_string()))
        }
        Some(_) => Err(parse_error(format!("`{SERVERS_KEY}` must be an object"))),
    }
}

/// Write the effective configuration handed to one executor call.
pub fn write_effective(path: &Path, effective: &EffectiveConfig) -> Result<()> {
    let servers = serde_json::to_value(effective).context("serialize effective config")?;
    let doc = Map::from_iter([(SERVERS_KEY.to_string(), servers)]);
    let mut buf = serde_json::to_string_pretty(&doc).context("serialize effective config")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        _temp: tempfile::TempDir,
        sources: FragmentSources,
    }

    fn fixture() -> Fixture {
        let temp = tempfile::tempdir().expect("tempdir");
        let sources = FragmentSources::from_paths(
            temp.path().join("run.json"),
            temp.path().join("project.json"),
            Some(temp.path().join("user.json")),
        );
        Fixture {
            _temp: temp,
            sources,
        }
    }

    fn write(sources: &FragmentSources, tier: ConfigTier, contents: &str) {
        fs::write(sources.path(tier).expect("path"), contents).expect("write fragment");
    }

    #[test]
    fn resolves_layered_files() {
        let fx = fixture();
        write(
            &fx.sources,
            ConfigTier::RunLocal,
            r#"{"mcpServers":{"a":{"command":"X"}}}"#,
        );
        write(
            &fx.sources,
            ConfigTier::ProjectShared,
            r#"{"mcpServers":{"a":{"command":"Y"},"b":{"command":"Z"}}}"#,
        );
        write(
            &fx.sources,
            ConfigTier::UserGlobal,
            r#"{"theme":"dark","mcpServers":{"b":{"command":"W"},"c":{"command":"V"}}}"#,
        );

        let effective = fx.sources.effective().expect("effective");
        let commands: Vec<(&str, &str)> = effective
            .iter()
            .map(|(name, d)| (name.as_str(), d.command.as_deref().unwrap_or("")))
            .collect();
        assert_eq!(commands, vec![("a", "X"), ("b", "Z"), ("c", "V")]);
    }

    #[test]
    fn missing_and_blank_files_are_empty_but_reported_differently() {
        let fx = fixture();
        write(&fx.sources, ConfigTier::ProjectShared, "  \n");
        write(&fx.sources, ConfigTier::UserGlobal, r#"{"mcpServers":{}}"#);

        let listing = fx.sources.list().expect("list");
        assert!(listing.services.is_empty());
        let states: Vec<FragmentState> = listing.tiers.iter().map(|t| t.2).collect();
        assert_eq!(
            states,
            vec![
                FragmentState::Absent,
                FragmentState::Empty,
                FragmentState::Empty
            ]
        );
    }

    #[test]
    fn unknown_home_is_absent() {
        let fx = fixture();
        let sources = FragmentSources::from_paths(
            fx.sources.path(ConfigTier::RunLocal).expect("run"),
            fx.sources.path(ConfigTier::ProjectShared).expect("project"),
            None,
        );
        let loaded = sources.load_all().expect("load");
        assert_eq!(loaded[2].state, FragmentState::Absent);
        assert_eq!(loaded[2].path, None);
    }

    #[test]
    fn corrupt_tier_aborts_with_tier_and_path() {
        let fx = fixture();
        write(
            &fx.sources,
            ConfigTier::RunLocal,
            r#"{"mcpServers":{"a":{"command":"X"}}}"#,
        );
        write(&fx.sources, ConfigTier::ProjectShared, "{not json");

        let err = fx.sources.effective().expect_err("corrupt");
        match err {
            RunnerError::FragmentParse { tier, path, .. } => {
                assert_eq!(tier, ConfigTier::ProjectShared);
                assert!(path.ends_with("project.json"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn servers_key_of_wrong_type_is_a_parse_error() {
        let fx = fixture();
        write(&fx.sources, ConfigTier::UserGlobal, r#"{"mcpServers":[1,2]}"#);
        let err = fx.sources.load_all().expect_err("bad shape");
        assert!(matches!(
            err,
            RunnerError::FragmentParse {
                tier: ConfigTier::UserGlobal,
                ..
            }
        ));
    }

    #[test]
    fn list_reports_winning_tier() {
        let fx = fixture();
        write(
            &fx.sources,
            ConfigTier::ProjectShared,
            r#"{"mcpServers":{"db":{"command":"pg"}}}"#,
        );
        fx.sources
            .add(
                ConfigTier::RunLocal,
                "db",
                &ServiceDescriptor::command("sqlite", Vec::new()),
            )
            .expect("add");

        let listing = fx.sources.list().expect("list");
        assert_eq!(listing.services["db"].tier, ConfigTier::RunLocal);
        assert_eq!(
            listing.services["db"].descriptor.command.as_deref(),
            Some("sqlite")
        );
        assert_eq!(listing.tiers[0].2, FragmentState::Loaded(1));
    }

    #[test]
    fn add_and_remove_touch_only_run_local() {
        let fx = fixture();
        let project = r#"{"mcpServers":{"a":{"command":"Y"}}}"#;
        write(&fx.sources, ConfigTier::ProjectShared, project);

        let svc = ServiceDescriptor::command("X", Vec::new());
        fx.sources
            .add(ConfigTier::RunLocal, "a", &svc)
            .expect("add");
        assert_eq!(fx.sources.effective().expect("effective")["a"], svc);

        assert!(fx.sources.remove(ConfigTier::RunLocal, "a").expect("remove"));
        let effective = fx.sources.effective().expect("effective");
        assert_eq!(effective["a"].command.as_deref(), Some("Y"));

        let on_disk = fs::read_to_string(fx.sources.path(ConfigTier::ProjectShared).expect("p"))
            .expect("read project");
        assert_eq!(on_disk, project);
    }

    #[test]
    fn remove_of_absent_name_is_noop() {
        let fx = fixture();
        assert!(!fx.sources.remove(ConfigTier::RunLocal, "ghost").expect("remove"));
        assert!(!fx.sources.path(ConfigTier::RunLocal).expect("p").exists());

        fx.sources
            .add(
                ConfigTier::RunLocal,
                "real",
                &ServiceDescriptor::command("x", Vec::new()),
            )
            .expect("add");
        assert!(!fx.sources.remove(ConfigTier::RunLocal, "ghost").expect("remove"));
        assert!(fx.sources.effective().expect("effective").contains_key("real"));
    }

    #[test]
    fn other_tiers_are_read_only() {
        let fx = fixture();
        let svc = ServiceDescriptor::command("x", Vec::new());
        let err = fx
            .sources
            .add(ConfigTier::ProjectShared, "a", &svc)
            .expect_err("read-only");
        assert!(matches!(
            err.downcast_ref::<RunnerError>(),
            Some(RunnerError::ReadOnlyTier {
                tier: ConfigTier::ProjectShared
            })
        ));
        assert!(fx.sources.remove(ConfigTier::UserGlobal, "a").is_err());
    }

    #[test]
    fn set_env_merges_into_existing_service() {
        let fx = fixture();
        let mut svc = ServiceDescriptor::command("npx", vec!["server".to_string()]);
        svc.env.insert("KEEP".to_string(), "1".to_string());
        svc.env.insert("TOKEN".to_string(), "old".to_string());
        fx.sources
            .add(ConfigTier::RunLocal, "api", &svc)
            .expect("add");

        let update = BTreeMap::from([("TOKEN".to_string(), "new".to_string())]);
        fx.sources.set_env("api", &update).expect("set env");

        let effective = fx.sources.effective().expect("effective");
        assert_eq!(effective["api"].env["KEEP"], "1");
        assert_eq!(effective["api"].env["TOKEN"], "new");
        assert_eq!(effective["api"].args, vec!["server"]);
    }

    #[test]
    fn set_env_on_unknown_service_fails() {
        let fx = fixture();
        let err = fx
            .sources
            .set_env("ghost", &BTreeMap::new())
            .expect_err("unknown");
        assert!(matches!(
            err.downcast_ref::<RunnerError>(),
            Some(RunnerError::UnknownService { .. })
        ));
    }

    #[test]
    fn corrupt_run_local_is_not_overwritten() {
        let fx = fixture();
        write(&fx.sources, ConfigTier::RunLocal, "{oops");
        let svc = ServiceDescriptor::command("x", Vec::new());
        assert!(fx.sources.add(ConfigTier::RunLocal, "a", &svc).is_err());
        let raw = fs::read_to_string(fx.sources.path(ConfigTier::RunLocal).expect("p"))
            .expect("read");
        assert_eq!(raw, "{oops");
    }

    #[test]
    fn effective_config_file_wraps_servers() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("runs").join("1").join("mcp.json");
        let effective =
            EffectiveConfig::from([("a".to_string(), ServiceDescriptor::command("X", Vec::new()))]);
        write_effective(&path, &effective).expect("write");
        let doc: Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(doc["mcpServers"]["a"]["command"], "X");
    }
}
