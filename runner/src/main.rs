//! plan-runner: run a development plan task by task through a coding assistant.
//!
//! State lives in `.agent/` under the project directory; see `plan-runner init`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};

use plan_runner::core::config_merge::ServiceDescriptor;
use plan_runner::core::router::SkillEntry;
use plan_runner::core::types::{ConfigTier, Handler, ProjectProfile, TaskId};
use plan_runner::exit_codes;
use plan_runner::io::config::load_config;
use plan_runner::io::executor::CommandExecutor;
use plan_runner::io::fragments::{FragmentSources, FragmentState};
use plan_runner::io::init::{AgentPaths, InitOptions, init_agent, require_initialized};
use plan_runner::io::profile::{ProfileProvider, StoredProfile};
use plan_runner::io::service_check::{CHECK_TIMEOUT, ServiceCheck, check_service};
use plan_runner::io::skills::{add_skill, load_registry, set_enabled};
use plan_runner::logging;
use plan_runner::orchestrator::{Orchestrator, RunOptions, RunOutcome, RunStop};
use plan_runner::plan::read_plan_source;

#[derive(Parser)]
#[command(
    name = "plan-runner",
    version,
    about = "Run a development plan task by task through a coding assistant"
)]
struct Cli {
    /// Project directory.
    #[arg(short = 'C', long = "project-dir", global = true, default_value = ".")]
    project_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.agent/` with default config, skills and an empty task store.
    Init {
        /// Overwrite existing config files (tasks are kept).
        #[arg(short, long)]
        force: bool,
    },
    /// Load tasks from a plan document (`-` reads stdin).
    Plan { file: PathBuf },
    /// Run the next eligible task, a specific task, or all tasks.
    Run {
        /// Run exactly this task id.
        #[arg(short = 't', long = "task", conflicts_with = "all")]
        task: Option<TaskId>,
        /// Drain: run tasks in order until done or one fails.
        #[arg(short, long)]
        all: bool,
        /// Allow tasks routed to a ship skill.
        #[arg(long)]
        ship: bool,
        /// Per-task timeout in seconds (overrides config).
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },
    /// Show task counts, pending work and failures.
    Status,
    /// Queue a failed task to run again.
    Retry { id: TaskId },
    /// Skip a pending or failed task.
    Skip { id: TaskId },
    /// Show what the project scanner reported about the project.
    Knowledge,
    /// Delete all tasks of the project.
    Reset {
        /// Confirm the irreversible reset.
        #[arg(long)]
        yes: bool,
    },
    /// Inspect and edit service configuration.
    #[command(subcommand)]
    Mcp(McpCommand),
    /// Inspect and edit the skill registry.
    #[command(subcommand)]
    Skills(SkillsCommand),
}

#[derive(Subcommand)]
enum McpCommand {
    /// Show the effective services and where each comes from.
    List,
    /// Add or replace a run-local service. `@scope/pkg` alone runs via `npx -y`.
    Add {
        /// Environment variable for the service (repeatable).
        #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = parse_key_val)]
        env: Vec<(String, String)>,
        name: String,
        command: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Remove a run-local service.
    Remove { name: String },
    /// Run an effective service with `--help` to check that it starts.
    Test { name: String },
    /// Set environment variables on a run-local service.
    Env {
        name: String,
        #[arg(required = true, value_name = "KEY=VALUE", value_parser = parse_key_val)]
        vars: Vec<(String, String)>,
    },
}

#[derive(Subcommand)]
enum SkillsCommand {
    /// List registered skills.
    List,
    Enable { name: String },
    Disable { name: String },
    /// Register a custom skill.
    Add {
        name: String,
        #[arg(long, default_value = "coder")]
        handler: Handler,
        /// Routing keyword (repeatable).
        #[arg(short, long = "keyword", required = true)]
        keywords: Vec<String>,
        #[arg(long, default_value = "")]
        description: String,
    },
}

fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = cli.project_dir.as_path();
    match cli.command {
        Command::Init { force } => cmd_init(root, force),
        Command::Plan { file } => cmd_plan(root, &file),
        Command::Run {
            task,
            all,
            ship,
            timeout,
        } => {
            let options = RunOptions {
                confirm_ship: ship,
                timeout: timeout.map(Duration::from_secs),
            };
            cmd_run(root, task, all, &options)
        }
        Command::Status => cmd_status(root),
        Command::Knowledge => cmd_knowledge(root),
        Command::Retry { id } => {
            let task = open(root)?.retry(id)?;
            println!("task {} (#{}) queued for retry", task.id, task.sequence);
            Ok(exit_codes::OK)
        }
        Command::Skip { id } => {
            let task = open(root)?.skip(id)?;
            println!("task {} (#{}) skipped", task.id, task.sequence);
            Ok(exit_codes::OK)
        }
        Command::Reset { yes } => {
            if !yes {
                bail!("reset deletes every task of the project; pass --yes to confirm");
            }
            let deleted = open(root)?.reset()?;
            println!("deleted {deleted} tasks");
            Ok(exit_codes::OK)
        }
        Command::Mcp(command) => cmd_mcp(root, command),
        Command::Skills(command) => cmd_skills(root, command),
    }
}

fn open(root: &Path) -> Result<Orchestrator> {
    let profiles = StoredProfile::new(AgentPaths::new(root).profile_path);
    Orchestrator::open(root, &profiles)
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_agent(root, &InitOptions { force })?;
    println!("initialized {}", paths.agent_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_plan(root: &Path, file: &Path) -> Result<i32> {
    let text = read_plan_source(file)?;
    let mut orchestrator = open(root)?;
    let loaded = orchestrator.load_plan(&text)?;
    if let Some(title) = &loaded.title {
        println!("{title}");
    }
    println!("loaded {} tasks", loaded.tasks.len());
    for task in &loaded.tasks {
        println!("  #{} [{}] {} ({})", task.sequence, task.id, task.description, task.status);
    }
    Ok(exit_codes::OK)
}

fn cmd_run(root: &Path, task: Option<TaskId>, all: bool, options: &RunOptions) -> Result<i32> {
    let mut orchestrator = open(root)?;
    for task_id in orchestrator.interrupted() {
        println!("task {task_id} was interrupted; recovering it first");
    }
    let config = load_config(&orchestrator.paths().config_path)?;
    let executor = CommandExecutor::from_config(&config.executor);
    let outcome = match (task, all) {
        (Some(task_id), _) => orchestrator.run_task(task_id, &executor, options)?,
        (None, true) => orchestrator.run_all(&executor, options)?,
        (None, false) => orchestrator.run_next(&executor, options)?,
    };
    print_outcome(&outcome);
    Ok(exit_codes::for_stop(&outcome.stop))
}

fn print_outcome(outcome: &RunOutcome) {
    for task in &outcome.executed {
        let summary = task.result_summary.as_deref().unwrap_or("");
        println!("#{} [{}] {}: {}", task.sequence, task.id, task.status, summary);
    }
    match &outcome.stop {
        RunStop::Success => println!("ok"),
        RunStop::NoEligibleTask => println!("no eligible task"),
        RunStop::PartialFailure { task_id, summary } => {
            println!("stopped: task {task_id} failed: {summary}");
            println!("fix it, then `plan-runner retry {task_id}` or `plan-runner skip {task_id}`");
        }
        RunStop::ShipConfirmationRequired { task_id } => {
            println!("task {task_id} ships; rerun with --ship to allow it");
        }
    }
}

fn cmd_status(root: &Path) -> Result<i32> {
    let orchestrator = open(root)?;
    let report = orchestrator.status()?;
    println!("project: {}", orchestrator.project_id());
    print!("{}", report.render());
    Ok(exit_codes::OK)
}

fn cmd_knowledge(root: &Path) -> Result<i32> {
    let paths = require_initialized(root)?;
    let profile = StoredProfile::new(&paths.profile_path).scan(&paths.root);
    if profile == ProjectProfile::default() {
        println!(
            "No project knowledge yet (expected at {}).",
            paths.profile_path.display()
        );
        return Ok(exit_codes::OK);
    }
    println!("Project knowledge:");
    println!("  languages: {}", join_or_none(&profile.languages));
    println!("  frameworks: {}", join_or_none(&profile.frameworks));
    println!(
        "  test framework: {}",
        profile.test_framework.as_deref().unwrap_or("none")
    );
    Ok(exit_codes::OK)
}

fn join_or_none(values: &[String]) -> String {
    if values.is_empty() {
        "none".to_string()
    } else {
        values.join(", ")
    }
}

fn fragment_sources(root: &Path) -> Result<FragmentSources> {
    let paths = require_initialized(root)?;
    let config = load_config(&paths.config_path)?;
    Ok(FragmentSources::new(&paths, &config))
}

fn cmd_mcp(root: &Path, command: McpCommand) -> Result<i32> {
    let sources = fragment_sources(root)?;
    match command {
        McpCommand::List => {
            let listing = sources.list()?;
            for (tier, path, state) in &listing.tiers {
                let location = path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(no location)".to_string());
                let state = match state {
                    FragmentState::Absent => "absent".to_string(),
                    FragmentState::Empty => "empty".to_string(),
                    FragmentState::Loaded(n) => format!("{n} services"),
                };
                println!("{:<15} {location} ({state})", tier.as_str());
            }
            if !listing.services.is_empty() {
                println!();
            }
            for (name, resolved) in &listing.services {
                println!(
                    "{name:<20} {:<15} {}",
                    resolved.tier.as_str(),
                    resolved.descriptor.command_line()
                );
            }
        }
        McpCommand::Add {
            env,
            name,
            command,
            args,
        } => {
            let mut descriptor = ServiceDescriptor::from_command_line(&command, args);
            descriptor.env.extend(env);
            sources.add(ConfigTier::RunLocal, &name, &descriptor)?;
            println!("added {name}: {}", descriptor.command_line());
        }
        McpCommand::Remove { name } => {
            if sources.remove(ConfigTier::RunLocal, &name)? {
                println!("removed {name}");
            } else {
                println!("{name} is not defined in the run-local config");
            }
        }
        McpCommand::Test { name } => return cmd_mcp_test(&sources, &name),
        McpCommand::Env { name, vars } => {
            let vars: BTreeMap<String, String> = vars.into_iter().collect();
            sources.set_env(&name, &vars)?;
            println!("updated {} variables on {name}", vars.len());
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_mcp_test(sources: &FragmentSources, name: &str) -> Result<i32> {
    let listing = sources.list()?;
    let Some(resolved) = listing.services.get(name) else {
        bail!("service '{name}' is not configured in any tier");
    };
    println!("testing {name} ({})", resolved.tier);
    println!("  command: {}", resolved.descriptor.command_line());
    let code = match check_service(&resolved.descriptor, CHECK_TIMEOUT)? {
        ServiceCheck::Valid => {
            println!("service appears valid");
            exit_codes::OK
        }
        ServiceCheck::TimedOut => {
            println!(
                "service started (no answer within {}s)",
                CHECK_TIMEOUT.as_secs()
            );
            exit_codes::OK
        }
        ServiceCheck::Failed { code, detail } => {
            let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
            println!("service responded with error (exit {code}) {detail}");
            exit_codes::INVALID
        }
        ServiceCheck::CommandNotFound(program) => {
            println!("command not found: {program}");
            exit_codes::INVALID
        }
    };
    Ok(code)
}

fn cmd_skills(root: &Path, command: SkillsCommand) -> Result<i32> {
    let paths = require_initialized(root)?;
    match command {
        SkillsCommand::List => {
            let registry = load_registry(&paths.skills_path)?;
            if !registry.auto_select {
                println!("auto-select is off: every task uses the default skill");
            }
            for skill in &registry.skills {
                let state = if skill.enabled { "enabled" } else { "disabled" };
                println!(
                    "{:<12} {:<8} {:<8} {}",
                    skill.name,
                    state,
                    skill.handler.as_str(),
                    skill.keywords.join(",")
                );
            }
        }
        SkillsCommand::Enable { name } => {
            set_enabled(&paths.skills_path, &name, true)?;
            println!("enabled {name}");
        }
        SkillsCommand::Disable { name } => {
            set_enabled(&paths.skills_path, &name, false)?;
            println!("disabled {name}");
        }
        SkillsCommand::Add {
            name,
            handler,
            keywords,
            description,
        } => {
            add_skill(
                &paths.skills_path,
                SkillEntry {
                    name: name.clone(),
                    enabled: true,
                    handler,
                    keywords,
                    description,
                },
            )?;
            println!("added skill {name} ({handler})");
        }
    }
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["plan-runner", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
        assert_eq!(cli.project_dir, PathBuf::from("."));
    }

    #[test]
    fn parse_run_variants() {
        let cli = Cli::parse_from(["plan-runner", "run", "-a", "--ship", "--timeout", "90"]);
        assert!(matches!(
            cli.command,
            Command::Run {
                task: None,
                all: true,
                ship: true,
                timeout: Some(90)
            }
        ));

        let cli = Cli::parse_from(["plan-runner", "-C", "/repo", "run", "-t", "7"]);
        assert!(matches!(cli.command, Command::Run { task: Some(7), all: false, .. }));
        assert_eq!(cli.project_dir, PathBuf::from("/repo"));
    }

    #[test]
    fn run_rejects_task_with_all() {
        assert!(Cli::try_parse_from(["plan-runner", "run", "-t", "1", "-a"]).is_err());
    }

    #[test]
    fn parse_mcp_add_keeps_trailing_args() {
        let cli = Cli::parse_from([
            "plan-runner", "mcp", "add", "-e", "TOKEN=abc", "git", "uvx", "mcp-git", "--repo", ".",
        ]);
        let Command::Mcp(McpCommand::Add {
            env,
            name,
            command,
            args,
        }) = cli.command
        else {
            panic!("expected mcp add");
        };
        assert_eq!(env, vec![("TOKEN".to_string(), "abc".to_string())]);
        assert_eq!(name, "git");
        assert_eq!(command, "uvx");
        assert_eq!(args, vec!["mcp-git", "--repo", "."]);
    }

    #[test]
    fn parse_skills_add() {
        let cli = Cli::parse_from([
            "plan-runner", "skills", "add", "docs", "--handler", "coder", "-k", "readme", "-k",
            "docs",
        ]);
        assert!(matches!(
            cli.command,
            Command::Skills(SkillsCommand::Add { handler: Handler::Coder, ref keywords, .. })
                if keywords == &["readme", "docs"]
        ));
    }

    #[test]
    fn parse_mcp_test_and_knowledge() {
        let cli = Cli::parse_from(["plan-runner", "mcp", "test", "github"]);
        assert!(matches!(cli.command, Command::Mcp(McpCommand::Test { ref name }) if name == "github"));
        let cli = Cli::parse_from(["plan-runner", "knowledge"]);
        assert!(matches!(cli.command, Command::Knowledge));
    }

    #[test]
    fn key_val_parser() {
        assert_eq!(
            parse_key_val("A=b=c"),
            Ok(("A".to_string(), "b=c".to_string()))
        );
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=x").is_err());
    }
}
