//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use collection_stress::cluster::sim::SimCluster;
use collection_stress::core::config::Config;
use collection_stress::core::errors::StressError;
use collection_stress::core::interrupt::InterruptFlag;
use collection_stress::logger::activity::spawn_logger;
use collection_stress::scenario::orchestrator::{ScenarioOrchestrator, ScenarioReport};

/// Collection stress harness: create, index, delete, verify storage cleanup.
#[derive(Debug, Parser)]
#[command(
    name = "cstress",
    author,
    version,
    about = "Collection lifecycle stress harness",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run one scenario against the in-memory cluster.
    Run(RunArgs),
    /// Inspect or validate configuration.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args, Default)]
struct RunArgs {
    /// Fixed RNG seed for replaying a run.
    #[arg(long, value_name = "N")]
    seed: Option<u64>,
    /// Exact number of create/index/delete cycles.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    cycles: Option<u32>,
    /// Always finish with a chaos cycle.
    #[arg(long, conflicts_with = "no_chaos")]
    chaos: bool,
    /// Never run the chaos cycle.
    #[arg(long)]
    no_chaos: bool,
    /// Number of simulated nodes.
    #[arg(long, value_name = "N")]
    nodes: Option<usize>,
    /// Collection name to reuse across cycles.
    #[arg(long, value_name = "NAME")]
    collection: Option<String>,
    /// Shrink delays and timeouts so the run takes seconds.
    #[arg(long)]
    fast: bool,
}

#[derive(Debug, Clone, Args, Default)]
struct ConfigArgs {
    /// Config operation to run.
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
    /// Validate configuration and exit.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or configuration.
    #[error("{0}")]
    User(String),
    /// The scenario ran and failed an assertion or a bounded wait.
    #[error("{message}")]
    Scenario { code: &'static str, message: String },
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Scenario { .. } | Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
        }
    }

    /// Whether the failure was already reported on the normal output stream.
    pub const fn already_reported(&self) -> bool {
        matches!(self, Self::Scenario { .. })
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Run(args) => run_scenario(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

// ──────────────────── run ────────────────────

fn apply_run_overrides(mut config: Config, args: &RunArgs) -> Config {
    if args.fast {
        config = config.fast();
    }
    if let Some(seed) = args.seed {
        config.scenario.seed = Some(seed);
    }
    if let Some(cycles) = args.cycles {
        config.scenario.min_cycles = cycles;
        config.scenario.max_cycles = cycles;
    }
    if args.chaos {
        config.scenario.chaos_probability = 1.0;
    } else if args.no_chaos {
        config.scenario.chaos_probability = 0.0;
    }
    if let Some(nodes) = args.nodes {
        config.sim.node_count = nodes;
    }
    if let Some(name) = &args.collection {
        config.scenario.collection_name.clone_from(name);
    }
    config
}

fn run_scenario(cli: &Cli, args: &RunArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref()).map_err(|e| CliError::User(e.to_string()))?;
    let config = apply_run_overrides(config, args);
    config
        .validate()
        .and_then(|()| config.sim.validate())
        .map_err(|e| CliError::User(e.to_string()))?;

    let logger = if config.logging.enabled {
        match spawn_logger(&config.logging) {
            Ok(pair) => Some(pair),
            Err(e) => {
                eprintln!("[CST-LOG] activity log disabled: {e}");
                None
            }
        }
    } else {
        None
    };
    let handle = logger.as_ref().map(|(handle, _)| handle.clone());

    let sim = SimCluster::new(config.sim.clone());
    let orchestrator =
        ScenarioOrchestrator::new(sim.context(), config, InterruptFlag::with_os_signals(), handle);
    let seed = orchestrator.seed();
    let result = orchestrator.run();

    if let Some((handle, join)) = logger {
        handle.shutdown();
        if join.join().is_err() {
            eprintln!("[CST-LOG] logger thread panicked");
        }
    }

    let mode = output_mode(cli);
    match result {
        Ok(report) => {
            match mode {
                OutputMode::Human => print_report(&report),
                OutputMode::Json => write_json_line(&json!({
                    "command": "run",
                    "ok": true,
                    "report": serde_json::to_value(&report)?,
                }))?,
            }
            Ok(())
        }
        Err(err) => {
            match mode {
                OutputMode::Human => {
                    println!("{} seed={seed}", "FAIL".red().bold());
                    println!("  {err}");
                    println!("  replay with: cstress run --seed {seed}");
                }
                OutputMode::Json => write_json_line(&json!({
                    "command": "run",
                    "ok": false,
                    "seed": seed,
                    "error_code": err.code(),
                    "error": err.to_string(),
                }))?,
            }
            Err(scenario_error(&err))
        }
    }
}

fn scenario_error(err: &StressError) -> CliError {
    match err {
        StressError::InvalidConfig { .. }
        | StressError::MissingConfig { .. }
        | StressError::ConfigParse { .. } => CliError::User(err.to_string()),
        _ => CliError::Scenario {
            code: err.code(),
            message: err.to_string(),
        },
    }
}

fn print_report(report: &ScenarioReport) {
    println!(
        "{} seed={} cycles={} chaos={} auto_soft_commit={} ({}ms)",
        "PASS".green().bold(),
        report.seed,
        report.cycles.len(),
        if report.chaos.is_some() { "yes" } else { "no" },
        if report.plan.auto_soft_commit { "on" } else { "off" },
        report.duration_ms
    );
    for cycle in &report.cycles {
        let t = &cycle.topology;
        println!(
            "  cycle {}: {} shards={} rf={} max/node={} docs={} dbq={} dirs={} ({}ms)",
            cycle.cycle,
            t.profile,
            t.num_shards,
            t.replication_factor,
            t.max_shards_per_node,
            cycle.docs_indexed,
            if cycle.delete_by_query { "yes" } else { "no" },
            cycle.directories_checked,
            cycle.duration_ms
        );
    }
    if let Some(chaos) = &report.chaos {
        println!(
            "  chaos: stopped {} safe-mode exit after {}ms ({:?}) recovered in {}ms",
            chaos.node, chaos.safe_mode_delay_ms, chaos.safe_mode_exit, chaos.recovery_ms
        );
    }
}

// ──────────────────── config ────────────────────

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    write_json_line(&json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    }))?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config =
                Config::load(cli.config.as_deref()).map_err(|e| CliError::User(e.to_string()))?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    write_json_line(&json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    }))?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref())
            .and_then(|config| config.sim.validate().map(|()| config))
        {
            Ok(config) => {
                let hash = config
                    .stable_hash()
                    .map_err(|e| CliError::Runtime(e.to_string()))?;
                let source = config
                    .source
                    .as_ref()
                    .map_or_else(|| "(defaults)".to_string(), |p| p.display().to_string());

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {source}");
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        write_json_line(&json!({
                            "command": "config validate",
                            "valid": true,
                            "path": source,
                            "hash": hash,
                        }))?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => {
                        eprintln!("Configuration is INVALID: {e}");
                    }
                    OutputMode::Json => {
                        write_json_line(&json!({
                            "command": "config validate",
                            "valid": false,
                            "error": e.to_string(),
                        }))?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

// ──────────────────── output ────────────────────

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("CST_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
