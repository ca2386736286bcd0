//! Top-level CLI definition and dispatch.

use std::fs;
use std::io::{self, IsTerminal, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use chaos_engine::core::clock::SystemClock;
use chaos_engine::core::config::Config;
use chaos_engine::daemon::loop_main::{ChaosDaemon, Engine};
use chaos_engine::daemon::notifications::{NotificationManager, NotificationSink};
use chaos_engine::daemon::signals::SignalHandler;
use chaos_engine::experiment::lifecycle::{Experiment, ExperimentSnapshot};
use chaos_engine::experiment::state::ExperimentState;
use chaos_engine::experiment::suite::ExperimentSuite;
use chaos_engine::logger::activity::{ActivityLoggerHandle, spawn_logger};
use chaos_engine::platform::registry::PlatformManager;
use chaos_engine::scripts::manager::ScriptRegistry;
use chaos_engine::scripts::shell::ShellScript;

/// chaosd: chaos-engineering control plane.
#[derive(Debug, Parser)]
#[command(
    name = "chaosd",
    author,
    version,
    about = "Chaos experiment scheduler and lifecycle engine",
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
    /// Run the scheduling daemon until SIGTERM/SIGINT.
    Daemon,
    /// Schedule one cohort and drive it to completion.
    Once(OnceArgs),
    /// Run experiments against containers matching an identifier.
    Target(TargetArgs),
    /// Run a suite described by a JSON file (`-` for stdin).
    Suite(SuiteArgs),
    /// List configured platforms.
    Platforms,
    /// List registered shell scripts.
    Scripts,
    /// Inspect configuration.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args)]
struct DriveArgs {
    /// Give up after this many seconds.
    #[arg(long, default_value_t = 3600, value_name = "SECONDS")]
    timeout_secs: u64,
    /// Delay between status ticks.
    #[arg(long, default_value_t = 1000, value_name = "MS")]
    poll_ms: u64,
}

#[derive(Debug, Clone, Args)]
struct OnceArgs {
    /// Ignore the platform clock, automated mode, and the backoff period.
    #[arg(long)]
    force: bool,
    #[command(flatten)]
    drive: DriveArgs,
}

#[derive(Debug, Clone, Args)]
struct TargetArgs {
    /// Container identity or aggregation id.
    container: String,
    #[command(flatten)]
    drive: DriveArgs,
}

#[derive(Debug, Clone, Args)]
struct SuiteArgs {
    /// Suite JSON file, or `-` for stdin.
    path: PathBuf,
    #[command(flatten)]
    drive: DriveArgs,
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
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
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Experiments ran but at least one failed or was left running.
    #[error("{0}")]
    Partial(String),
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
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
            Self::Partial(_) => 4,
        }
    }
}

impl From<chaos_engine::core::errors::ChaosError> for CliError {
    fn from(value: chaos_engine::core::errors::ChaosError) -> Self {
        Self::Runtime(value.to_string())
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Daemon => run_daemon(cli),
        Command::Once(args) => run_once(cli, args),
        Command::Target(args) => run_target(cli, args),
        Command::Suite(args) => run_suite(cli, args),
        Command::Platforms => run_platforms(cli),
        Command::Scripts => run_scripts(cli),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    Config::load(cli.config.as_deref()).map_err(|e| CliError::User(format!("invalid config: {e}")))
}

fn run_daemon(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let mut daemon = ChaosDaemon::init(config)?;
    daemon.run()?;
    Ok(())
}

// ──────────────────── one-shot runs ────────────────────

/// Engine plus the logger thread behind it, for commands that exit when
/// their experiments do.
struct OneShot {
    engine: Engine,
    logger: ActivityLoggerHandle,
    logger_join: Option<thread::JoinHandle<()>>,
    signals: SignalHandler,
}

impl OneShot {
    fn start(config: &Config) -> Result<Self, CliError> {
        let (logger, logger_join) = spawn_logger(config.logger_config())?;
        let notifications: Arc<dyn NotificationSink> =
            Arc::new(NotificationManager::from_config(&config.notifications));
        let engine = Engine::build(config, notifications, logger.clone(), Arc::new(SystemClock))?;
        Ok(Self {
            engine,
            logger,
            logger_join: Some(logger_join),
            signals: SignalHandler::new(),
        })
    }

    fn drive(&self, args: &DriveArgs) -> Result<(), CliError> {
        self.engine
            .drive_to_completion(
                Duration::from_millis(args.poll_ms.max(1)),
                Duration::from_secs(args.timeout_secs),
                &self.signals,
            )
            .map(|_| ())
            .map_err(|e| CliError::Partial(e.to_string()))
    }
}

impl Drop for OneShot {
    fn drop(&mut self) {
        self.logger.shutdown();
        if let Some(join) = self.logger_join.take() {
            let _ = join.join();
        }
    }
}

fn run_once(cli: &Cli, args: &OnceArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let session = OneShot::start(&config)?;
    let experiments = session.engine.manager.schedule_experiments(args.force);
    if experiments.is_empty() {
        let reason = if args.force {
            "no platform has eligible containers"
        } else {
            "no platform is due (use --force to ignore the schedule)"
        };
        return report_outcome(cli, "once", &[], None, Some(reason));
    }
    let outcome = session.drive(&args.drive).err();
    report_outcome(cli, "once", &experiments, outcome, None)
}

fn run_target(cli: &Cli, args: &TargetArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let session = OneShot::start(&config)?;
    let experiments = session.engine.manager.experiment_container_id(&args.container);
    if experiments.is_empty() {
        return Err(CliError::User(format!(
            "no container matches {:?}",
            args.container
        )));
    }
    let outcome = session.drive(&args.drive).err();
    report_outcome(cli, "target", &experiments, outcome, None)
}

fn run_suite(cli: &Cli, args: &SuiteArgs) -> Result<(), CliError> {
    let raw = if args.path.as_os_str() == "-" {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        fs::read_to_string(&args.path)
            .map_err(|e| CliError::User(format!("read {}: {e}", args.path.display())))?
    };
    let suite = ExperimentSuite::from_json(&raw).map_err(|e| CliError::User(e.to_string()))?;

    let config = load_config(cli)?;
    let session = OneShot::start(&config)?;
    let experiments = session
        .engine
        .manager
        .schedule_experiment_suite(&suite)
        .map_err(|e| CliError::User(e.to_string()))?;
    let outcome = session.drive(&args.drive).err();
    report_outcome(cli, "suite", &experiments, outcome, None)
}

fn report_outcome(
    cli: &Cli,
    command: &str,
    experiments: &[Arc<Experiment>],
    interrupted: Option<CliError>,
    note: Option<&str>,
) -> Result<(), CliError> {
    let snapshots: Vec<ExperimentSnapshot> = experiments.iter().map(|e| e.snapshot()).collect();
    let failed = snapshots
        .iter()
        .filter(|s| s.state == ExperimentState::Failed)
        .count();

    match output_mode(cli) {
        OutputMode::Human => {
            if let Some(note) = note {
                println!("{note}");
            }
            for snapshot in &snapshots {
                print_snapshot_human(snapshot);
            }
            if !snapshots.is_empty() {
                println!(
                    "{} experiments, {} failed",
                    snapshots.len(),
                    if failed == 0 {
                        failed.to_string().green()
                    } else {
                        failed.to_string().red()
                    }
                );
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": command,
                "note": note,
                "experiments": serde_json::to_value(&snapshots)?,
                "failed": failed,
                "interrupted": interrupted.as_ref().map(ToString::to_string),
            });
            write_json_line(&payload)?;
        }
    }

    if let Some(err) = interrupted {
        return Err(err);
    }
    if failed > 0 {
        return Err(CliError::Partial(format!(
            "{failed} of {} experiments failed",
            snapshots.len()
        )));
    }
    Ok(())
}

fn print_snapshot_human(snapshot: &ExperimentSnapshot) {
    let state = snapshot.state.to_string();
    let state = match snapshot.state {
        ExperimentState::Finished => state.green(),
        ExperimentState::Failed => state.red(),
        _ => state.yellow(),
    };
    let action = snapshot
        .action
        .as_deref()
        .or(snapshot.specific_method.as_deref())
        .unwrap_or("-");
    println!(
        "{:<10} {} {} on {}/{} (self-healing attempts: {})",
        state,
        snapshot.id.dimmed(),
        action.bold(),
        snapshot.platform,
        snapshot.container,
        snapshot.self_healing_attempts
    );
    if let Some(rejection) = &snapshot.last_rejection {
        println!("           rejected: {}", rejection.reason);
    }
}

// ──────────────────── listings ────────────────────

fn run_platforms(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let engine = Engine::build(
        &config,
        Arc::new(NotificationManager::disabled()),
        ActivityLoggerHandle::detached(),
        Arc::new(SystemClock),
    )?;
    let platforms = engine.platforms.platforms();

    match output_mode(cli) {
        OutputMode::Human => {
            if platforms.is_empty() {
                println!("No platforms configured.");
            }
            for platform in &platforms {
                println!(
                    "{}  containers={}  next={}",
                    platform.platform_type().bold(),
                    platform.roster().len(),
                    platform.next_chaos_time().to_rfc3339(),
                );
            }
        }
        OutputMode::Json => {
            let rows: Vec<Value> = platforms
                .iter()
                .map(|p| {
                    json!({
                        "platform": p.platform_type(),
                        "containers": p.roster().iter().map(|c| c.identity().to_string()).collect::<Vec<_>>(),
                        "next_chaos_time": p.next_chaos_time().to_rfc3339(),
                        "due": p.can_experiment(),
                    })
                })
                .collect();
            write_json_line(&json!({ "command": "platforms", "platforms": rows }))?;
        }
    }
    Ok(())
}

fn run_scripts(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let engine = Engine::build(
        &config,
        Arc::new(NotificationManager::disabled()),
        ActivityLoggerHandle::detached(),
        Arc::new(SystemClock),
    )?;
    let scripts = engine.scripts.scripts();

    match output_mode(cli) {
        OutputMode::Human => {
            if scripts.is_empty() {
                println!("No scripts registered.");
            }
            for script in &scripts {
                let kind = if script.requires_cattle {
                    "cattle-only".yellow()
                } else {
                    "pet-safe".green()
                };
                println!(
                    "{}  [{}] {}  {}",
                    script.name.bold(),
                    script.experiment_type,
                    kind,
                    script.description
                );
            }
        }
        OutputMode::Json => {
            let rows: Vec<&ShellScript> = scripts.iter().map(AsRef::as_ref).collect();
            let rows = serde_json::to_value(rows)?;
            write_json_line(&json!({ "command": "scripts", "scripts": rows }))?;
        }
    }
    Ok(())
}

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
            let config = load_config(cli)?;
            match output_mode(cli) {
                OutputMode::Human => println!("{}", config.to_toml()?),
                OutputMode::Json => {
                    write_json_line(&json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    }))?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;
                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("{}", "Configuration is valid.".green());
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        write_json_line(&json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                        }))?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => eprintln!("{} {e}", "Configuration is INVALID:".red()),
                    OutputMode::Json => {
                        write_json_line(&json!({
                            "command": "config validate",
                            "valid": false,
                            "error": e.to_string(),
                            "code": e.code(),
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
    let env_mode = std::env::var("CHAOSD_OUTPUT_FORMAT").ok();
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_before_and_after_subcommand() {
        let before = Cli::try_parse_from([
            "chaosd",
            "--config",
            "/tmp/chaosd.toml",
            "--json",
            "--no-color",
            "scripts",
        ]);
        assert!(before.is_ok());

        let after = Cli::try_parse_from(["chaosd", "platforms", "--json", "--no-color"]);
        assert!(after.is_ok());
    }

    #[test]
    fn parses_every_subcommand() {
        let cases = [
            vec!["chaosd", "daemon"],
            vec!["chaosd", "once"],
            vec!["chaosd", "once", "--force", "--timeout-secs", "60", "--poll-ms", "50"],
            vec!["chaosd", "target", "web-1"],
            vec!["chaosd", "suite", "-"],
            vec!["chaosd", "config", "path"],
            vec!["chaosd", "config", "show"],
            vec!["chaosd", "config", "validate"],
        ];
        for case in cases {
            let parsed = Cli::try_parse_from(case.clone());
            assert!(parsed.is_ok(), "failed to parse case: {case:?}");
        }
    }

    #[test]
    fn target_requires_container() {
        assert!(Cli::try_parse_from(["chaosd", "target"]).is_err());
    }

    #[test]
    fn completions_support_bash_zsh_and_fish() {
        for shell in ["bash", "zsh", "fish"] {
            let parsed = Cli::try_parse_from(["chaosd", "completions", shell]);
            assert!(parsed.is_ok(), "failed shell parse for {shell}");
        }
    }

    #[test]
    fn exit_codes_are_distinct_per_class() {
        assert_eq!(CliError::User(String::new()).exit_code(), 1);
        assert_eq!(CliError::Runtime(String::new()).exit_code(), 2);
        assert_eq!(CliError::Partial(String::new()).exit_code(), 4);
    }

    #[test]
    fn output_mode_resolution_honors_precedence() {
        assert_eq!(
            resolve_output_mode(true, Some("human"), true),
            OutputMode::Json
        );
        assert_eq!(
            resolve_output_mode(false, Some("json"), true),
            OutputMode::Json
        );
        assert_eq!(
            resolve_output_mode(false, Some("human"), false),
            OutputMode::Human
        );
        assert_eq!(
            resolve_output_mode(false, Some("auto"), true),
            OutputMode::Human
        );
        assert_eq!(resolve_output_mode(false, None, false), OutputMode::Json);
    }
}
