//! Command-line interface: argument definitions, dispatch, and output.

use std::path::PathBuf;

use chrono::SecondsFormat;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use crate::config::Settings;
use crate::error::{ErrorKind, Result};
use crate::instance::{self, InstanceReport, StopOutcome, StopReport};
use crate::paths::default_instances_dir;
use crate::registry::RegistryStore;

/// Exit code for idempotent no-op outcomes (already running, nothing to
/// stop), distinct from both success and the hard failure codes.
const EXIT_NOTHING_TO_DO: i32 = 1;

/// Multi-instance launcher for the MetaApi trading server.
#[derive(Debug, Parser)]
#[command(name = "metaapi-launcher", version)]
pub struct Cli {
    /// Directory holding the registry and per-instance files.
    #[arg(long, global = true, value_name = "DIR")]
    pub instances_dir: Option<PathBuf>,

    /// Print results as JSON.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Register a new instance without starting it.
    Create(InstanceArgs),
    /// Start an instance, creating it first if the name is unknown.
    Start(InstanceArgs),
    /// Stop a running instance, or all of them.
    Stop(StopArgs),
    /// Delete an instance together with its config, log, and pid files.
    Remove(RemoveArgs),
    /// List all registered instances.
    List,
    /// Show instance states, probing the health endpoint of running ones.
    Status(StatusArgs),
}

#[derive(Debug, Args)]
pub struct InstanceArgs {
    /// Instance name.
    #[arg(short, long)]
    pub instance: String,

    /// Path to the MT5 terminal executable backing this instance.
    #[arg(short, long)]
    pub mt5_path: Option<PathBuf>,

    /// Fixed port for the instance; omitted means auto-allocate.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Base config file copied for the instance instead of the default
    /// template.
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
pub struct StopArgs {
    /// Instance name.
    #[arg(short, long)]
    pub instance: Option<String>,

    /// Stop every running instance.
    #[arg(long)]
    pub all: bool,
}

#[derive(Debug, Args)]
pub struct RemoveArgs {
    /// Instance name.
    #[arg(short, long)]
    pub instance: String,

    /// Stop the instance first when it is running.
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Restrict the report to one instance.
    #[arg(short, long)]
    pub instance: Option<String>,
}

/// Execute a parsed command, returning the process exit code.
pub async fn run(cli: Cli) -> Result<i32> {
    let instances_dir = cli.instances_dir.unwrap_or_else(default_instances_dir);
    let store = RegistryStore::new(&instances_dir);
    let settings = Settings::load(&instances_dir)?;

    match cli.command {
        Command::Create(args) => cmd_create(&store, &settings, &args, cli.json),
        Command::Start(args) => cmd_start(&store, &settings, &args, cli.json).await,
        Command::Stop(args) => cmd_stop(&store, &settings, args, cli.json).await,
        Command::Remove(args) => cmd_remove(&store, &settings, &args, cli.json).await,
        Command::List => cmd_list(&store, cli.json),
        Command::Status(args) => cmd_status(&store, &args, cli.json).await,
    }
}

fn cmd_create(
    store: &RegistryStore,
    settings: &Settings,
    args: &InstanceArgs,
    json: bool,
) -> Result<i32> {
    let outcome = instance::create_instance(
        store,
        settings,
        &args.instance,
        args.mt5_path.as_deref(),
        args.port,
        args.config.as_deref(),
    )?;
    if json {
        print_json(&outcome)?;
    } else {
        println!(
            "Created instance '{}' on port {} (config: {})",
            outcome.name,
            outcome.port,
            outcome.config_path.display()
        );
    }
    Ok(0)
}

async fn cmd_start(
    store: &RegistryStore,
    settings: &Settings,
    args: &InstanceArgs,
    json: bool,
) -> Result<i32> {
    let outcome = instance::start_instance(
        store,
        settings,
        &args.instance,
        args.mt5_path.as_deref(),
        args.port,
        args.config.as_deref(),
    )
    .await?;
    if json {
        print_json(&outcome)?;
    } else if outcome.already_running {
        println!(
            "Instance '{}' already running on port {} (pid {})",
            outcome.name, outcome.port, outcome.pid
        );
    } else {
        println!(
            "Started instance '{}' on port {} (pid {}, health {})",
            outcome.name, outcome.port, outcome.pid, outcome.health
        );
    }
    Ok(if outcome.already_running {
        EXIT_NOTHING_TO_DO
    } else {
        0
    })
}

async fn cmd_stop(
    store: &RegistryStore,
    settings: &Settings,
    args: StopArgs,
    json: bool,
) -> Result<i32> {
    if let Some(name) = args.instance {
        let report = instance::stop_instance(store, settings, &name).await?;
        if json {
            print_json(&report)?;
        } else {
            print_stop_line(&report);
        }
        Ok(stop_exit_code(std::slice::from_ref(&report)))
    } else {
        let reports = instance::stop_all_instances(store, settings).await?;
        if json {
            print_json(&reports)?;
        } else if reports.is_empty() {
            println!("No running instances.");
        } else {
            for report in &reports {
                print_stop_line(report);
            }
        }
        Ok(stop_exit_code(&reports))
    }
}

async fn cmd_remove(
    store: &RegistryStore,
    settings: &Settings,
    args: &RemoveArgs,
    json: bool,
) -> Result<i32> {
    let outcome = instance::remove_instance(store, settings, &args.instance, args.force).await?;
    if json {
        print_json(&outcome)?;
    } else if outcome.stopped {
        println!("Stopped and removed instance '{}'.", outcome.name);
    } else {
        println!("Removed instance '{}'.", outcome.name);
    }
    Ok(0)
}

fn cmd_list(store: &RegistryStore, json: bool) -> Result<i32> {
    let reports = instance::list_instances(store)?;
    if json {
        print_json(&reports)?;
    } else {
        print_table(&reports, false);
    }
    Ok(0)
}

async fn cmd_status(store: &RegistryStore, args: &StatusArgs, json: bool) -> Result<i32> {
    let reports = instance::status_instances(store, args.instance.as_deref()).await?;
    if json {
        print_json(&reports)?;
    } else {
        print_table(&reports, true);
    }
    Ok(0)
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_stop_line(report: &StopReport) {
    match &report.outcome {
        StopOutcome::Stopped { forced: false } => println!("Stopped instance '{}'.", report.name),
        StopOutcome::Stopped { forced: true } => {
            println!("Stopped instance '{}' (force killed).", report.name);
        }
        StopOutcome::NotRunning => println!("Instance '{}' is not running.", report.name),
        StopOutcome::Unknown => println!("No instance named '{}'.", report.name),
        StopOutcome::Failed { error } => {
            println!("Failed to stop instance '{}': {}", report.name, error);
        }
    }
}

/// Stop exits 0 when something was actually stopped, 1 when there was
/// nothing to do, and the termination failure code when any attempt failed.
fn stop_exit_code(reports: &[StopReport]) -> i32 {
    if reports
        .iter()
        .any(|r| matches!(r.outcome, StopOutcome::Failed { .. }))
    {
        return ErrorKind::TerminationTimedOut.code() as i32;
    }
    if reports
        .iter()
        .any(|r| matches!(r.outcome, StopOutcome::Stopped { .. }))
    {
        0
    } else {
        EXIT_NOTHING_TO_DO
    }
}

fn print_table(reports: &[InstanceReport], with_health: bool) {
    if reports.is_empty() {
        println!("No instances registered.");
        return;
    }

    let name_width = reports
        .iter()
        .map(|r| r.name.len())
        .max()
        .unwrap_or(0)
        .max("NAME".len());

    if with_health {
        println!(
            "{:<name_width$}  {:<8}  {:<5}  {:<8}  {:<12}  {:<20}  MT5 PATH",
            "NAME", "STATE", "PORT", "PID", "HEALTH", "STARTED"
        );
    } else {
        println!(
            "{:<name_width$}  {:<8}  {:<5}  {:<8}  {:<20}  MT5 PATH",
            "NAME", "STATE", "PORT", "PID", "STARTED"
        );
    }

    for report in reports {
        let pid = report
            .pid
            .map_or_else(|| "-".to_string(), |p| p.to_string());
        let started = report.started_at.map_or_else(
            || "-".to_string(),
            |t| t.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        if with_health {
            let health = report
                .health
                .map_or_else(|| "-".to_string(), |h| h.to_string());
            println!(
                "{:<name_width$}  {:<8}  {:<5}  {:<8}  {:<12}  {:<20}  {}",
                report.name,
                report.state,
                report.port,
                pid,
                health,
                started,
                report.mt5_path.display()
            );
        } else {
            println!(
                "{:<name_width$}  {:<8}  {:<5}  {:<8}  {:<20}  {}",
                report.name,
                report.state,
                report.port,
                pid,
                started,
                report.mt5_path.display()
            );
        }
    }
}
