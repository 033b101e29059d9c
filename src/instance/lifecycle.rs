//! Instance start/stop orchestration.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use log::{info, warn};

use super::crud::register_instance;
use super::types::{HealthStatus, StartOutcome, StopOutcome, StopReport};
use crate::config::Settings;
use crate::error::{LauncherError, Result};
use crate::ports::check_port_available;
use crate::process::{
    await_ready, health_client, spawn_server, terminate, StartupProbe, TerminateOutcome,
};
use crate::registry::{remove_pid_file, Instance, InstanceState, Registry, RegistryStore};

/// Start an instance, creating it first when the name is unknown.
///
/// On an instance that is already running this is a no-op returning the
/// existing pid. The record is persisted as running before the startup
/// probe, so a launcher killed mid-probe leaves a trace reconciliation can
/// repair. A startup timeout is reported as an error, but the process is
/// left running and the record stays `running`; the server may still become
/// healthy later.
pub async fn start_instance(
    store: &RegistryStore,
    settings: &Settings,
    name: &str,
    mt5_path: Option<&Path>,
    port: Option<u16>,
    config_base: Option<&Path>,
) -> Result<StartOutcome> {
    let _guard = store.lock()?;
    let mut registry = store.load()?;
    registry.reconcile();

    if !registry.contains(name) {
        register_instance(
            &mut registry,
            settings,
            store.instances_dir(),
            name,
            mt5_path,
            port,
            config_base,
        )?;
        store.save(&registry)?;
        info!("instance '{}' created implicitly by start", name);
    }

    let Some(instance) = registry.get_mut(name) else {
        return Err(LauncherError::unknown_instance(name));
    };

    // Reconciliation has verified liveness, so running implies a live pid.
    if instance.is_running() {
        if let Some(pid) = instance.pid {
            info!("instance '{}' already running (pid {})", name, pid);
            let outcome = StartOutcome {
                name: name.to_string(),
                port: instance.port,
                pid,
                already_running: true,
                health: HealthStatus::Unknown,
            };
            store.save(&registry)?;
            return Ok(outcome);
        }
    }

    warn_ignored_overrides(instance, mt5_path, port);
    check_port_available(instance.port)?;

    let spawned = spawn_server(instance, &settings.server_bin)?;
    let pid = spawned.pid;
    let mut child = spawned.child;

    instance.state = InstanceState::Running;
    instance.pid = Some(pid);
    instance.started_at = Some(Utc::now());
    let instance_port = instance.port;
    let pid_file = instance.pid_file.clone();
    let log_path = instance.log_path.clone();

    // Persist before probing; the probe can outlive this invocation's
    // patience but never its bookkeeping.
    store.save(&registry)?;

    let client = health_client()?;
    let probe = await_ready(
        &client,
        &mut child,
        instance_port,
        Duration::from_secs(settings.startup_timeout_secs),
        Duration::from_millis(settings.health_poll_interval_ms),
    )
    .await?;

    match probe {
        StartupProbe::Ready => {
            info!("instance '{}' is healthy on port {}", name, instance_port);
            Ok(StartOutcome {
                name: name.to_string(),
                port: instance_port,
                pid,
                already_running: false,
                health: HealthStatus::Ok,
            })
        }
        StartupProbe::TimedOut => Err(LauncherError::startup_timeout(
            name,
            settings.startup_timeout_secs,
        )),
        StartupProbe::Exited(status) => {
            if let Some(instance) = registry.get_mut(name) {
                instance.state = InstanceState::Crashed;
                instance.pid = None;
                instance.started_at = None;
            }
            remove_pid_file(&pid_file);
            store.save(&registry)?;
            Err(LauncherError::process_spawn_failed(format!(
                "instance '{}' exited during startup ({}); see {}",
                name,
                status,
                log_path.display()
            )))
        }
    }
}

/// `start` never rewrites an existing record from its flags; differing
/// values are ignored with a warning.
fn warn_ignored_overrides(instance: &Instance, mt5_path: Option<&Path>, port: Option<u16>) {
    if let Some(requested) = port {
        if requested != instance.port {
            warn!(
                "instance '{}' is registered on port {}; ignoring --port {}",
                instance.name, instance.port, requested
            );
        }
    }
    if let Some(requested) = mt5_path {
        if requested != instance.mt5_path {
            warn!(
                "instance '{}' keeps MT5 path {}; ignoring {}",
                instance.name,
                instance.mt5_path.display(),
                requested.display()
            );
        }
    }
}

/// Terminate one instance's process if it has one, then normalize the
/// record to stopped with no pid. A termination failure leaves the record
/// untouched; it still describes a live process.
async fn stop_one(
    registry: &mut Registry,
    settings: &Settings,
    name: &str,
) -> Result<StopOutcome> {
    let live_pid = match registry.get(name) {
        Some(instance) if instance.is_running() => instance.pid,
        Some(_) => None,
        None => return Ok(StopOutcome::Unknown),
    };

    let outcome = if let Some(pid) = live_pid {
        let owned = name.to_string();
        let timeout = Duration::from_secs(settings.shutdown_timeout_secs);
        let way = tokio::task::spawn_blocking(move || terminate(&owned, pid, timeout))
            .await
            .map_err(|e| LauncherError::io(format!("Termination task failed: {}", e)))??;
        info!("stopped instance '{}' (pid {})", name, pid);
        StopOutcome::Stopped {
            forced: way == TerminateOutcome::Forced,
        }
    } else {
        StopOutcome::NotRunning
    };

    if let Some(instance) = registry.get_mut(name) {
        instance.state = InstanceState::Stopped;
        instance.pid = None;
        instance.started_at = None;
        remove_pid_file(&instance.pid_file);
    }
    Ok(outcome)
}

/// Stop one instance. Unknown names and instances without a live process
/// are no-ops reported in the outcome, not errors.
pub async fn stop_instance(
    store: &RegistryStore,
    settings: &Settings,
    name: &str,
) -> Result<StopReport> {
    let _guard = store.lock()?;
    let mut registry = store.load()?;
    registry.reconcile();

    let result = stop_one(&mut registry, settings, name).await;
    store.save(&registry)?;
    Ok(StopReport {
        name: name.to_string(),
        outcome: result?,
    })
}

/// Stop every running instance in name order, best effort: a failure is
/// recorded in that instance's outcome and the rest are still attempted.
pub async fn stop_all_instances(
    store: &RegistryStore,
    settings: &Settings,
) -> Result<Vec<StopReport>> {
    let _guard = store.lock()?;
    let mut registry = store.load()?;
    registry.reconcile();

    let running: Vec<String> = registry
        .iter()
        .filter(|instance| instance.is_running())
        .map(|instance| instance.name.clone())
        .collect();

    let mut reports = Vec::with_capacity(running.len());
    for name in running {
        let outcome = match stop_one(&mut registry, settings, &name).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("failed to stop instance '{}': {}", name, e);
                StopOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };
        reports.push(StopReport { name, outcome });
    }

    store.save(&registry)?;
    Ok(reports)
}
