//! Instance creation, removal, and read-only reporting.

use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use log::{info, warn};

use super::types::{CreateOutcome, HealthStatus, InstanceReport, RemoveOutcome};
use crate::config::{write_instance_config, Settings};
use crate::error::{LauncherError, Result};
use crate::paths::{
    instance_config_path, instance_log_path, instance_pid_path, validate_instance_name,
};
use crate::ports;
use crate::process::{check_health, health_client, terminate};
use crate::registry::{Instance, InstanceState, Registry, RegistryStore};

/// Validate, allocate a port, write the config record, and insert the new
/// entry. Shared by `create` and the implicit create inside `start`. Port
/// allocation runs before any file is written, so a rejected request leaves
/// no trace.
pub(super) fn register_instance(
    registry: &mut Registry,
    settings: &Settings,
    instances_dir: &Path,
    name: &str,
    mt5_path: Option<&Path>,
    port: Option<u16>,
    config_base: Option<&Path>,
) -> Result<Instance> {
    validate_instance_name(name)?;
    if registry.contains(name) {
        return Err(LauncherError::duplicate_instance(name));
    }
    let mt5_path = mt5_path.ok_or_else(LauncherError::missing_mt5_path)?;
    if !mt5_path.exists() {
        return Err(LauncherError::mt5_path_not_found(mt5_path));
    }

    let port = ports::allocate(port, &registry.claimed_ports(), settings.port_range())?;
    let config_path = instance_config_path(instances_dir, name);
    write_instance_config(&config_path, config_base, name, port, mt5_path)?;

    let instance = Instance {
        name: name.to_string(),
        port,
        mt5_path: mt5_path.to_path_buf(),
        config_path,
        log_path: instance_log_path(instances_dir, name),
        pid_file: instance_pid_path(instances_dir, name),
        state: InstanceState::Created,
        pid: None,
        created_at: Utc::now(),
        started_at: None,
    };
    registry.insert(instance.clone());
    Ok(instance)
}

/// Register a new instance without starting it.
pub fn create_instance(
    store: &RegistryStore,
    settings: &Settings,
    name: &str,
    mt5_path: Option<&Path>,
    port: Option<u16>,
    config_base: Option<&Path>,
) -> Result<CreateOutcome> {
    store.with_lock(|registry| {
        let instance = register_instance(
            registry,
            settings,
            store.instances_dir(),
            name,
            mt5_path,
            port,
            config_base,
        )?;
        info!(
            "created instance '{}' on port {}",
            instance.name, instance.port
        );
        Ok(CreateOutcome {
            name: instance.name,
            port: instance.port,
            config_path: instance.config_path,
        })
    })
}

/// Delete an instance: its registry entry plus the config, log, and pid
/// files. A running instance is rejected unless `force` is set, in which
/// case it is terminated first.
pub async fn remove_instance(
    store: &RegistryStore,
    settings: &Settings,
    name: &str,
    force: bool,
) -> Result<RemoveOutcome> {
    let _guard = store.lock()?;
    let mut registry = store.load()?;
    registry.reconcile();

    let (running, pid) = match registry.get(name) {
        Some(instance) => (instance.is_running(), instance.pid),
        None => return Err(LauncherError::unknown_instance(name)),
    };

    let mut stopped = false;
    if running {
        if !force {
            return Err(LauncherError::instance_running(name));
        }
        if let Some(pid) = pid {
            let owned = name.to_string();
            let timeout = Duration::from_secs(settings.shutdown_timeout_secs);
            tokio::task::spawn_blocking(move || terminate(&owned, pid, timeout))
                .await
                .map_err(|e| LauncherError::io(format!("Termination task failed: {}", e)))??;
            stopped = true;
        }
    }

    let Some(instance) = registry.remove(name) else {
        return Err(LauncherError::unknown_instance(name));
    };
    store.save(&registry)?;

    for path in [
        &instance.config_path,
        &instance.log_path,
        &instance.pid_file,
    ] {
        remove_file_quietly(path);
    }

    info!("removed instance '{}'", name);
    Ok(RemoveOutcome {
        name: instance.name,
        stopped,
    })
}

fn remove_file_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

/// List every registered instance. Liveness is reconciled (and any repairs
/// persisted), but health endpoints are not probed; that is `status`'s job.
pub fn list_instances(store: &RegistryStore) -> Result<Vec<InstanceReport>> {
    store.with_lock(|registry| Ok(registry.iter().map(InstanceReport::from_instance).collect()))
}

/// Report all instances, or one, probing the health endpoint of each
/// running instance. The registry lock is released before the probes run;
/// they are slow network I/O and touch no shared state.
pub async fn status_instances(
    store: &RegistryStore,
    name: Option<&str>,
) -> Result<Vec<InstanceReport>> {
    let reports = {
        let _guard = store.lock()?;
        let mut registry = store.load()?;
        registry.reconcile();
        store.save(&registry)?;

        if let Some(name) = name {
            if !registry.contains(name) {
                return Err(LauncherError::unknown_instance(name));
            }
        }
        registry
            .iter()
            .filter(|instance| name.is_none_or(|n| instance.name == n))
            .map(InstanceReport::from_instance)
            .collect::<Vec<_>>()
    };

    let client = health_client()?;
    let mut annotated = Vec::with_capacity(reports.len());
    for mut report in reports {
        if report.state == InstanceState::Running {
            report.health = Some(if check_health(&client, report.port).await {
                HealthStatus::Ok
            } else {
                HealthStatus::Unreachable
            });
        }
        annotated.push(report);
    }
    Ok(annotated)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::{Read as _, Write as _};
    use std::net::TcpListener;
    use std::path::{Path, PathBuf};

    use chrono::Utc;
    use tempfile::TempDir;

    use super::{create_instance, list_instances, remove_instance, status_instances};
    use crate::config::Settings;
    use crate::error::ErrorKind;
    use crate::instance::types::HealthStatus;
    use crate::paths::{instance_config_path, instance_log_path, instance_pid_path};
    use crate::registry::{Instance, InstanceState, RegistryStore};

    fn test_settings(port_base: u16, port_max: u16) -> Settings {
        Settings {
            port_base,
            port_max,
            ..Settings::default()
        }
    }

    fn touch_mt5(dir: &Path) -> PathBuf {
        let path = dir.join("terminal64.exe");
        fs::write(&path, "stub").unwrap();
        path
    }

    fn seed_running(store: &RegistryStore, name: &str, port: u16, pid: u32) {
        let dir = store.instances_dir().to_path_buf();
        store
            .with_lock(|registry| {
                registry.insert(Instance {
                    name: name.to_string(),
                    port,
                    mt5_path: dir.join("mt5"),
                    config_path: instance_config_path(&dir, name),
                    log_path: instance_log_path(&dir, name),
                    pid_file: instance_pid_path(&dir, name),
                    state: InstanceState::Running,
                    pid: Some(pid),
                    created_at: Utc::now(),
                    started_at: Some(Utc::now()),
                });
                Ok(())
            })
            .unwrap();
    }

    /// Minimal HTTP responder for the health probe.
    fn spawn_health_stub() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
                let body = r#"{"message":"Service is healthy"}"#;
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });
        port
    }

    fn free_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn create_registers_instance_and_writes_config() {
        let dir = TempDir::new().unwrap();
        let store = RegistryStore::new(dir.path());
        let mt5 = touch_mt5(dir.path());

        let outcome = create_instance(
            &store,
            &test_settings(48500, 48509),
            "demo",
            Some(&mt5),
            None,
            None,
        )
        .unwrap();
        assert!((48500..=48509).contains(&outcome.port));
        assert!(outcome.config_path.exists());

        let registry = store.load().unwrap();
        let instance = registry.get("demo").unwrap();
        assert_eq!(instance.state, InstanceState::Created);
        assert_eq!(instance.port, outcome.port);
        assert_eq!(instance.pid, None);
    }

    #[test]
    fn duplicate_create_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = RegistryStore::new(dir.path());
        let settings = test_settings(48510, 48519);
        let mt5 = touch_mt5(dir.path());

        create_instance(&store, &settings, "demo", Some(&mt5), None, None).unwrap();
        let err = create_instance(&store, &settings, "demo", Some(&mt5), None, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateInstance);
        assert_eq!(store.load().unwrap().len(), 1);
    }

    #[test]
    fn create_requires_existing_mt5_path() {
        let dir = TempDir::new().unwrap();
        let store = RegistryStore::new(dir.path());
        let settings = test_settings(48520, 48529);

        let err = create_instance(&store, &settings, "demo", None, None, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingMt5Path);

        let missing = dir.path().join("nope.exe");
        let err =
            create_instance(&store, &settings, "demo", Some(&missing), None, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingMt5Path);
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn create_rejects_unsafe_names() {
        let dir = TempDir::new().unwrap();
        let store = RegistryStore::new(dir.path());
        let mt5 = touch_mt5(dir.path());

        let err = create_instance(
            &store,
            &test_settings(48530, 48539),
            "../escape",
            Some(&mt5),
            None,
            None,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInstanceName);
    }

    #[test]
    fn claimed_port_is_rejected_without_side_effects() {
        let dir = TempDir::new().unwrap();
        let store = RegistryStore::new(dir.path());
        let settings = test_settings(48540, 48549);
        let mt5 = touch_mt5(dir.path());

        create_instance(&store, &settings, "first", Some(&mt5), Some(48541), None).unwrap();
        let err = create_instance(&store, &settings, "second", Some(&mt5), Some(48541), None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PortUnavailable);

        let registry = store.load().unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get("second").is_none());
        assert!(!instance_config_path(dir.path(), "second").exists());
    }

    #[tokio::test]
    async fn remove_unknown_instance_fails() {
        let dir = TempDir::new().unwrap();
        let store = RegistryStore::new(dir.path());
        let err = remove_instance(&store, &Settings::default(), "ghost", false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownInstance);
    }

    #[tokio::test]
    async fn remove_deletes_entry_and_files() {
        let dir = TempDir::new().unwrap();
        let store = RegistryStore::new(dir.path());
        let settings = test_settings(48550, 48559);
        let mt5 = touch_mt5(dir.path());

        let outcome = create_instance(&store, &settings, "demo", Some(&mt5), None, None).unwrap();
        fs::write(instance_log_path(dir.path(), "demo"), "log line\n").unwrap();

        let removed = remove_instance(&store, &settings, "demo", false)
            .await
            .unwrap();
        assert_eq!(removed.name, "demo");
        assert!(!removed.stopped);

        assert!(store.load().unwrap().is_empty());
        assert!(!outcome.config_path.exists());
        assert!(!instance_log_path(dir.path(), "demo").exists());
        assert!(!instance_pid_path(dir.path(), "demo").exists());
    }

    #[tokio::test]
    async fn remove_running_instance_without_force_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = RegistryStore::new(dir.path());
        seed_running(&store, "busy", free_port(), std::process::id());

        let err = remove_instance(&store, &Settings::default(), "busy", false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InstanceRunning);
        assert!(store.load().unwrap().contains("busy"));
    }

    #[test]
    fn list_reports_empty_registry() {
        let dir = TempDir::new().unwrap();
        let store = RegistryStore::new(dir.path());
        assert!(list_instances(&store).unwrap().is_empty());
    }

    #[test]
    fn list_reports_instances_without_probing() {
        let dir = TempDir::new().unwrap();
        let store = RegistryStore::new(dir.path());
        let mt5 = touch_mt5(dir.path());

        create_instance(
            &store,
            &test_settings(48560, 48569),
            "demo",
            Some(&mt5),
            None,
            None,
        )
        .unwrap();

        let reports = list_instances(&store).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].name, "demo");
        assert_eq!(reports[0].state, InstanceState::Created);
        assert_eq!(reports[0].health, None);
    }

    #[tokio::test]
    async fn status_unknown_name_fails() {
        let dir = TempDir::new().unwrap();
        let store = RegistryStore::new(dir.path());
        let err = status_instances(&store, Some("ghost")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownInstance);
    }

    #[tokio::test]
    async fn status_marks_dead_endpoint_unreachable() {
        let dir = TempDir::new().unwrap();
        let store = RegistryStore::new(dir.path());
        seed_running(&store, "mute", free_port(), std::process::id());

        let reports = status_instances(&store, Some("mute")).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].state, InstanceState::Running);
        assert_eq!(reports[0].health, Some(HealthStatus::Unreachable));
    }

    #[tokio::test]
    async fn status_marks_answering_endpoint_healthy() {
        let dir = TempDir::new().unwrap();
        let store = RegistryStore::new(dir.path());
        let port = spawn_health_stub();
        seed_running(&store, "live", port, std::process::id());

        let reports = status_instances(&store, None).await.unwrap();
        assert_eq!(reports[0].health, Some(HealthStatus::Ok));
    }

    #[tokio::test]
    async fn status_persists_crash_detection() {
        let dir = TempDir::new().unwrap();
        let store = RegistryStore::new(dir.path());
        // Far above any real pid range, so the process is certainly gone.
        seed_running(&store, "gone", free_port(), i32::MAX as u32);

        let reports = status_instances(&store, None).await.unwrap();
        assert_eq!(reports[0].state, InstanceState::Crashed);
        assert_eq!(reports[0].pid, None);
        assert_eq!(reports[0].health, None);

        let reloaded = store.load().unwrap();
        assert_eq!(reloaded.get("gone").unwrap().state, InstanceState::Crashed);
    }
}
