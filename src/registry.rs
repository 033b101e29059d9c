//! Durable instance registry with advisory file locking.
//!
//! The registry is a JSON file mapping instance names to records. Every
//! command runs one read-modify-write cycle against it under an exclusive
//! file lock, so concurrent launcher invocations never race on port
//! allocation or state transitions. Reads reconcile the declared state
//! against live OS processes before the caller sees the data.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{LauncherError, Result};
use crate::paths::{ensure_instances_dir, registry_lock_path, registry_path};
use crate::process::is_process_alive;

/// Lifecycle stage the launcher last believed to be true. Removal deletes
/// the record outright, so it has no persisted variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Created,
    Running,
    Stopped,
    Crashed,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Crashed => "crashed",
        };
        f.pad(s)
    }
}

/// One managed copy of the server process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub name: String,
    pub port: u16,
    pub mt5_path: PathBuf,
    pub config_path: PathBuf,
    pub log_path: PathBuf,
    pub pid_file: PathBuf,
    pub state: InstanceState,
    #[serde(default)]
    pub pid: Option<u32>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

impl Instance {
    pub fn is_running(&self) -> bool {
        self.state == InstanceState::Running
    }
}

/// A running record whose process turned out to be dead.
#[derive(Debug, Clone, Serialize)]
pub struct CrashEvent {
    pub name: String,
    pub pid: Option<u32>,
}

/// All registered instances, keyed by name. Serialized as a plain
/// name-to-record object; the map keeps iteration order deterministic.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Registry {
    instances: BTreeMap<String, Instance>,
}

impl Registry {
    pub fn get(&self, name: &str) -> Option<&Instance> {
        self.instances.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Instance> {
        self.instances.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.instances.contains_key(name)
    }

    pub fn insert(&mut self, instance: Instance) {
        self.instances.insert(instance.name.clone(), instance);
    }

    pub fn remove(&mut self, name: &str) -> Option<Instance> {
        self.instances.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instance> {
        self.instances.values()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Ports already promised to registered instances.
    pub fn claimed_ports(&self) -> BTreeSet<u16> {
        self.instances.values().map(|i| i.port).collect()
    }

    /// Reconcile declared state against live OS processes. Running records
    /// whose process is gone become crashed; records whose pid file names a
    /// live process from an interrupted invocation are adopted back to
    /// running; stale pid files are deleted. Returns the detected crashes.
    pub fn reconcile(&mut self) -> Vec<CrashEvent> {
        let mut crashes = Vec::new();
        for instance in self.instances.values_mut() {
            reconcile_instance(instance, &mut crashes);
        }
        crashes
    }
}

fn reconcile_instance(instance: &mut Instance, crashes: &mut Vec<CrashEvent>) {
    let file_pid = read_pid_file(&instance.pid_file);

    if instance.state == InstanceState::Running {
        // The pid file is written by the spawning invocation before the
        // registry, so on mismatch it is the fresher of the two.
        if let Some(fp) = file_pid {
            if instance.pid != Some(fp) {
                warn!(
                    "instance '{}': pid file says {}, registry says {:?}; adopting pid file",
                    instance.name, fp, instance.pid
                );
                instance.pid = Some(fp);
            }
        }
        if !instance.pid.is_some_and(is_process_alive) {
            let last_pid = instance.pid.take();
            instance.state = InstanceState::Crashed;
            instance.started_at = None;
            remove_pid_file(&instance.pid_file);
            match last_pid {
                Some(pid) => warn!(
                    "instance '{}' crashed: process {} is no longer alive",
                    instance.name, pid
                ),
                None => warn!(
                    "instance '{}' was marked running without a pid; marking crashed",
                    instance.name
                ),
            }
            crashes.push(CrashEvent {
                name: instance.name.clone(),
                pid: last_pid,
            });
        }
    } else if let Some(fp) = file_pid {
        if is_process_alive(fp) {
            warn!(
                "instance '{}': found live process {} left by an interrupted start; marking running",
                instance.name, fp
            );
            instance.state = InstanceState::Running;
            instance.pid = Some(fp);
        } else {
            warn!(
                "instance '{}': removing stale pid file {}",
                instance.name,
                instance.pid_file.display()
            );
            instance.pid = None;
            remove_pid_file(&instance.pid_file);
        }
    } else {
        instance.pid = None;
    }
}

/// Read a pid file, returning None when missing or unparsable.
pub fn read_pid_file(path: &Path) -> Option<u32> {
    let content = fs::read_to_string(path).ok()?;
    content.trim().parse().ok()
}

/// Delete a pid file; a missing file is fine.
pub(crate) fn remove_pid_file(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove pid file {}: {}", path.display(), e);
        }
    }
}

/// Handle to the on-disk registry. Constructed per invocation from the
/// instances directory and passed into every command handler.
#[derive(Debug, Clone)]
pub struct RegistryStore {
    instances_dir: PathBuf,
}

/// Exclusive advisory lock over the registry. Dropping the guard closes the
/// lock file, which releases the lock.
#[derive(Debug)]
pub struct RegistryGuard {
    _lock_file: File,
}

impl RegistryStore {
    pub fn new(instances_dir: impl Into<PathBuf>) -> Self {
        Self {
            instances_dir: instances_dir.into(),
        }
    }

    pub fn instances_dir(&self) -> &Path {
        &self.instances_dir
    }

    /// Block until this invocation holds the exclusive registry lock.
    pub fn lock(&self) -> Result<RegistryGuard> {
        ensure_instances_dir(&self.instances_dir)?;
        let path = registry_lock_path(&self.instances_dir);
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| {
                LauncherError::io(format!(
                    "Failed to open lock file {}: {}",
                    path.display(),
                    e
                ))
            })?;
        FileExt::lock_exclusive(&lock_file)
            .map_err(|e| LauncherError::io(format!("Failed to lock registry: {}", e)))?;
        Ok(RegistryGuard {
            _lock_file: lock_file,
        })
    }

    /// Load the registry; a missing file is an empty registry. A file that
    /// exists but does not parse fails the whole invocation rather than
    /// guessing a reconstruction.
    pub fn load(&self) -> Result<Registry> {
        let path = registry_path(&self.instances_dir);
        if !path.exists() {
            return Ok(Registry::default());
        }
        let content = fs::read_to_string(&path)
            .map_err(|e| LauncherError::io(format!("Failed to read registry: {}", e)))?;
        serde_json::from_str(&content)
            .map_err(|e| LauncherError::corrupt_registry(&path, e.to_string()))
    }

    /// Persist the registry atomically: write a temp file in the same
    /// directory, then rename it over the registry.
    pub fn save(&self, registry: &Registry) -> Result<()> {
        ensure_instances_dir(&self.instances_dir)?;
        let path = registry_path(&self.instances_dir);
        let tmp_path = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(registry)?;
        if let Err(e) = fs::write(&tmp_path, content) {
            let _ = fs::remove_file(&tmp_path);
            return Err(LauncherError::io(format!(
                "Failed to write registry: {}",
                e
            )));
        }
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            LauncherError::io(format!("Failed to replace registry: {}", e))
        })
    }

    /// Run one read-modify-write cycle under the exclusive lock. The
    /// registry is reconciled before `f` runs and persisted afterwards,
    /// so liveness repairs survive even read-only commands.
    pub fn with_lock<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Registry) -> Result<T>,
    {
        let _guard = self.lock()?;
        let mut registry = self.load()?;
        registry.reconcile();
        let result = f(&mut registry)?;
        self.save(&registry)?;
        Ok(result)
    }
}
