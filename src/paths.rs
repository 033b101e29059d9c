//! Path layout for the launcher's on-disk state.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{LauncherError, Result};

/// Default instances directory (~/.metaapi-launcher/instances).
#[allow(clippy::expect_used)]
pub fn default_instances_dir() -> PathBuf {
    let home = dirs::home_dir().expect("Cannot find home directory");
    home.join(".metaapi-launcher").join("instances")
}

/// Path of the registry record inside the instances directory.
pub fn registry_path(instances_dir: &Path) -> PathBuf {
    instances_dir.join("registry.json")
}

/// Path of the advisory lock file guarding the registry.
pub fn registry_lock_path(instances_dir: &Path) -> PathBuf {
    instances_dir.join("registry.lock")
}

/// Path of the launcher settings file.
pub fn settings_path(instances_dir: &Path) -> PathBuf {
    instances_dir.join("launcher.toml")
}

/// Config record for one instance (`<name>_config.json`).
pub fn instance_config_path(instances_dir: &Path, name: &str) -> PathBuf {
    instances_dir.join(format!("{}_config.json", name))
}

/// Log file for one instance (`<name>.log`).
pub fn instance_log_path(instances_dir: &Path, name: &str) -> PathBuf {
    instances_dir.join(format!("{}.log", name))
}

/// Pid file for one instance (`<name>.pid`).
pub fn instance_pid_path(instances_dir: &Path, name: &str) -> PathBuf {
    instances_dir.join(format!("{}.pid", name))
}

/// Ensure the instances directory exists.
pub fn ensure_instances_dir(instances_dir: &Path) -> Result<()> {
    fs::create_dir_all(instances_dir)
        .map_err(|e| LauncherError::io(format!("Failed to create instances dir: {}", e)))?;
    Ok(())
}

/// Instance names are embedded in file names, so only a conservative
/// character set is accepted.
pub fn validate_instance_name(name: &str) -> Result<()> {
    let is_safe = !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'));

    if !is_safe {
        return Err(LauncherError::invalid_instance_name(name));
    }

    Ok(())
}
