//! Launcher settings and per-instance server config records.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{LauncherError, Result};
use crate::paths::{ensure_instances_dir, settings_path};
use crate::ports::PortRange;

/// Launcher-level settings, stored as `launcher.toml` in the instances
/// directory. A missing file means defaults, which are written back out so
/// the knobs are discoverable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Executable spawned for each instance.
    #[serde(default = "default_server_bin")]
    pub server_bin: PathBuf,
    /// Lowest port the allocator hands out.
    #[serde(default = "default_port_base")]
    pub port_base: u16,
    /// Highest port the allocator hands out.
    #[serde(default = "default_port_max")]
    pub port_max: u16,
    /// How long `start` waits for the health endpoint before reporting a
    /// startup timeout.
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,
    /// Interval between health probes during startup.
    #[serde(default = "default_health_poll_interval_ms")]
    pub health_poll_interval_ms: u64,
    /// Grace period between the stop signal and the forceful kill.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_server_bin() -> PathBuf {
    PathBuf::from("metaapi-server")
}

fn default_port_base() -> u16 {
    8087
}

fn default_port_max() -> u16 {
    9999
}

fn default_startup_timeout_secs() -> u64 {
    120
}

fn default_health_poll_interval_ms() -> u64 {
    500
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bin: default_server_bin(),
            port_base: default_port_base(),
            port_max: default_port_max(),
            startup_timeout_secs: default_startup_timeout_secs(),
            health_poll_interval_ms: default_health_poll_interval_ms(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl Settings {
    /// Load settings from the instances directory, writing defaults on
    /// first use.
    pub fn load(instances_dir: &Path) -> Result<Self> {
        let path = settings_path(instances_dir);
        if !path.exists() {
            let settings = Self::default();
            settings.save(instances_dir)?;
            return Ok(settings);
        }
        let content =
            fs::read_to_string(&path).map_err(|e| LauncherError::config(e.to_string()))?;
        toml::from_str(&content).map_err(|e| LauncherError::config(e.to_string()))
    }

    pub fn save(&self, instances_dir: &Path) -> Result<()> {
        ensure_instances_dir(instances_dir)?;
        let content =
            toml::to_string_pretty(self).map_err(|e| LauncherError::config(e.to_string()))?;
        fs::write(settings_path(instances_dir), content)
            .map_err(|e| LauncherError::config(e.to_string()))
    }

    pub fn port_range(&self) -> PortRange {
        PortRange::new(self.port_base, self.port_max)
    }
}

/// Default server config generated for a new instance. The launcher treats
/// the record as opaque apart from `port` and `mt5_path`; the remaining keys
/// are the server's own concern.
fn default_server_config(name: &str, port: u16, mt5_path: &Path) -> Value {
    json!({
        "instance_name": name,
        "secret_key": format!("MetaApi_{}_key", name),
        "telegram_bot_token": "YOUR_TELEGRAM_BOT_TOKEN",
        "telegram_chat_id": 0,
        "debug": false,
        "host": "0.0.0.0",
        "port": port,
        "mt5_path": mt5_path.display().to_string(),
        "rate_limit_per_minute": 300,
        "request_timeout": 30,
        "log_level": "INFO",
        "features": {
            "rate_limiting": true,
            "request_logging": true,
            "metrics_collection": true,
            "input_validation": true,
            "middleware": true
        }
    })
}

/// Write the config record for a new instance. With a base file the content
/// is copied as parsed JSON and only `port` and `mt5_path` are overwritten;
/// without one a default template is generated.
pub fn write_instance_config(
    target: &Path,
    base: Option<&Path>,
    name: &str,
    port: u16,
    mt5_path: &Path,
) -> Result<()> {
    let config = match base {
        Some(base_path) => {
            let content = fs::read_to_string(base_path).map_err(|e| {
                LauncherError::config(format!(
                    "Failed to read base config {}: {}",
                    base_path.display(),
                    e
                ))
            })?;
            let mut value: Value = serde_json::from_str(&content).map_err(|e| {
                LauncherError::config(format!(
                    "Base config {} is not valid JSON: {}",
                    base_path.display(),
                    e
                ))
            })?;
            let obj = value.as_object_mut().ok_or_else(|| {
                LauncherError::config(format!(
                    "Base config {} is not a JSON object",
                    base_path.display()
                ))
            })?;
            obj.insert("port".to_string(), json!(port));
            obj.insert(
                "mt5_path".to_string(),
                json!(mt5_path.display().to_string()),
            );
            value
        }
        None => default_server_config(name, port, mt5_path),
    };

    let content = serde_json::to_string_pretty(&config)?;
    fs::write(target, content)
        .map_err(|e| LauncherError::io(format!("Failed to write config record: {}", e)))?;
    Ok(())
}
