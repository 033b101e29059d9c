//! Instance-facing report and outcome types.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::registry::{Instance, InstanceState};

/// Reachability of a running instance's health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    Unreachable,
    Unknown,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::Unreachable => "unreachable",
            Self::Unknown => "unknown",
        };
        f.pad(s)
    }
}

/// One row of `list`/`status` output. `health` stays empty unless the
/// command probed the instance.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceReport {
    pub name: String,
    pub port: u16,
    pub state: InstanceState,
    pub pid: Option<u32>,
    pub mt5_path: PathBuf,
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthStatus>,
}

impl InstanceReport {
    pub(crate) fn from_instance(instance: &Instance) -> Self {
        Self {
            name: instance.name.clone(),
            port: instance.port,
            state: instance.state,
            pid: instance.pid,
            mt5_path: instance.mt5_path.clone(),
            started_at: instance.started_at,
            health: None,
        }
    }
}

/// Result of `create`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateOutcome {
    pub name: String,
    pub port: u16,
    pub config_path: PathBuf,
}

/// Result of `start`.
#[derive(Debug, Clone, Serialize)]
pub struct StartOutcome {
    pub name: String,
    pub port: u16,
    pub pid: u32,
    /// True when the instance was already running and no process was
    /// spawned.
    pub already_running: bool,
    pub health: HealthStatus,
}

/// Per-instance result of `stop`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum StopOutcome {
    /// A live process was terminated.
    Stopped { forced: bool },
    /// The instance existed but had no live process.
    NotRunning,
    /// No instance with this name is registered.
    Unknown,
    /// Termination failed; only reported by `stop --all`, which keeps
    /// going past individual failures.
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct StopReport {
    pub name: String,
    pub outcome: StopOutcome,
}

/// Result of `remove`.
#[derive(Debug, Clone, Serialize)]
pub struct RemoveOutcome {
    pub name: String,
    /// True when a running instance was stopped first (`--force`).
    pub stopped: bool,
}
