//! Process supervision for instance servers.

mod control;
mod health;
mod supervisor;

#[cfg(target_os = "windows")]
pub(crate) mod win_api;

use std::time::Duration;

pub use control::{force_kill, is_process_alive, terminate, TerminateOutcome};
pub use health::{await_ready, check_health, health_client, StartupProbe};
pub use supervisor::{spawn_server, SpawnedServer};

/// Poll interval while waiting for a signaled process to exit.
const TERMINATE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// How long a force kill may take to show up in the OS before the
/// termination is reported as failed.
const KILL_CONFIRM_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for one health probe request.
const HEALTH_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);
