//! Spawning the instance server process.

use std::fs::{self, File};
use std::path::Path;
use std::process::Stdio;

use log::info;
use tokio::process::{Child, Command};

use crate::error::{LauncherError, Result};
use crate::registry::Instance;

/// A freshly spawned server. The child handle is only watched during the
/// startup probe window; the process keeps running when the handle drops.
#[derive(Debug)]
pub struct SpawnedServer {
    pub pid: u32,
    pub child: Child,
}

/// Launch the server process for an instance: argv and environment per the
/// server contract, stdout/stderr into the instance log (truncated on each
/// start), pid recorded in the pid file before returning.
pub fn spawn_server(instance: &Instance, server_bin: &Path) -> Result<SpawnedServer> {
    let log_file = File::create(&instance.log_path).map_err(|e| {
        LauncherError::io(format!(
            "Failed to open log file {}: {}",
            instance.log_path.display(),
            e
        ))
    })?;
    let log_for_stderr = log_file
        .try_clone()
        .map_err(|e| LauncherError::io(format!("Failed to clone log handle: {}", e)))?;

    let mut cmd = Command::new(server_bin);
    cmd.arg("--config")
        .arg(&instance.config_path)
        .arg("--port")
        .arg(instance.port.to_string())
        .env("METAAPI_CONFIG_FILE", &instance.config_path)
        .env("METAAPI_INSTANCE_NAME", &instance.name)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log_file))
        .stderr(Stdio::from(log_for_stderr));

    #[cfg(target_os = "windows")]
    {
        use windows::Win32::System::Threading::CREATE_NO_WINDOW;
        cmd.creation_flags(CREATE_NO_WINDOW.0);
    }

    #[cfg(unix)]
    {
        // Own process group, so termination can signal the whole tree
        // without touching the launcher's group.
        cmd.process_group(0);
    }

    let child = cmd.spawn().map_err(|e| {
        LauncherError::process_spawn_failed(format!(
            "Failed to start {}: {}",
            server_bin.display(),
            e
        ))
    })?;

    let pid = child
        .id()
        .ok_or_else(|| LauncherError::process_spawn_failed("Failed to get process ID"))?;

    if let Err(e) = fs::write(&instance.pid_file, pid.to_string()) {
        // A process without a pid record would leak untracked.
        let _ = super::force_kill(pid);
        return Err(LauncherError::io(format!(
            "Failed to write pid file {}: {}",
            instance.pid_file.display(),
            e
        )));
    }

    info!(
        "spawned instance '{}' (pid {}, port {})",
        instance.name, pid, instance.port
    );

    Ok(SpawnedServer { pid, child })
}
