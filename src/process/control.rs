//! Platform-agnostic process control functions.

use std::time::{Duration, Instant};

use log::warn;

use super::{KILL_CONFIRM_TIMEOUT, TERMINATE_POLL_INTERVAL};
use crate::error::{LauncherError, Result};

/// Check if a process is alive by PID.
#[cfg(target_os = "windows")]
pub fn is_process_alive(pid: u32) -> bool {
    super::win_api::is_process_alive(pid)
}

/// Check if a process is alive by PID. A zombie does not count: a child
/// that exited but has not been reaped yet is not a running instance.
#[cfg(not(target_os = "windows"))]
pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), None).is_ok() && !is_zombie(pid)
}

/// The process state is the third field of /proc/<pid>/stat, after the
/// parenthesized command name.
#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) else {
        return false;
    };
    stat.rsplit_once(')')
        .is_some_and(|(_, rest)| rest.trim_start().starts_with('Z'))
}

#[cfg(all(not(target_os = "windows"), not(target_os = "linux")))]
fn is_zombie(_pid: u32) -> bool {
    false
}

/// Ask a process to shut down; `taskkill` without /F posts a close request.
#[cfg(target_os = "windows")]
fn graceful_signal(pid: u32) -> Result<()> {
    let output = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string()])
        .output()
        .map_err(|e| LauncherError::io(format!("Failed to run taskkill: {e}")))?;

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(LauncherError::io(format!(
            "taskkill failed for pid {}: {}",
            pid,
            stderr.trim()
        )))
    }
}

/// Send a graceful shutdown signal to a process.
#[cfg(not(target_os = "windows"))]
fn graceful_signal(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
        .map_err(|e| LauncherError::io(format!("Failed to send SIGTERM to PID {}: {}", pid, e)))
}

#[cfg(target_os = "windows")]
pub fn force_kill(pid: u32) -> Result<()> {
    let output = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .output()
        .map_err(|e| LauncherError::io(format!("Failed to run taskkill: {e}")))?;

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let detail = stderr.trim();
        let detail = if detail.is_empty() {
            stdout.trim()
        } else {
            detail
        };
        Err(LauncherError::io(format!(
            "taskkill failed for pid {}: {}",
            pid,
            if detail.is_empty() {
                "(no output)"
            } else {
                detail
            }
        )))
    }
}

/// Kill the whole process group the instance was spawned into, falling back
/// to the single process when the group lookup fails.
#[cfg(not(target_os = "windows"))]
pub fn force_kill(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::{getpgid, Pid};

    let target = Pid::from_raw(pid as i32);
    match getpgid(Some(target)) {
        Ok(pgid) => killpg(pgid, Signal::SIGKILL).map_err(|e| {
            LauncherError::io(format!(
                "Failed to kill process group {} (from pid {}): {}",
                pgid.as_raw(),
                pid,
                e
            ))
        }),
        Err(e) => kill(target, Signal::SIGKILL).map_err(|kill_err| {
            LauncherError::io(format!(
                "Failed to kill process {} (getpgid failed: {}): {}",
                pid, e, kill_err
            ))
        }),
    }
}

/// Outcome of a [`terminate`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// The process was already gone.
    AlreadyDead,
    /// The process exited within the grace period after the stop signal.
    Graceful,
    /// The process had to be force killed.
    Forced,
}

/// Stop a process: send the graceful signal, wait up to `timeout` for it to
/// exit, then escalate to a force kill. Blocking; async callers wrap this in
/// `spawn_blocking`. Fails with `TerminationTimedOut` only when the process
/// survives even the force kill.
pub fn terminate(name: &str, pid: u32, timeout: Duration) -> Result<TerminateOutcome> {
    if !is_process_alive(pid) {
        return Ok(TerminateOutcome::AlreadyDead);
    }

    match graceful_signal(pid) {
        Ok(()) => {
            let deadline = Instant::now() + timeout;
            while Instant::now() < deadline {
                if !is_process_alive(pid) {
                    return Ok(TerminateOutcome::Graceful);
                }
                std::thread::sleep(TERMINATE_POLL_INTERVAL);
            }
            if !is_process_alive(pid) {
                return Ok(TerminateOutcome::Graceful);
            }
            warn!(
                "process {} did not exit within {}s, force killing",
                pid,
                timeout.as_secs()
            );
        }
        Err(e) => {
            warn!("graceful signal failed for pid {}: {}, force killing", pid, e);
        }
    }

    if let Err(e) = force_kill(pid) {
        warn!("force kill failed for pid {}: {}", pid, e);
    }
    let deadline = Instant::now() + KILL_CONFIRM_TIMEOUT;
    while Instant::now() < deadline {
        if !is_process_alive(pid) {
            return Ok(TerminateOutcome::Forced);
        }
        std::thread::sleep(TERMINATE_POLL_INTERVAL);
    }
    Err(LauncherError::termination_timed_out(name, pid))
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::process::CommandExt as _;
    use std::process::Command;
    use std::time::Duration;

    use super::{is_process_alive, terminate, TerminateOutcome};

    fn spawn_in_own_group(program: &str, args: &[&str]) -> std::process::Child {
        Command::new(program)
            .args(args)
            .process_group(0)
            .spawn()
            .unwrap()
    }

    #[test]
    fn own_process_is_alive() {
        assert!(is_process_alive(std::process::id()));
    }

    #[test]
    fn nonexistent_pid_is_dead() {
        assert!(!is_process_alive(i32::MAX as u32));
    }

    #[test]
    fn terminate_on_dead_pid_reports_already_dead() {
        let outcome = terminate("ghost", i32::MAX as u32, Duration::from_secs(1)).unwrap();
        assert_eq!(outcome, TerminateOutcome::AlreadyDead);
    }

    #[test]
    fn terminate_stops_a_cooperative_process_gracefully() {
        let mut child = spawn_in_own_group("sleep", &["30"]);
        let pid = child.id();

        let outcome = terminate("coop", pid, Duration::from_secs(5)).unwrap();
        assert_eq!(outcome, TerminateOutcome::Graceful);

        let _ = child.wait();
        assert!(!is_process_alive(pid));
    }

    #[test]
    fn terminate_escalates_when_the_stop_signal_is_ignored() {
        let dir = tempfile::TempDir::new().unwrap();
        let ready = dir.path().join("ready");
        let script = format!(
            "trap '' TERM; : > '{}'; while :; do sleep 1; done",
            ready.display()
        );
        let mut child = spawn_in_own_group("sh", &["-c", &script]);
        let pid = child.id();

        // SIGTERM sent before the shell installs its trap would kill it and
        // report Graceful, so wait for the post-trap marker file first.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !ready.exists() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }

        let outcome = terminate("stubborn", pid, Duration::from_millis(600)).unwrap();
        assert_eq!(outcome, TerminateOutcome::Forced);

        let _ = child.wait();
        assert!(!is_process_alive(pid));
    }
}
