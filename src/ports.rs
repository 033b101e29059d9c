//! Port allocation for instance servers.

use std::collections::BTreeSet;
use std::net::TcpListener;

use crate::error::{LauncherError, Result};

/// Inclusive port range the allocator scans.
#[derive(Debug, Clone, Copy)]
pub struct PortRange {
    pub base: u16,
    pub max: u16,
}

impl PortRange {
    pub fn new(base: u16, max: u16) -> Self {
        Self { base, max }
    }
}

/// Bind-and-release probe against the loopback interface.
fn probe_bind(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// Check that a specific port can be bound right now.
pub fn check_port_available(port: u16) -> Result<()> {
    if probe_bind(port) {
        Ok(())
    } else {
        Err(LauncherError::port_unavailable(port))
    }
}

/// Pick the port for a new instance.
///
/// A requested port must be both unclaimed in the registry and bindable;
/// there is no silent reassignment. Without a request the range is scanned
/// upward and the first unclaimed, bindable port wins. The probe-then-claim
/// gap remains racy against processes outside the launcher; for managed
/// instances the registry lock closes it.
pub fn allocate(
    requested: Option<u16>,
    claimed: &BTreeSet<u16>,
    range: PortRange,
) -> Result<u16> {
    if let Some(port) = requested {
        if claimed.contains(&port) {
            return Err(LauncherError::port_unavailable(port));
        }
        check_port_available(port)?;
        return Ok(port);
    }

    for port in range.base..=range.max {
        if !claimed.contains(&port) && probe_bind(port) {
            return Ok(port);
        }
    }
    Err(LauncherError::port_range_exhausted(range.base, range.max))
}
