//! Launcher error types.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::Serialize;

/// Launcher error carrying a machine-readable kind and a detail payload.
#[derive(Debug)]
pub struct LauncherError {
    payload: HashMap<String, String>,
    kind: ErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// An instance with this name already exists
    DuplicateInstance,
    /// No instance with this name is registered
    UnknownInstance,
    /// No MT5 terminal path supplied, or the path does not exist
    MissingMt5Path,
    /// Instance is currently running
    InstanceRunning,
    /// Instance name contains disallowed characters
    InvalidInstanceName,
    /// Requested port is claimed or not bindable
    PortUnavailable,
    /// No free port left in the configured range
    PortRangeExhausted,
    /// Server process could not be spawned, or exited during startup
    ProcessSpawnFailed,
    /// Instance did not become healthy within the startup timeout
    StartupTimeout,
    /// Process survived both graceful and forceful termination
    TerminationTimedOut,
    /// Registry file exists but cannot be parsed
    CorruptRegistry,
    /// Configuration error
    Config,
    /// File system error
    Io,
    /// Network error
    Network,
}

impl ErrorKind {
    /// Stable numeric code, used as the process exit code.
    pub fn code(&self) -> u32 {
        match self {
            Self::DuplicateInstance => 10,
            Self::UnknownInstance => 11,
            Self::MissingMt5Path => 12,
            Self::InstanceRunning => 13,
            Self::InvalidInstanceName => 14,
            Self::PortUnavailable => 20,
            Self::PortRangeExhausted => 21,
            Self::ProcessSpawnFailed => 30,
            Self::StartupTimeout => 31,
            Self::TerminationTimedOut => 32,
            Self::CorruptRegistry => 40,
            Self::Config => 41,
            Self::Io => 42,
            Self::Network => 43,
        }
    }
}

impl LauncherError {
    pub fn new(kind: ErrorKind, payload: HashMap<String, String>) -> Self {
        Self { payload, kind }
    }

    /// Create an error with a single "detail" key from a non-empty string,
    /// or an empty payload if the string is empty.
    fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let payload = if detail.is_empty() {
            HashMap::new()
        } else {
            HashMap::from([("detail".to_string(), detail)])
        };
        Self::new(kind, payload)
    }

    pub fn duplicate_instance(name: &str) -> Self {
        Self::new(
            ErrorKind::DuplicateInstance,
            HashMap::from([("instance".to_string(), name.to_string())]),
        )
    }

    pub fn unknown_instance(name: &str) -> Self {
        Self::new(
            ErrorKind::UnknownInstance,
            HashMap::from([("instance".to_string(), name.to_string())]),
        )
    }

    pub fn missing_mt5_path() -> Self {
        Self::new(ErrorKind::MissingMt5Path, HashMap::new())
    }

    pub fn mt5_path_not_found(path: &Path) -> Self {
        Self::new(
            ErrorKind::MissingMt5Path,
            HashMap::from([("path".to_string(), path.display().to_string())]),
        )
    }

    pub fn instance_running(name: &str) -> Self {
        Self::new(
            ErrorKind::InstanceRunning,
            HashMap::from([("instance".to_string(), name.to_string())]),
        )
    }

    pub fn invalid_instance_name(name: &str) -> Self {
        Self::new(
            ErrorKind::InvalidInstanceName,
            HashMap::from([("name".to_string(), name.to_string())]),
        )
    }

    pub fn port_unavailable(port: u16) -> Self {
        Self::new(
            ErrorKind::PortUnavailable,
            HashMap::from([("port".to_string(), port.to_string())]),
        )
    }

    pub fn port_range_exhausted(base: u16, max: u16) -> Self {
        Self::new(
            ErrorKind::PortRangeExhausted,
            HashMap::from([
                ("base".to_string(), base.to_string()),
                ("max".to_string(), max.to_string()),
            ]),
        )
    }

    pub fn process_spawn_failed(detail: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::ProcessSpawnFailed, detail)
    }

    pub fn startup_timeout(name: &str, timeout_secs: u64) -> Self {
        Self::new(
            ErrorKind::StartupTimeout,
            HashMap::from([
                ("instance".to_string(), name.to_string()),
                ("timeout_secs".to_string(), timeout_secs.to_string()),
            ]),
        )
    }

    pub fn termination_timed_out(name: &str, pid: u32) -> Self {
        Self::new(
            ErrorKind::TerminationTimedOut,
            HashMap::from([
                ("instance".to_string(), name.to_string()),
                ("pid".to_string(), pid.to_string()),
            ]),
        )
    }

    pub fn corrupt_registry(path: &Path, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::CorruptRegistry,
            HashMap::from([
                ("path".to_string(), path.display().to_string()),
                ("detail".to_string(), detail.into()),
            ]),
        )
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Config, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Io, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Network, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for LauncherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.payload.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            let mut pairs: Vec<String> = self
                .payload
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            pairs.sort();
            write!(f, "{:?}: {}", self.kind, pairs.join(", "))
        }
    }
}

impl std::error::Error for LauncherError {}

impl Serialize for LauncherError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct as _;
        let mut s = serializer.serialize_struct("LauncherError", 3)?;
        s.serialize_field("kind", &self.kind)?;
        s.serialize_field("code", &self.kind.code())?;
        s.serialize_field("payload", &self.payload)?;
        s.end()
    }
}

impl From<std::io::Error> for LauncherError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<toml::de::Error> for LauncherError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<toml::ser::Error> for LauncherError {
    fn from(err: toml::ser::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<reqwest::Error> for LauncherError {
    fn from(err: reqwest::Error) -> Self {
        Self::network(err.to_string())
    }
}

impl From<serde_json::Error> for LauncherError {
    fn from(err: serde_json::Error) -> Self {
        Self::config(err.to_string())
    }
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, LauncherError>;
