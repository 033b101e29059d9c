//! Multi-instance launcher for the MetaApi trading server.
//!
//! Each instance is an independent copy of the server process with its own
//! port, config record, log file, and pid file, all tracked in a durable
//! registry guarded by an exclusive advisory file lock. Commands reconcile
//! the registry against live OS processes on every read, so an externally
//! killed instance surfaces as crashed instead of a stale running entry.

pub mod cli;
pub mod config;
pub mod error;
pub mod instance;
pub mod paths;
pub mod ports;
pub mod process;
pub mod registry;

pub use error::{ErrorKind, LauncherError, Result};
