//! Instance management: the orchestration commands over the registry, port
//! allocator, process supervisor, and health prober.

mod crud;
mod lifecycle;
mod types;

// Re-export types
pub use types::{
    CreateOutcome, HealthStatus, InstanceReport, RemoveOutcome, StartOutcome, StopOutcome,
    StopReport,
};

// Re-export CRUD operations
pub use crud::{create_instance, list_instances, remove_instance, status_instances};

// Re-export lifecycle
pub use lifecycle::{start_instance, stop_all_instances, stop_instance};
