//! Local execution of the RapidAPI mock service.
//!
//! Provides:
//! - A Docker implementation of the container runtime
//! - Schema file watching
//! - The supervisor that restarts the container when the schema changes

pub mod docker;
pub mod supervisor;
pub mod watch;

pub use docker::DockerRuntime;
pub use supervisor::{
    ContainerSupervisor, LocalRunSpec, SupervisorEvent, SupervisorSession, SupervisorState,
};
pub use watch::{SchemaChange, SchemaWatcher};
