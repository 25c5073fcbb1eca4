//! Orchestration of local and remote mock service deployments.
//!
//! The [`Orchestrator`] composes the container supervisor, the remote
//! provisioner and the project record store into the user-facing operations.

pub mod orchestrator;
pub mod resolve;

pub use orchestrator::{
    Backends, CloudOverrides, CreateRequest, DeleteRequest, LocalRequest, LocalRun,
    Orchestrator, UpdateRequest,
};
pub use resolve::{first_non_empty, resolve_subscription, resolve_tenant};
