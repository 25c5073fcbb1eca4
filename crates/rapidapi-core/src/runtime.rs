//! Container runtime trait and container types.
//!
//! A runtime runs one mock service container on the local machine (Docker,
//! Podman, ...). The supervisor drives it; the runtime itself keeps no state
//! about which container is current.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::Result;
use crate::credentials::ImageCredentials;

/// Path the mock service reads its schema from inside the container.
pub const CONTAINER_SCHEMA_PATH: &str = "/app/Project.csdl";

/// Port the mock service listens on inside the container.
pub const CONTAINER_PORT: u16 = 80;

/// Specification for a container to run.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Container name, unique per start.
    pub name: String,
    /// Image reference and the registry login used to pull it.
    pub image: ImageCredentials,
    /// Host port to container port mappings.
    pub ports: Vec<PortMapping>,
    /// Environment variables.
    pub env: HashMap<String, String>,
    /// Files copied into the container before it starts.
    pub files: Vec<ContainerFile>,
    /// Remove the container once it stops.
    pub auto_remove: bool,
}

/// Maps a host port to a container port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
}

/// A file placed into the container filesystem at start.
#[derive(Debug, Clone)]
pub struct ContainerFile {
    /// Absolute path inside the container.
    pub target_path: String,
    pub contents: Bytes,
}

/// Handle to a started container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHandle {
    /// Container name as given in the spec.
    pub name: String,
    /// Runtime-specific identifier (e.g., Docker container ID).
    pub runtime_id: String,
    /// Name of the runtime that started it.
    pub runtime_name: String,
}

/// Trait for local container runtimes.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Name of this runtime.
    fn name(&self) -> &'static str;

    /// Log in to the image registry and pull the latest image.
    async fn pull(&self, image: &ImageCredentials) -> Result<()>;

    /// Create, populate and start a container.
    async fn run(&self, spec: ContainerSpec) -> Result<ContainerHandle>;

    /// Stop and remove a container. Removing a missing container succeeds.
    async fn remove(&self, handle: &ContainerHandle) -> Result<()>;
}
