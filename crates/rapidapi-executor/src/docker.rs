//! Local Docker runtime implementation.

use async_trait::async_trait;
use bollard::Docker;
use bollard::auth::DockerCredentials;
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
    UploadToContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding};
use bytes::Bytes;
use futures::StreamExt;
use rapidapi_core::credentials::ImageCredentials;
use rapidapi_core::runtime::{ContainerFile, ContainerHandle, ContainerRuntime, ContainerSpec};
use rapidapi_core::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Runs the mock service on the local Docker daemon.
///
/// The daemon connection is opened on first use, so commands that never touch
/// Docker do not depend on it.
pub struct DockerRuntime {
    docker: OnceCell<Docker>,
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerRuntime {
    /// Use the local Docker daemon.
    pub fn new() -> Self {
        Self {
            docker: OnceCell::new(),
        }
    }

    /// Create with a custom Docker client.
    pub fn with_client(docker: Docker) -> Self {
        Self {
            docker: OnceCell::new_with(Some(docker)),
        }
    }

    async fn client(&self) -> Result<&Docker> {
        self.docker
            .get_or_try_init(|| async {
                debug!("Connecting to Docker");
                Docker::connect_with_local_defaults()
                    .map_err(|e| Error::Runtime(format!("cannot reach Docker: {}", e)))
            })
            .await
    }

    /// Check that the daemon answers.
    pub async fn ping(&self) -> Result<()> {
        self.client()
            .await?
            .ping()
            .await
            .map_err(|e| Error::Runtime(format!("Docker is not running: {}", e)))?;
        Ok(())
    }

    async fn upload_files(&self, container: &str, files: &[ContainerFile]) -> Result<()> {
        for (directory, archive) in build_archives(files)? {
            debug!(container = %container, directory = %directory, "Copying files into container");
            let options = UploadToContainerOptions {
                path: directory.clone(),
                ..Default::default()
            };
            self.client()
                .await?
                .upload_to_container(container, Some(options), archive)
                .await
                .map_err(|e| {
                    Error::Runtime(format!("failed to copy files to {}: {}", directory, e))
                })?;
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn pull(&self, image: &ImageCredentials) -> Result<()> {
        info!(image = %image.image_name, "Pulling image");
        let options = CreateImageOptions {
            from_image: image.image_name.clone(),
            ..Default::default()
        };

        let docker = self.client().await?;
        let mut pull_stream = docker.create_image(Some(options), None, registry_login(image));
        while let Some(result) = pull_stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(status = %status, "Pull progress");
                    }
                }
                Err(e) => {
                    return Err(Error::Runtime(format!(
                        "failed to pull {}: {}",
                        image.image_name, e
                    )));
                }
            }
        }
        Ok(())
    }

    async fn run(&self, spec: ContainerSpec) -> Result<ContainerHandle> {
        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let mut exposed_ports = HashMap::new();
        let mut port_bindings = HashMap::new();
        for mapping in &spec.ports {
            let key = format!("{}/tcp", mapping.container);
            exposed_ports.insert(key.clone(), HashMap::new());
            port_bindings.insert(
                key,
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: Some(mapping.host.to_string()),
                }]),
            );
        }

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            auto_remove: Some(spec.auto_remove),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.image_name.clone()),
            env: Some(env),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        info!(container = %spec.name, "Creating container");
        let container = self
            .client()
            .await?
            .create_container(Some(create_options), config)
            .await
            .map_err(|e| Error::Runtime(format!("failed to create container: {}", e)))?;

        let handle = ContainerHandle {
            name: spec.name.clone(),
            runtime_id: container.id,
            runtime_name: self.name().to_string(),
        };

        if let Err(e) = self.upload_files(&spec.name, &spec.files).await {
            // A created but never started container is not auto-removed.
            let _ = self.remove(&handle).await;
            return Err(e);
        }

        info!(container = %spec.name, "Starting container");
        if let Err(e) = self
            .client()
            .await?
            .start_container(&spec.name, None::<StartContainerOptions<String>>)
            .await
        {
            let _ = self.remove(&handle).await;
            return Err(Error::Runtime(format!("failed to start container: {}", e)));
        }

        Ok(handle)
    }

    async fn remove(&self, handle: &ContainerHandle) -> Result<()> {
        info!(container = %handle.name, "Removing container");

        match self.client().await?.stop_container(&handle.name, None).await {
            Ok(()) => {}
            Err(e) if is_gone(&e) => {}
            Err(e) => warn!(container = %handle.name, error = %e, "Failed to stop container"),
        }

        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        match self
            .client()
            .await?
            .remove_container(&handle.name, Some(options))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_gone(&e) => Ok(()),
            Err(e) => Err(Error::Runtime(format!(
                "failed to remove container {}: {}",
                handle.name, e
            ))),
        }
    }
}

/// Registry login for a pull. Anonymous pulls carry no credentials.
fn registry_login(image: &ImageCredentials) -> Option<DockerCredentials> {
    if image.registry_username.is_empty() {
        return None;
    }
    Some(DockerCredentials {
        username: Some(image.registry_username.clone()),
        password: Some(image.registry_password.clone()),
        serveraddress: Some(image.registry_server.clone()),
        ..Default::default()
    })
}

/// Missing (404), already stopped (304) or already being removed (409).
fn is_gone(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError {
            status_code: 304 | 404 | 409,
            ..
        }
    )
}

/// Pack files into one tar archive per target directory.
fn build_archives(files: &[ContainerFile]) -> Result<BTreeMap<String, Bytes>> {
    let mut grouped: BTreeMap<String, Vec<(&str, &Bytes)>> = BTreeMap::new();

    for file in files {
        let target = Path::new(&file.target_path);
        let (Some(parent), Some(file_name)) = (
            target.parent().and_then(|p| p.to_str()),
            target.file_name().and_then(|n| n.to_str()),
        ) else {
            return Err(Error::InvalidInput(format!(
                "invalid container path: {}",
                file.target_path
            )));
        };
        let parent = if parent.is_empty() { "/" } else { parent };
        grouped
            .entry(parent.to_string())
            .or_default()
            .push((file_name, &file.contents));
    }

    let mut archives = BTreeMap::new();
    for (directory, entries) in grouped {
        let mut builder = tar::Builder::new(Vec::new());
        for (file_name, contents) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, file_name, contents.as_ref())?;
        }
        archives.insert(directory, Bytes::from(builder.into_inner()?));
    }
    Ok(archives)
}
