//! Remote provisioner.
//!
//! Sequences the cloud calls that create, update and tear down one project:
//! resource group, storage account, file share, schema upload, then the
//! container group deployment. Steps run strictly in order and a failure
//! stops the sequence; nothing already created is rolled back.

use crate::template::{SCHEMA_DIRECTORY, SCHEMA_FILE_NAME, container_group_template};
use bytes::Bytes;
use chrono::Utc;
use rapidapi_core::cloud::{CloudProvider, CloudSession, FileShareTarget};
use rapidapi_core::credentials::CredentialProvider;
use rapidapi_core::schema::SchemaValidator;
use rapidapi_core::{AppId, Deployment, Error, Project, Result, RunArgs};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

/// Progress of a remote operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionEvent {
    /// About to sign in. Sent once, before the first cloud call.
    Authenticating,
    CreatingResourceGroup { name: String },
    CreatingStorageAccount { name: String },
    CreatingFileShare { name: String },
    UploadingSchema,
    DeployingTemplate { name: String },
    RestartingContainerGroup { name: String },
    DeletingResourceGroup { name: String },
}

impl std::fmt::Display for ProvisionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProvisionEvent::Authenticating => write!(f, "Signing in to Azure"),
            ProvisionEvent::CreatingResourceGroup { name } => {
                write!(f, "Creating resource group {}", name)
            }
            ProvisionEvent::CreatingStorageAccount { name } => {
                write!(f, "Creating storage account {}", name)
            }
            ProvisionEvent::CreatingFileShare { name } => write!(f, "Creating file share {}", name),
            ProvisionEvent::UploadingSchema => write!(f, "Uploading schema"),
            ProvisionEvent::DeployingTemplate { name } => write!(f, "Deploying {}", name),
            ProvisionEvent::RestartingContainerGroup { name } => {
                write!(f, "Restarting container group {}", name)
            }
            ProvisionEvent::DeletingResourceGroup { name } => {
                write!(f, "Deleting resource group {}", name)
            }
        }
    }
}

/// Creates, updates and deletes the cloud resources of one project.
pub struct RemoteProvisioner {
    cloud: Arc<dyn CloudProvider>,
    validator: Arc<dyn SchemaValidator>,
    credentials: Arc<dyn CredentialProvider>,
    region: String,
    session: OnceCell<CloudSession>,
    events: Option<UnboundedSender<ProvisionEvent>>,
}

impl RemoteProvisioner {
    pub fn new(
        cloud: Arc<dyn CloudProvider>,
        validator: Arc<dyn SchemaValidator>,
        credentials: Arc<dyn CredentialProvider>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            cloud,
            validator,
            credentials,
            region: region.into(),
            session: OnceCell::new(),
            events: None,
        }
    }

    pub fn with_events(mut self, events: UnboundedSender<ProvisionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    fn emit(&self, event: ProvisionEvent) {
        debug!(event = %event, "Provisioning progress");
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    /// The cloud session, established on first use.
    pub async fn session(&self) -> Result<&CloudSession> {
        self.session
            .get_or_try_init(|| async {
                self.emit(ProvisionEvent::Authenticating);
                let session = self.cloud.authenticate().await?;
                info!(
                    provider = self.cloud.name(),
                    tenant = %session.tenant_id,
                    subscription = %session.subscription_id,
                    "Signed in"
                );
                Ok(session)
            })
            .await
    }

    /// Provision every resource for `app_id` and deploy the service.
    pub async fn create(
        &self,
        app_id: &AppId,
        schema_path: &Path,
        run_args: RunArgs,
    ) -> Result<Deployment> {
        let started_at = Utc::now();
        let session = self.session().await?.clone();
        self.validator.validate(schema_path)?;
        let image = self.credentials.get_credentials().await?;
        let schema = read_schema(schema_path).await?;

        let mut project = Project::new(app_id.clone());
        project.tenant_id = Some(session.tenant_id);
        project.subscription_id = Some(session.subscription_id);
        project.seed_data = run_args.seed_data;
        project.local_schema_path = Some(schema_path.to_path_buf());

        let leftover = self
            .cloud
            .resource_group_exists(&project.resource_group)
            .await
            .map_err(|e| Error::during("checking resource group", e))?;
        if leftover {
            warn!(
                resource_group = %project.resource_group,
                "Resource group already exists; reusing it"
            );
        }

        self.emit(ProvisionEvent::CreatingResourceGroup {
            name: project.resource_group.clone(),
        });
        self.cloud
            .create_resource_group(&project.resource_group, &self.region)
            .await
            .map_err(|e| Error::during("creating resource group", e))?;
        project.region = Some(self.region.clone());

        self.emit(ProvisionEvent::CreatingStorageAccount {
            name: project.storage_account_name.clone(),
        });
        self.cloud
            .create_storage_account(
                &project.resource_group,
                &project.storage_account_name,
                &self.region,
            )
            .await
            .map_err(|e| Error::during("creating storage account", e))?;
        project.storage_account_key = Some(self.first_key(&project).await?);

        self.emit(ProvisionEvent::CreatingFileShare {
            name: project.file_share_name.clone(),
        });
        self.cloud
            .create_file_share(
                &project.resource_group,
                &project.storage_account_name,
                &project.file_share_name,
            )
            .await
            .map_err(|e| Error::during("creating file share", e))?;

        self.upload_schema(&project, schema).await?;

        let template = container_group_template(&project, &image)?;
        let template = serde_json::to_value(template)
            .map_err(|e| Error::Internal(format!("cannot render template: {}", e)))?;

        let deployment_name = app_id.deployment_name();
        self.emit(ProvisionEvent::DeployingTemplate {
            name: deployment_name.clone(),
        });
        self.cloud
            .deploy_template(&project.resource_group, &deployment_name, template)
            .await
            .map_err(|e| Error::during("deploying container group", e))?;

        let finished_at = Utc::now();
        info!(
            app_id = %app_id,
            url = %project.service_url(),
            elapsed_secs = (finished_at - started_at).num_seconds(),
            "Deployment finished"
        );

        Ok(Deployment {
            project,
            deployment_name,
            started_at,
            finished_at,
        })
    }

    /// Replace the schema of a deployed project and restart its container group.
    ///
    /// Returns the project with its schema path updated. The input record is
    /// left untouched so callers persist only on success.
    pub async fn update_schema(&self, project: &Project, schema_path: &Path) -> Result<Project> {
        self.session().await?;
        self.validator.validate(schema_path)?;
        let schema = read_schema(schema_path).await?;

        let mut updated = project.clone();
        if updated.storage_account_key.is_none() {
            updated.storage_account_key = Some(self.first_key(&updated).await?);
        }

        self.upload_schema(&updated, schema).await?;

        let group = updated.app_id.to_string();
        self.emit(ProvisionEvent::RestartingContainerGroup {
            name: group.clone(),
        });
        self.cloud
            .restart_container_group(&updated.resource_group, &group)
            .await
            .map_err(|e| Error::during("restarting container group", e))?;

        updated.local_schema_path = Some(schema_path.to_path_buf());
        info!(app_id = %updated.app_id, "Schema updated");
        Ok(updated)
    }

    /// Delete the project's resource group and everything in it.
    pub async fn delete(&self, project: &Project) -> Result<()> {
        self.session().await?;

        self.emit(ProvisionEvent::DeletingResourceGroup {
            name: project.resource_group.clone(),
        });
        self.cloud
            .delete_resource_group(&project.resource_group)
            .await
            .map_err(|e| Error::during("deleting resource group", e))?;

        info!(app_id = %project.app_id, "Resources deleted");
        Ok(())
    }

    async fn first_key(&self, project: &Project) -> Result<String> {
        let keys = self
            .cloud
            .storage_account_keys(&project.resource_group, &project.storage_account_name)
            .await
            .map_err(|e| Error::during("reading storage account keys", e))?;
        keys.into_iter().next().ok_or_else(|| Error::ProvisioningFailed {
            step: "reading storage account keys".to_string(),
            message: format!("{} returned no keys", project.storage_account_name),
        })
    }

    async fn upload_schema(&self, project: &Project, schema: Bytes) -> Result<()> {
        let account_key = project.storage_account_key.clone().ok_or_else(|| {
            Error::Internal(format!("storage account key for {} is not known", project.app_id))
        })?;
        let target = FileShareTarget {
            account_name: project.storage_account_name.clone(),
            account_key,
            share_name: project.file_share_name.clone(),
        };

        self.emit(ProvisionEvent::UploadingSchema);
        self.cloud
            .upload_file(&target, SCHEMA_DIRECTORY, SCHEMA_FILE_NAME, schema)
            .await
            .map_err(|e| Error::during("uploading schema", e))
    }
}

async fn read_schema(path: &Path) -> Result<Bytes> {
    tokio::fs::read(path)
        .await
        .map(Bytes::from)
        .map_err(|e| Error::during("reading schema", e.into()))
}
