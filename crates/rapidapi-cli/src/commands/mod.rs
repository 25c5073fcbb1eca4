//! CLI command implementations.

pub mod config;
pub mod local;
pub mod remote;

use anyhow::{Context as _, Result};
use rapidapi_config::settings::{SETTINGS_FILE, default_data_dir};
use rapidapi_config::{CsdlValidator, ProjectStore, Settings};
use rapidapi_core::credentials::{CredentialProvider, ImageCredentials};
use rapidapi_deployer::{
    AzureConnector, KeyVaultCredentialProvider, ProvisionEvent, StaticCredentialProvider,
};
use rapidapi_executor::DockerRuntime;
use rapidapi_orchestrator::{Backends, Orchestrator};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

const REGISTRY_USERNAME_ENV: &str = "RAPIDAPI_REGISTRY_USERNAME";
const REGISTRY_PASSWORD_ENV: &str = "RAPIDAPI_REGISTRY_PASSWORD";

/// Settings and storage shared by every command.
pub struct Context {
    pub data_dir: PathBuf,
    pub settings: Settings,
}

impl Context {
    pub fn load(data_dir: Option<PathBuf>, settings_path: Option<PathBuf>) -> Result<Self> {
        let data_dir = match data_dir {
            Some(dir) => dir,
            None => default_data_dir()?,
        };
        let settings_path = settings_path.unwrap_or_else(|| data_dir.join(SETTINGS_FILE));
        let settings = Settings::load(&settings_path)
            .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
        debug!(data_dir = %data_dir.display(), "Loaded settings");

        Ok(Self { data_dir, settings })
    }

    pub fn store(&self) -> Result<ProjectStore> {
        ProjectStore::open(&self.data_dir).with_context(|| {
            format!("Failed to open data directory {}", self.data_dir.display())
        })
    }

    /// Build the facade. Remote progress goes to `progress` when given.
    pub fn orchestrator(
        &self,
        progress: Option<UnboundedSender<ProvisionEvent>>,
    ) -> Result<Orchestrator> {
        let store = self.store()?;
        let root_config = store.root_config();

        let backends = Backends {
            validator: Arc::new(CsdlValidator::new()),
            credentials: self.credentials(progress.clone()),
            runtime: Arc::new(DockerRuntime::new()),
            cloud: Arc::new(AzureConnector::new()),
        };

        let orchestrator = Orchestrator::new(
            store,
            root_config,
            backends,
            self.settings.region.clone(),
        );
        Ok(match progress {
            Some(progress) => orchestrator.with_progress(progress),
            None => orchestrator,
        })
    }

    fn credentials(
        &self,
        progress: Option<UnboundedSender<ProvisionEvent>>,
    ) -> Arc<dyn CredentialProvider> {
        match &self.settings.key_vault {
            Some(vault) => {
                let provider = KeyVaultCredentialProvider::with_azure_cli(
                    vault.url.clone(),
                    vault.tenant.clone(),
                    vault.secrets.clone(),
                );
                match progress {
                    Some(progress) => Arc::new(provider.with_events(progress)),
                    None => Arc::new(provider),
                }
            }
            None => Arc::new(StaticCredentialProvider::new(ImageCredentials {
                image_name: self.settings.image.name.clone(),
                registry_server: self.settings.image.server.clone(),
                registry_username: std::env::var(REGISTRY_USERNAME_ENV).unwrap_or_default(),
                registry_password: std::env::var(REGISTRY_PASSWORD_ENV).unwrap_or_default(),
            })),
        }
    }
}
