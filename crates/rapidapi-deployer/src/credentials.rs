//! Registry credential providers.

use crate::auth::{AzureCliTokenSource, VAULT_RESOURCE};
use crate::provisioner::ProvisionEvent;
use async_trait::async_trait;
use rapidapi_core::credentials::{CredentialProvider, ImageCredentials, SecretNames, TokenSource};
use rapidapi_core::{Error, Result};
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;
use url::Url;

const VAULT_API_VERSION: &str = "7.4";

/// Credentials fixed at construction, typically from settings and environment.
#[derive(Debug, Clone)]
pub struct StaticCredentialProvider {
    credentials: ImageCredentials,
}

impl StaticCredentialProvider {
    pub fn new(credentials: ImageCredentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn get_credentials(&self) -> Result<ImageCredentials> {
        Ok(self.credentials.clone())
    }
}

/// Reads the registry credentials from Key Vault secrets.
pub struct KeyVaultCredentialProvider {
    client: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
    vault_url: Url,
    secrets: SecretNames,
    events: Option<UnboundedSender<ProvisionEvent>>,
}

impl KeyVaultCredentialProvider {
    pub fn new(
        client: reqwest::Client,
        tokens: Arc<dyn TokenSource>,
        vault_url: Url,
        secrets: SecretNames,
    ) -> Self {
        Self {
            client,
            tokens,
            vault_url,
            secrets,
            events: None,
        }
    }

    /// Read secrets with tokens from the Azure CLI, signed in to `tenant`.
    pub fn with_azure_cli(vault_url: Url, tenant: Option<String>, secrets: SecretNames) -> Self {
        Self::new(
            reqwest::Client::new(),
            Arc::new(AzureCliTokenSource::new(tenant)),
            vault_url,
            secrets,
        )
    }

    /// Report sign-in progress on `events`.
    pub fn with_events(mut self, events: UnboundedSender<ProvisionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    async fn secret(&self, name: &str) -> Result<String> {
        let url = secret_url(&self.vault_url, name);
        let token = self.tokens.token(VAULT_RESOURCE).await?;

        debug!(secret = %name, "Reading secret");
        let response = self
            .client
            .get(&url)
            .bearer_auth(&token.token)
            .send()
            .await
            .map_err(|e| Error::Cloud(format!("secret request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    Error::Unauthorized(format!("cannot read secret {}", name))
                }
                StatusCode::NOT_FOUND => Error::NotFound(format!("secret {}", name)),
                _ => Error::Cloud(format!("{} reading secret {}: {}", status, name, detail.trim())),
            });
        }

        let bundle: SecretBundle = response
            .json()
            .await
            .map_err(|e| Error::Cloud(format!("unexpected secret response: {}", e)))?;
        Ok(bundle.value)
    }
}

#[async_trait]
impl CredentialProvider for KeyVaultCredentialProvider {
    async fn get_credentials(&self) -> Result<ImageCredentials> {
        if let Some(events) = &self.events {
            let _ = events.send(ProvisionEvent::Authenticating);
        }

        let image_name = self.secret(&self.secrets.name).await?;
        let (registry_server, registry_username, registry_password) = tokio::try_join!(
            self.secret(&self.secrets.server),
            self.secret(&self.secrets.username),
            self.secret(&self.secrets.password),
        )?;

        Ok(ImageCredentials {
            image_name,
            registry_server,
            registry_username,
            registry_password,
        })
    }
}

#[derive(Deserialize)]
struct SecretBundle {
    value: String,
}

fn secret_url(vault: &Url, name: &str) -> String {
    format!(
        "{}/secrets/{}?api-version={}",
        vault.as_str().trim_end_matches('/'),
        name,
        VAULT_API_VERSION
    )
}
