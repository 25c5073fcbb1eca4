//! Bearer tokens from the Azure CLI.
//!
//! `az account get-access-token` returns a token for the signed-in account.
//! When that fails because nobody is signed in, `az login` is run once
//! (it opens a browser) and the token request is retried.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rapidapi_core::credentials::{AccessToken, TokenSource};
use rapidapi_core::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Audience for resource manager calls.
pub const MANAGEMENT_RESOURCE: &str = "https://management.azure.com/";
/// Audience for Key Vault secret reads.
pub const VAULT_RESOURCE: &str = "https://vault.azure.net";

/// Tokens are refreshed when they expire within this margin.
const REFRESH_MARGIN_MINUTES: i64 = 5;

/// Token source backed by the `az` command line tool.
pub struct AzureCliTokenSource {
    az_bin: String,
    tenant: Option<String>,
    interactive: bool,
    cache: Mutex<HashMap<String, AccessToken>>,
}

impl AzureCliTokenSource {
    /// Tokens for `tenant`, or for the CLI's current tenant when `None`.
    pub fn new(tenant: Option<String>) -> Self {
        let az_bin = std::env::var("AZURE_CLI_BIN").unwrap_or_else(|_| "az".to_string());
        Self {
            az_bin,
            tenant: tenant.filter(|t| !t.trim().is_empty()),
            interactive: true,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Never start an interactive sign-in.
    pub fn non_interactive(mut self) -> Self {
        self.interactive = false;
        self
    }

    async fn request_token(&self, resource: &str) -> Result<AccessToken> {
        let mut cmd = Command::new(&self.az_bin);
        cmd.args(["account", "get-access-token", "--resource", resource]);
        if let Some(tenant) = &self.tenant {
            cmd.args(["--tenant", tenant]);
        }
        cmd.args(["--output", "json"]);

        let output = cmd
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| cli_missing(&self.az_bin, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(Error::Unauthorized(stderr));
        }

        parse_token(&output.stdout)
    }

    async fn login(&self) -> Result<()> {
        info!(tenant = ?self.tenant, "Signing in with the Azure CLI");
        let mut cmd = Command::new(&self.az_bin);
        cmd.arg("login");
        if let Some(tenant) = &self.tenant {
            cmd.args(["--tenant", tenant]);
        }
        cmd.args(["--output", "none"]);

        let status = cmd
            .status()
            .await
            .map_err(|e| cli_missing(&self.az_bin, e))?;
        if !status.success() {
            return Err(Error::Unauthorized("Azure sign-in failed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TokenSource for AzureCliTokenSource {
    async fn token(&self, resource: &str) -> Result<AccessToken> {
        let mut cache = self.cache.lock().await;
        if let Some(token) = cache.get(resource) {
            if token.is_fresh(chrono::Duration::minutes(REFRESH_MARGIN_MINUTES)) {
                return Ok(token.clone());
            }
        }

        debug!(resource = %resource, "Requesting access token");
        let token = match self.request_token(resource).await {
            Ok(token) => token,
            Err(Error::Unauthorized(detail)) if self.interactive => {
                debug!(detail = %detail, "Token request failed; signing in");
                self.login().await?;
                self.request_token(resource).await?
            }
            Err(Error::Unauthorized(detail)) => {
                return Err(Error::Unauthorized(format!(
                    "{} (run `az login` first)",
                    detail
                )));
            }
            Err(e) => return Err(e),
        };

        cache.insert(resource.to_string(), token.clone());
        Ok(token)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliToken {
    access_token: String,
    /// Unix timestamp, reported by newer CLI versions.
    #[serde(default, rename = "expires_on")]
    expires_on_unix: Option<i64>,
    #[serde(default)]
    tenant: Option<String>,
}

fn parse_token(stdout: &[u8]) -> Result<AccessToken> {
    let raw: CliToken = serde_json::from_slice(stdout)
        .map_err(|e| Error::Unauthorized(format!("unexpected Azure CLI output: {}", e)))?;

    Ok(AccessToken {
        token: raw.access_token,
        expires_on: raw
            .expires_on_unix
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
        tenant_id: raw.tenant,
    })
}

fn cli_missing(bin: &str, err: std::io::Error) -> Error {
    if err.kind() == std::io::ErrorKind::NotFound {
        Error::Unauthorized(format!(
            "the Azure CLI ({}) is required to sign in; install it and run `az login`",
            bin
        ))
    } else {
        Error::Io(err)
    }
}
