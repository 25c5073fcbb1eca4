//! Project records and the values derived from them.

use chrono::{DateTime, Utc};
use derive_more::Display;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::LazyLock;

use crate::{Error, Result};

/// Region used when a deployment does not name one.
pub const DEFAULT_REGION: &str = "centralus";

static APP_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]{1,22}$").expect("valid app id pattern"));

/// User-chosen identifier of one project.
///
/// All remote resource names are derived from it, so it is restricted to what
/// a storage account name (`st<id>`, at most 24 characters) and a DNS label
/// accept: lowercase ASCII letters and digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
#[serde(transparent)]
pub struct AppId(String);

impl AppId {
    pub fn parse(value: &str) -> Result<Self> {
        if APP_ID_PATTERN.is_match(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(Error::InvalidInput(format!(
                "invalid app name '{}': use 1-22 lowercase letters or digits",
                value
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn resource_group(&self) -> String {
        format!("rg{}", self.0)
    }

    pub fn storage_account(&self) -> String {
        format!("st{}", self.0)
    }

    pub fn file_share(&self) -> String {
        format!("share{}", self.0)
    }

    pub fn deployment_name(&self) -> String {
        format!("dep{}", self.0)
    }
}

impl std::str::FromStr for AppId {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Arguments for a single run of the mock service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunArgs {
    /// Populate the service with generated sample data at startup.
    pub seed_data: bool,
}

impl RunArgs {
    pub fn new(seed_data: bool) -> Self {
        Self { seed_data }
    }
}

/// Identity and connection record for one deployed instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(alias = "AppId")]
    pub app_id: AppId,
    #[serde(default, alias = "TenantId")]
    pub tenant_id: Option<String>,
    #[serde(default, alias = "SubScriptionId")]
    pub subscription_id: Option<String>,
    #[serde(default, alias = "Region")]
    pub region: Option<String>,
    #[serde(alias = "ResourceGroup")]
    pub resource_group: String,
    #[serde(alias = "StorageAccountName")]
    pub storage_account_name: String,
    #[serde(default, alias = "StorageAccountKey")]
    pub storage_account_key: Option<String>,
    #[serde(alias = "AzureFileShare")]
    pub file_share_name: String,
    #[serde(default, alias = "SeedData")]
    pub seed_data: bool,
    #[serde(default)]
    pub local_schema_path: Option<PathBuf>,
}

impl Project {
    /// Create a record whose resource names are derived from the app id.
    pub fn new(app_id: AppId) -> Self {
        Self {
            resource_group: app_id.resource_group(),
            storage_account_name: app_id.storage_account(),
            file_share_name: app_id.file_share(),
            app_id,
            tenant_id: None,
            subscription_id: None,
            region: None,
            storage_account_key: None,
            seed_data: false,
            local_schema_path: None,
        }
    }

    /// Connection string for the storage account holding the file share.
    pub fn storage_connection_string(&self) -> Option<String> {
        self.storage_account_key.as_ref().map(|key| {
            format!(
                "DefaultEndpointsProtocol=https;AccountName={};AccountKey={}",
                self.storage_account_name, key
            )
        })
    }

    /// Public URL of the deployed service.
    pub fn service_url(&self) -> String {
        remote_service_url(
            &self.app_id,
            self.region.as_deref().unwrap_or(DEFAULT_REGION),
        )
    }
}

/// URL of the service running in a local container.
pub fn local_service_url(port: u16) -> String {
    format!("http://localhost:{}/odata", port)
}

/// URL of the service running in a cloud container group.
pub fn remote_service_url(app_id: &AppId, region: &str) -> String {
    format!("http://{}.{}.azurecontainer.io/odata", app_id, region)
}

/// Outcome of one remote create call. Never persisted.
#[derive(Debug, Clone)]
pub struct Deployment {
    pub project: Project,
    pub deployment_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl Deployment {
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Process-wide defaults used when a command omits tenant or subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootConfig {
    #[serde(default, alias = "Tenant")]
    pub tenant: Option<String>,
    #[serde(default, alias = "Subscription")]
    pub subscription: Option<String>,
}

impl RootConfig {
    /// Overlay the non-blank fields of `update` onto `self`.
    pub fn merge(&mut self, update: &RootConfig) {
        if let Some(tenant) = non_blank(update.tenant.as_deref()) {
            self.tenant = Some(tenant.to_string());
        }
        if let Some(subscription) = non_blank(update.subscription.as_deref()) {
            self.subscription = Some(subscription.to_string());
        }
    }
}

pub(crate) fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
