//! Cloud provider trait and session types.
//!
//! A provider wraps one resource manager account (tenant + subscription) and
//! exposes the handful of resource operations remote provisioning needs. It
//! does not sequence them; the provisioner does.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::Result;

/// An established session against the cloud account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudSession {
    pub tenant_id: String,
    pub subscription_id: String,
}

/// Tenant and optional subscription a provider should act in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudTarget {
    pub tenant_id: String,
    /// `None` selects the account's default subscription.
    pub subscription_id: Option<String>,
}

/// Location of a storage file share and the key that opens it.
#[derive(Clone, PartialEq, Eq)]
pub struct FileShareTarget {
    pub account_name: String,
    pub account_key: String,
    pub share_name: String,
}

impl std::fmt::Debug for FileShareTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileShareTarget")
            .field("account_name", &self.account_name)
            .field("share_name", &self.share_name)
            .finish_non_exhaustive()
    }
}

/// Trait for cloud resource backends.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Name of this provider.
    fn name(&self) -> &'static str;

    /// Acquire credentials and resolve the subscription.
    async fn authenticate(&self) -> Result<CloudSession>;

    /// Create (or update) a resource group.
    async fn create_resource_group(&self, name: &str, region: &str) -> Result<()>;

    /// Whether a resource group exists.
    async fn resource_group_exists(&self, name: &str) -> Result<bool>;

    /// Create (or update) a storage account in a resource group.
    async fn create_storage_account(
        &self,
        resource_group: &str,
        account: &str,
        region: &str,
    ) -> Result<()>;

    /// Access keys of a storage account, in provider order.
    async fn storage_account_keys(&self, resource_group: &str, account: &str)
    -> Result<Vec<String>>;

    /// Create (or update) a file share on a storage account.
    async fn create_file_share(&self, resource_group: &str, account: &str, share: &str)
    -> Result<()>;

    /// Write a file into a share, creating the directory if needed.
    async fn upload_file(
        &self,
        target: &FileShareTarget,
        directory: &str,
        file_name: &str,
        contents: Bytes,
    ) -> Result<()>;

    /// Submit a template as an incremental resource group deployment.
    async fn deploy_template(
        &self,
        resource_group: &str,
        deployment_name: &str,
        template: serde_json::Value,
    ) -> Result<()>;

    /// Restart a deployed container group.
    async fn restart_container_group(&self, resource_group: &str, name: &str) -> Result<()>;

    /// Delete a resource group and everything in it. A missing group succeeds.
    async fn delete_resource_group(&self, name: &str) -> Result<()>;
}

/// Creates providers for a tenant/subscription pair.
pub trait CloudConnector: Send + Sync {
    fn connect(&self, target: &CloudTarget) -> Result<Arc<dyn CloudProvider>>;
}
