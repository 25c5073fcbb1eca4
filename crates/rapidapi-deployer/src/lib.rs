//! Remote deployment of the RapidAPI mock service.
//!
//! Provides:
//! - The remote provisioner that sequences cloud resource creation
//! - The container group deployment template
//! - Azure bindings: resource manager, file shares, Key Vault, CLI sign-in

pub mod arm;
pub mod auth;
pub mod credentials;
pub mod files;
pub mod provisioner;
pub mod template;

pub use arm::{AzureConnector, AzureResourceManager};
pub use auth::AzureCliTokenSource;
pub use credentials::{KeyVaultCredentialProvider, StaticCredentialProvider};
pub use files::FileShareClient;
pub use provisioner::{ProvisionEvent, RemoteProvisioner};
pub use template::container_group_template;
