//! Credential seams.
//!
//! Credential acquisition (browser sign-in, secret store lookup) lives behind
//! these traits; the orchestration code only asks for values.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Registry login and image reference for the mock service image.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageCredentials {
    /// Full image reference, e.g. `registry.azurecr.io/mockserv:latest`.
    pub image_name: String,
    pub registry_server: String,
    pub registry_username: String,
    pub registry_password: String,
}

impl std::fmt::Debug for ImageCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageCredentials")
            .field("image_name", &self.image_name)
            .field("registry_server", &self.registry_server)
            .field("registry_username", &self.registry_username)
            .field("registry_password", &"<redacted>")
            .finish()
    }
}

/// Names of the secret store entries holding each credential field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretNames {
    pub name: String,
    pub server: String,
    pub username: String,
    pub password: String,
}

impl Default for SecretNames {
    fn default() -> Self {
        Self {
            name: "ImageName".to_string(),
            server: "ImageServer".to_string(),
            username: "ImageUsername".to_string(),
            password: "ImagePassword".to_string(),
        }
    }
}

/// Supplies registry credentials on demand.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn get_credentials(&self) -> Result<ImageCredentials>;
}

/// A bearer token for one resource audience.
#[derive(Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_on: Option<DateTime<Utc>>,
    /// Tenant the token was issued for, when the source reports it.
    pub tenant_id: Option<String>,
}

impl AccessToken {
    /// Whether the token is still usable for at least `margin`.
    pub fn is_fresh(&self, margin: chrono::Duration) -> bool {
        match self.expires_on {
            Some(expires_on) => expires_on - margin > Utc::now(),
            None => true,
        }
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("expires_on", &self.expires_on)
            .field("tenant_id", &self.tenant_id)
            .finish_non_exhaustive()
    }
}

/// Source of bearer tokens. May sign the user in interactively.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self, resource: &str) -> Result<AccessToken>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_password() {
        let creds = ImageCredentials {
            image_name: "registry.example/mock:latest".to_string(),
            registry_server: "registry.example".to_string(),
            registry_username: "user".to_string(),
            registry_password: "hunter2".to_string(),
        };
        let printed = format!("{:?}", creds);
        assert!(printed.contains("registry.example"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn test_token_freshness() {
        let fresh = AccessToken {
            token: "t".to_string(),
            expires_on: Some(Utc::now() + chrono::Duration::minutes(30)),
            tenant_id: None,
        };
        let stale = AccessToken {
            token: "t".to_string(),
            expires_on: Some(Utc::now() + chrono::Duration::seconds(30)),
            tenant_id: None,
        };
        assert!(fresh.is_fresh(chrono::Duration::minutes(5)));
        assert!(!stale.is_fresh(chrono::Duration::minutes(5)));
    }
}
