//! Application settings parsing.
//!
//! Settings live in an optional `settings.kdl` next to the project records:
//!
//! ```kdl
//! image "rapidapiregistry.azurecr.io/rapidapimockserv:latest" server="rapidapiregistry.azurecr.io"
//! region "centralus"
//! key-vault url="https://example.vault.azure.net" tenant="<tenant>" {
//!     secrets name="ImageName" server="ImageServer" username="ImageUsername" password="ImagePassword"
//! }
//! ```

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
pub use rapidapi_core::credentials::SecretNames;
use rapidapi_core::project::DEFAULT_REGION;
use std::path::{Path, PathBuf};
use url::Url;

pub const DEFAULT_IMAGE: &str = "rapidapiregistry.azurecr.io/rapidapimockserv:latest";
pub const SETTINGS_FILE: &str = "settings.kdl";

/// Application-wide settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub image: ImageSettings,
    /// Region new remote deployments are created in.
    pub region: String,
    /// Secret store holding the registry credentials.
    pub key_vault: Option<KeyVaultSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            image: ImageSettings::from_name(DEFAULT_IMAGE),
            region: DEFAULT_REGION.to_string(),
            key_vault: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSettings {
    pub name: String,
    pub server: String,
}

impl ImageSettings {
    /// Settings for an image, taking the registry server from its reference.
    pub fn from_name(name: &str) -> Self {
        let server = name
            .split_once('/')
            .map(|(host, _)| host.to_string())
            .unwrap_or_default();
        Self {
            name: name.to_string(),
            server,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyVaultSettings {
    pub url: Url,
    pub tenant: Option<String>,
    pub secrets: SecretNames,
}

impl Settings {
    /// Load settings from a file. A missing file yields the defaults.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => parse_settings(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Platform directory holding settings and project records.
pub fn default_data_dir() -> ConfigResult<PathBuf> {
    dirs::data_local_dir()
        .map(|dir| dir.join("rapidapi"))
        .ok_or(ConfigError::NoDataDir)
}

/// Parse settings from KDL text.
pub fn parse_settings(kdl: &str) -> ConfigResult<Settings> {
    let doc: KdlDocument = kdl.parse()?;
    let mut settings = Settings::default();

    for node in doc.nodes() {
        match node.name().value() {
            "image" => {
                let name = get_first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("image name".to_string()))?;
                let mut image = ImageSettings::from_name(&name);
                if let Some(server) = get_string_prop(node, "server") {
                    image.server = server;
                }
                settings.image = image;
            }
            "region" => {
                settings.region = get_first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("region".to_string()))?;
            }
            "key-vault" => {
                settings.key_vault = Some(parse_key_vault(node)?);
            }
            _ => {} // Ignore unknown nodes
        }
    }

    if settings.image.server.is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "image".to_string(),
            message: "cannot determine the registry server; set server=".to_string(),
        });
    }

    Ok(settings)
}

fn parse_key_vault(node: &KdlNode) -> ConfigResult<KeyVaultSettings> {
    let raw_url = get_string_prop(node, "url")
        .ok_or_else(|| ConfigError::MissingField("key-vault url".to_string()))?;
    let url = Url::parse(&raw_url).map_err(|e| ConfigError::InvalidValue {
        field: "key-vault url".to_string(),
        message: e.to_string(),
    })?;

    let mut secrets = SecretNames::default();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            if child.name().value() == "secrets" {
                if let Some(name) = get_string_prop(child, "name") {
                    secrets.name = name;
                }
                if let Some(server) = get_string_prop(child, "server") {
                    secrets.server = server;
                }
                if let Some(username) = get_string_prop(child, "username") {
                    secrets.username = username;
                }
                if let Some(password) = get_string_prop(child, "password") {
                    secrets.password = password;
                }
            }
        }
    }

    Ok(KeyVaultSettings {
        url,
        tenant: get_string_prop(node, "tenant"),
        secrets,
    })
}

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}
