//! Container group deployment template.
//!
//! Typed model of the resource manager template that runs the mock service
//! in a container group with the project's file share mounted.

use rapidapi_core::credentials::ImageCredentials;
use rapidapi_core::runtime::CONTAINER_PORT;
use rapidapi_core::{Error, Project, Result};
use serde::Serialize;

pub const TEMPLATE_SCHEMA: &str =
    "https://schema.management.azure.com/schemas/2015-01-01/deploymentTemplate.json#";
pub const CONTAINER_GROUP_TYPE: &str = "Microsoft.ContainerInstance/containerGroups";
pub const CONTAINER_GROUP_API_VERSION: &str = "2019-12-01";

/// Directory in the file share that holds the schema.
pub const SCHEMA_DIRECTORY: &str = "schema";
/// Schema file name inside [`SCHEMA_DIRECTORY`].
pub const SCHEMA_FILE_NAME: &str = "Project.csdl";
/// Mount point of the file share inside the container.
pub const DATA_MOUNT_PATH: &str = "/mnt/data";

const CPU_CORES: f64 = 1.0;
const MEMORY_IN_GB: f64 = 1.5;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentTemplate {
    #[serde(rename = "$schema")]
    pub schema: String,
    pub content_version: String,
    pub variables: TemplateVariables,
    pub resources: Vec<ContainerGroupResource>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateVariables {
    pub container_image: String,
    pub container_name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerGroupResource {
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub api_version: String,
    pub location: String,
    pub properties: ContainerGroupProperties,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerGroupProperties {
    pub containers: Vec<Container>,
    pub os_type: String,
    pub ip_address: IpAddress,
    pub volumes: Vec<Volume>,
    pub image_registry_credentials: Vec<RegistryCredential>,
}

#[derive(Serialize)]
pub struct Container {
    pub name: String,
    pub properties: ContainerProperties,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerProperties {
    pub image: String,
    pub resources: ContainerResources,
    pub ports: Vec<Port>,
    pub volume_mounts: Vec<VolumeMount>,
    pub environment_variables: Vec<EnvironmentVariable>,
}

#[derive(Serialize)]
pub struct ContainerResources {
    pub requests: ResourceRequests,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequests {
    pub cpu: f64,
    pub memory_in_gb: f64,
}

#[derive(Serialize)]
pub struct Port {
    pub port: u16,
    pub protocol: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
}

#[derive(Serialize)]
pub struct EnvironmentVariable {
    pub name: String,
    pub value: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IpAddress {
    #[serde(rename = "type")]
    pub address_type: String,
    pub ports: Vec<Port>,
    pub dns_name_label: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub name: String,
    pub azure_file: AzureFileVolume,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureFileVolume {
    pub share_name: String,
    pub storage_account_name: String,
    pub storage_account_key: String,
}

#[derive(Serialize)]
pub struct RegistryCredential {
    pub server: String,
    pub username: String,
    pub password: String,
}

/// Build the container group template for a provisioned project.
///
/// The project must already carry its storage account key.
pub fn container_group_template(
    project: &Project,
    image: &ImageCredentials,
) -> Result<DeploymentTemplate> {
    let account_key = project.storage_account_key.clone().ok_or_else(|| {
        Error::Internal(format!(
            "storage account key for {} is not known",
            project.app_id
        ))
    })?;
    let connection_string = project
        .storage_connection_string()
        .unwrap_or_default();

    let app_id = project.app_id.to_string();
    let volume_name = format!("vol{}", app_id);
    let http = || Port {
        port: CONTAINER_PORT,
        protocol: "tcp".to_string(),
    };

    let env = [
        ("IS_REMOTE_ENV", "true".to_string()),
        ("SEED_DATA", project.seed_data.to_string()),
        ("AZURE_FILE_SHARE_NAME", project.file_share_name.clone()),
        ("AZURE_STORAGE_CONNECTION_STRING", connection_string),
        ("AZURE_FILE_CSDL_DIR", SCHEMA_DIRECTORY.to_string()),
        ("AZURE_FILE_CSDL_FILE", SCHEMA_FILE_NAME.to_string()),
    ]
    .into_iter()
    .map(|(name, value)| EnvironmentVariable {
        name: name.to_string(),
        value,
    })
    .collect();

    let image_registry_credentials = vec![RegistryCredential {
        server: image.registry_server.clone(),
        username: image.registry_username.clone(),
        password: image.registry_password.clone(),
    }];

    Ok(DeploymentTemplate {
        schema: TEMPLATE_SCHEMA.to_string(),
        content_version: "1.0.0.0".to_string(),
        variables: TemplateVariables {
            container_image: image.image_name.clone(),
            container_name: app_id.clone(),
        },
        resources: vec![ContainerGroupResource {
            name: app_id.clone(),
            resource_type: CONTAINER_GROUP_TYPE.to_string(),
            api_version: CONTAINER_GROUP_API_VERSION.to_string(),
            location: "[resourceGroup().location]".to_string(),
            properties: ContainerGroupProperties {
                containers: vec![Container {
                    name: "[variables('containerName')]".to_string(),
                    properties: ContainerProperties {
                        image: "[variables('containerImage')]".to_string(),
                        resources: ContainerResources {
                            requests: ResourceRequests {
                                cpu: CPU_CORES,
                                memory_in_gb: MEMORY_IN_GB,
                            },
                        },
                        ports: vec![http()],
                        volume_mounts: vec![VolumeMount {
                            name: volume_name.clone(),
                            mount_path: DATA_MOUNT_PATH.to_string(),
                        }],
                        environment_variables: env,
                    },
                }],
                os_type: "Linux".to_string(),
                ip_address: IpAddress {
                    address_type: "Public".to_string(),
                    ports: vec![http()],
                    dns_name_label: app_id,
                },
                volumes: vec![Volume {
                    name: volume_name,
                    azure_file: AzureFileVolume {
                        share_name: project.file_share_name.clone(),
                        storage_account_name: project.storage_account_name.clone(),
                        storage_account_key: account_key,
                    },
                }],
                image_registry_credentials,
            },
        }],
    })
}
