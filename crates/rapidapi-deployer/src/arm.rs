//! Azure Resource Manager provider.
//!
//! Talks to the management REST API with bearer tokens from a
//! [`TokenSource`]. Asynchronous operations (`201`/`202` with an
//! `Azure-AsyncOperation` or `Location` header) are polled to completion.

use crate::auth::{AzureCliTokenSource, MANAGEMENT_RESOURCE};
use crate::files::FileShareClient;
use async_trait::async_trait;
use bytes::Bytes;
use rapidapi_core::cloud::{
    CloudConnector, CloudProvider, CloudSession, CloudTarget, FileShareTarget,
};
use rapidapi_core::credentials::TokenSource;
use rapidapi_core::{Error, Result};
use reqwest::header::{HeaderMap, LOCATION, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

pub const MANAGEMENT_ENDPOINT: &str = "https://management.azure.com";

const RESOURCES_API: &str = "2021-04-01";
const SUBSCRIPTIONS_API: &str = "2020-01-01";
const STORAGE_API: &str = "2023-01-01";
const CONTAINER_INSTANCE_API: &str = "2021-10-01";

const ASYNC_OPERATION: &str = "azure-asyncoperation";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Resource manager client for one tenant and subscription.
pub struct AzureResourceManager {
    client: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
    target: CloudTarget,
    endpoint: String,
    subscription: OnceCell<String>,
    poll_interval: Duration,
}

impl AzureResourceManager {
    pub fn new(client: reqwest::Client, tokens: Arc<dyn TokenSource>, target: CloudTarget) -> Self {
        Self {
            client,
            tokens,
            target,
            endpoint: MANAGEMENT_ENDPOINT.to_string(),
            subscription: OnceCell::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn subscription_id(&self) -> Result<&str> {
        let id = self
            .subscription
            .get_or_try_init(|| async {
                match self.target.subscription_id.as_deref() {
                    Some(id) if !id.trim().is_empty() => Ok(id.to_string()),
                    _ => self.default_subscription().await,
                }
            })
            .await?;
        Ok(id.as_str())
    }

    /// First enabled subscription of the signed-in account in the target tenant.
    async fn default_subscription(&self) -> Result<String> {
        let url = self.url("/subscriptions", SUBSCRIPTIONS_API);
        let body = self.execute(Method::GET, &url, None).await?;
        let list: SubscriptionList = serde_json::from_value(body)
            .map_err(|e| Error::Cloud(format!("unexpected subscription list: {}", e)))?;

        let chosen = pick_default_subscription(&list.value, &self.target.tenant_id).ok_or_else(|| {
            Error::NotFound(format!(
                "no enabled subscription found in tenant {}",
                self.target.tenant_id
            ))
        })?;
        info!(subscription = %chosen, "Using default subscription");
        Ok(chosen)
    }

    async fn group_path(&self, resource_group: &str) -> Result<String> {
        Ok(format!(
            "/subscriptions/{}/resourcegroups/{}",
            self.subscription_id().await?,
            resource_group
        ))
    }

    async fn storage_path(&self, resource_group: &str, account: &str) -> Result<String> {
        Ok(format!(
            "{}/providers/Microsoft.Storage/storageAccounts/{}",
            self.group_path(resource_group).await?,
            account
        ))
    }

    fn url(&self, path: &str, api_version: &str) -> String {
        format!("{}{}?api-version={}", self.endpoint, path, api_version)
    }

    async fn send(&self, method: Method, url: &str, body: Option<&Value>) -> Result<reqwest::Response> {
        let token = self.tokens.token(MANAGEMENT_RESOURCE).await?;
        let mut request = self
            .client
            .request(method.clone(), url)
            .bearer_auth(&token.token);
        if let Some(body) = body {
            request = request.json(body);
        }

        debug!(method = %method, url = %url, "Resource manager request");
        request
            .send()
            .await
            .map_err(|e| Error::Cloud(format!("request to {} failed: {}", url, e)))
    }

    /// Send a request and wait for any asynchronous operation it starts.
    async fn execute(&self, method: Method, url: &str, body: Option<&Value>) -> Result<Value> {
        let response = self.send(method, url, body).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(api_error(response).await);
        }

        let headers = response.headers().clone();
        let text = response.text().await.unwrap_or_default();
        let value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::Null)
        };

        if matches!(status, StatusCode::CREATED | StatusCode::ACCEPTED) {
            self.wait_for_operation(&headers).await?;
        }
        Ok(value)
    }

    async fn wait_for_operation(&self, headers: &HeaderMap) -> Result<()> {
        if let Some(url) = header_str(headers, ASYNC_OPERATION) {
            return self.poll_async_operation(url, retry_after(headers)).await;
        }
        if let Some(url) = header_str(headers, LOCATION.as_str()) {
            return self.poll_location(url, retry_after(headers)).await;
        }
        Ok(())
    }

    async fn poll_async_operation(&self, url: String, mut delay: Option<Duration>) -> Result<()> {
        loop {
            tokio::time::sleep(delay.unwrap_or(self.poll_interval)).await;
            let response = self.send(Method::GET, &url, None).await?;
            if !response.status().is_success() {
                return Err(api_error(response).await);
            }
            delay = retry_after(response.headers());
            let operation: OperationStatus = response
                .json()
                .await
                .map_err(|e| Error::Cloud(format!("unexpected operation status: {}", e)))?;

            match operation.status.as_str() {
                "Succeeded" => return Ok(()),
                "Failed" | "Canceled" | "Cancelled" => {
                    let detail = operation
                        .error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| operation.status.clone());
                    return Err(Error::Cloud(detail));
                }
                other => debug!(status = %other, "Operation in progress"),
            }
        }
    }

    async fn poll_location(&self, url: String, mut delay: Option<Duration>) -> Result<()> {
        loop {
            tokio::time::sleep(delay.unwrap_or(self.poll_interval)).await;
            let response = self.send(Method::GET, &url, None).await?;
            match response.status() {
                StatusCode::ACCEPTED => {
                    delay = retry_after(response.headers());
                    debug!("Operation in progress");
                }
                s if s.is_success() => return Ok(()),
                _ => return Err(api_error(response).await),
            }
        }
    }
}

#[async_trait]
impl CloudProvider for AzureResourceManager {
    fn name(&self) -> &'static str {
        "azure"
    }

    async fn authenticate(&self) -> Result<CloudSession> {
        self.tokens.token(MANAGEMENT_RESOURCE).await?;
        let subscription_id = self.subscription_id().await?.to_string();
        Ok(CloudSession {
            tenant_id: self.target.tenant_id.clone(),
            subscription_id,
        })
    }

    async fn create_resource_group(&self, name: &str, region: &str) -> Result<()> {
        let url = self.url(&self.group_path(name).await?, RESOURCES_API);
        self.execute(Method::PUT, &url, Some(&json!({ "location": region })))
            .await?;
        info!(resource_group = %name, region = %region, "Resource group ready");
        Ok(())
    }

    async fn resource_group_exists(&self, name: &str) -> Result<bool> {
        let url = self.url(&self.group_path(name).await?, RESOURCES_API);
        let response = self.send(Method::HEAD, &url, None).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            _ => Err(api_error(response).await),
        }
    }

    async fn create_storage_account(
        &self,
        resource_group: &str,
        account: &str,
        region: &str,
    ) -> Result<()> {
        let url = self.url(&self.storage_path(resource_group, account).await?, STORAGE_API);
        let body = json!({
            "location": region,
            "kind": "StorageV2",
            "sku": { "name": "Standard_LRS" },
            "properties": {
                "networkAcls": { "defaultAction": "Allow" }
            }
        });
        self.execute(Method::PUT, &url, Some(&body)).await?;
        info!(account = %account, "Storage account ready");
        Ok(())
    }

    async fn storage_account_keys(&self, resource_group: &str, account: &str) -> Result<Vec<String>> {
        let path = format!("{}/listKeys", self.storage_path(resource_group, account).await?);
        let body = self
            .execute(Method::POST, &self.url(&path, STORAGE_API), None)
            .await?;
        let keys: KeyList = serde_json::from_value(body)
            .map_err(|e| Error::Cloud(format!("unexpected key list: {}", e)))?;
        Ok(keys.keys.into_iter().map(|k| k.value).collect())
    }

    async fn create_file_share(&self, resource_group: &str, account: &str, share: &str) -> Result<()> {
        let path = format!(
            "{}/fileServices/default/shares/{}",
            self.storage_path(resource_group, account).await?,
            share
        );
        self.execute(
            Method::PUT,
            &self.url(&path, STORAGE_API),
            Some(&json!({ "properties": {} })),
        )
        .await?;
        info!(share = %share, "File share ready");
        Ok(())
    }

    async fn upload_file(
        &self,
        target: &FileShareTarget,
        directory: &str,
        file_name: &str,
        contents: Bytes,
    ) -> Result<()> {
        FileShareClient::new(self.client.clone(), target.clone())?
            .upload(directory, file_name, contents)
            .await
    }

    async fn deploy_template(
        &self,
        resource_group: &str,
        deployment_name: &str,
        template: Value,
    ) -> Result<()> {
        let path = format!(
            "{}/providers/Microsoft.Resources/deployments/{}",
            self.group_path(resource_group).await?,
            deployment_name
        );
        let body = json!({
            "properties": {
                "mode": "Incremental",
                "template": template,
                "parameters": {}
            }
        });
        self.execute(Method::PUT, &self.url(&path, RESOURCES_API), Some(&body))
            .await?;
        info!(deployment = %deployment_name, "Template deployed");
        Ok(())
    }

    async fn restart_container_group(&self, resource_group: &str, name: &str) -> Result<()> {
        let path = format!(
            "{}/providers/Microsoft.ContainerInstance/containerGroups/{}/restart",
            self.group_path(resource_group).await?,
            name
        );
        self.execute(Method::POST, &self.url(&path, CONTAINER_INSTANCE_API), None)
            .await?;
        info!(container_group = %name, "Container group restarted");
        Ok(())
    }

    async fn delete_resource_group(&self, name: &str) -> Result<()> {
        let url = self.url(&self.group_path(name).await?, RESOURCES_API);
        match self.execute(Method::DELETE, &url, None).await {
            Ok(_) => {
                info!(resource_group = %name, "Resource group deleted");
                Ok(())
            }
            Err(Error::NotFound(_)) => {
                debug!(resource_group = %name, "Resource group already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Connects providers that sign in through the Azure CLI.
#[derive(Clone, Default)]
pub struct AzureConnector {
    client: reqwest::Client,
}

impl AzureConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CloudConnector for AzureConnector {
    fn connect(&self, target: &CloudTarget) -> Result<Arc<dyn CloudProvider>> {
        let tokens = Arc::new(AzureCliTokenSource::new(Some(target.tenant_id.clone())));
        Ok(Arc::new(AzureResourceManager::new(
            self.client.clone(),
            tokens,
            target.clone(),
        )))
    }
}

#[derive(Debug, Deserialize)]
struct SubscriptionList {
    #[serde(default)]
    value: Vec<SubscriptionEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionEntry {
    subscription_id: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    tenant_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KeyList {
    #[serde(default)]
    keys: Vec<StorageKey>,
}

#[derive(Debug, Deserialize)]
struct StorageKey {
    value: String,
}

#[derive(Debug, Deserialize)]
struct OperationStatus {
    status: String,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl std::fmt::Display for ApiErrorBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code.is_empty(), self.message.is_empty()) {
            (false, false) => write!(f, "{}: {}", self.code, self.message),
            (true, false) => write!(f, "{}", self.message),
            _ => write!(f, "{}", self.code),
        }
    }
}

fn pick_default_subscription(entries: &[SubscriptionEntry], tenant_id: &str) -> Option<String> {
    entries
        .iter()
        .filter(|s| s.state.eq_ignore_ascii_case("enabled"))
        .find(|s| {
            s.tenant_id
                .as_deref()
                .is_none_or(|t| t.eq_ignore_ascii_case(tenant_id))
        })
        .map(|s| s.subscription_id.clone())
}

async fn api_error(response: reqwest::Response) -> Error {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    classify(status, &text)
}

fn classify(status: StatusCode, body: &str) -> Error {
    let message = serde_json::from_str::<ApiErrorEnvelope>(body)
        .map(|e| e.error.to_string())
        .unwrap_or_else(|_| format!("{} {}", status, body.trim()).trim().to_string());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Unauthorized(message),
        StatusCode::NOT_FOUND => Error::NotFound(message),
        StatusCode::CONFLICT => Error::Conflict(message),
        _ => Error::Cloud(message),
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rapidapi_core::credentials::AccessToken;
    use reqwest::header::HeaderValue;

    struct FixedToken;

    #[async_trait]
    impl TokenSource for FixedToken {
        async fn token(&self, _resource: &str) -> Result<AccessToken> {
            Ok(AccessToken {
                token: "token".to_string(),
                expires_on: None,
                tenant_id: None,
            })
        }
    }

    fn manager(subscription: Option<&str>) -> AzureResourceManager {
        AzureResourceManager::new(
            reqwest::Client::new(),
            Arc::new(FixedToken),
            CloudTarget {
                tenant_id: "tenant-1".to_string(),
                subscription_id: subscription.map(str::to_string),
            },
        )
    }

    #[tokio::test]
    async fn test_paths_use_explicit_subscription() {
        let arm = manager(Some("sub-1"));
        assert_eq!(
            arm.group_path("rgdemoapp").await.unwrap(),
            "/subscriptions/sub-1/resourcegroups/rgdemoapp"
        );
        assert_eq!(
            arm.url(&arm.storage_path("rgdemoapp", "stdemoapp").await.unwrap(), STORAGE_API),
            "https://management.azure.com/subscriptions/sub-1/resourcegroups/rgdemoapp\
             /providers/Microsoft.Storage/storageAccounts/stdemoapp?api-version=2023-01-01"
        );
    }

    #[tokio::test]
    async fn test_authenticate_with_explicit_subscription() {
        let session = manager(Some("sub-1")).authenticate().await.unwrap();
        assert_eq!(session.tenant_id, "tenant-1");
        assert_eq!(session.subscription_id, "sub-1");
    }

    #[test]
    fn test_default_subscription_picks_first_enabled_in_tenant() {
        let entries: SubscriptionList = serde_json::from_value(json!({
            "value": [
                { "subscriptionId": "disabled", "state": "Disabled", "tenantId": "tenant-1" },
                { "subscriptionId": "elsewhere", "state": "Enabled", "tenantId": "tenant-2" },
                { "subscriptionId": "chosen", "state": "Enabled", "tenantId": "tenant-1" },
                { "subscriptionId": "later", "state": "Enabled", "tenantId": "tenant-1" }
            ]
        }))
        .unwrap();

        assert_eq!(
            pick_default_subscription(&entries.value, "tenant-1").as_deref(),
            Some("chosen")
        );
        assert_eq!(pick_default_subscription(&entries.value, "tenant-9"), None);
    }

    #[test]
    fn test_classify_errors() {
        let body = r#"{"error":{"code":"AuthorizationFailed","message":"no access"}}"#;
        match classify(StatusCode::FORBIDDEN, body) {
            Error::Unauthorized(message) => assert_eq!(message, "AuthorizationFailed: no access"),
            other => panic!("Expected Unauthorized, got {:?}", other),
        }

        assert!(matches!(
            classify(StatusCode::NOT_FOUND, r#"{"error":{"code":"ResourceGroupNotFound"}}"#),
            Error::NotFound(_)
        ));
        assert!(matches!(classify(StatusCode::CONFLICT, ""), Error::Conflict(_)));

        match classify(StatusCode::BAD_GATEWAY, "upstream down") {
            Error::Cloud(message) => assert!(message.contains("upstream down")),
            other => panic!("Expected Cloud, got {:?}", other),
        }
    }

    #[test]
    fn test_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("17"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(17)));
    }

    #[test]
    fn test_operation_status_error_text() {
        let status: OperationStatus = serde_json::from_value(json!({
            "status": "Failed",
            "error": { "code": "InvalidTemplate", "message": "bad template" }
        }))
        .unwrap();
        assert_eq!(status.error.unwrap().to_string(), "InvalidTemplate: bad template");
    }

    #[test]
    fn test_connector_builds_provider() {
        let provider = AzureConnector::new()
            .connect(&CloudTarget {
                tenant_id: "tenant-1".to_string(),
                subscription_id: None,
            })
            .unwrap();
        assert_eq!(provider.name(), "azure");
    }

    /// Requires `az login`. Run with: cargo test -- --ignored
    #[tokio::test]
    #[ignore]
    async fn test_live_default_subscription() {
        let tokens = Arc::new(AzureCliTokenSource::new(None).non_interactive());
        let token = tokens.token(MANAGEMENT_RESOURCE).await.unwrap();
        let arm = AzureResourceManager::new(
            reqwest::Client::new(),
            tokens,
            CloudTarget {
                tenant_id: token.tenant_id.unwrap_or_default(),
                subscription_id: None,
            },
        );
        let session = arm.authenticate().await.unwrap();
        assert!(!session.subscription_id.is_empty());
    }
}
