//! Orchestration facade.
//!
//! Turns user requests into calls on the supervisor, the provisioner and the
//! record store. Every failure is returned to the caller; nothing here prints
//! or exits.

use crate::resolve::{resolve_subscription, resolve_tenant};
use rand::Rng;
use rapidapi_config::ProjectStore;
use rapidapi_core::cloud::{CloudConnector, CloudTarget};
use rapidapi_core::credentials::CredentialProvider;
use rapidapi_core::project::local_service_url;
use rapidapi_core::runtime::ContainerRuntime;
use rapidapi_core::schema::SchemaValidator;
use rapidapi_core::{AppId, Deployment, Error, Project, Result, RootConfig, RunArgs};
use rapidapi_deployer::{ProvisionEvent, RemoteProvisioner};
use rapidapi_executor::{ContainerSupervisor, LocalRunSpec, SupervisorEvent, SupervisorSession};
use std::future::Future;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

/// Ports a local run picks from when none is requested.
pub const LOCAL_PORT_RANGE: Range<u16> = 4000..9000;

/// The components a facade drives.
#[derive(Clone)]
pub struct Backends {
    pub validator: Arc<dyn SchemaValidator>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub cloud: Arc<dyn CloudConnector>,
}

/// Tenant and subscription given on the command line, if any.
#[derive(Debug, Clone, Default)]
pub struct CloudOverrides {
    pub tenant: Option<String>,
    pub subscription: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LocalRequest {
    pub schema_path: Option<PathBuf>,
    pub port: Option<u16>,
    pub run_args: RunArgs,
}

#[derive(Debug, Clone, Default)]
pub struct CreateRequest {
    pub app_id: Option<String>,
    pub schema_path: Option<PathBuf>,
    pub cloud: CloudOverrides,
    pub run_args: RunArgs,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateRequest {
    pub app_id: Option<String>,
    pub schema_path: Option<PathBuf>,
    pub cloud: CloudOverrides,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteRequest {
    pub app_id: Option<String>,
    pub cloud: CloudOverrides,
}

/// Composes the supervisor, provisioner and record store.
pub struct Orchestrator {
    store: ProjectStore,
    root_config: RootConfig,
    backends: Backends,
    region: String,
    progress: Option<UnboundedSender<ProvisionEvent>>,
}

impl Orchestrator {
    pub fn new(
        store: ProjectStore,
        root_config: RootConfig,
        backends: Backends,
        region: impl Into<String>,
    ) -> Self {
        Self {
            store,
            root_config,
            backends,
            region: region.into(),
            progress: None,
        }
    }

    /// Report remote provisioning progress on `progress`.
    pub fn with_progress(mut self, progress: UnboundedSender<ProvisionEvent>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Start the service locally and keep it in step with its schema file.
    ///
    /// Supervisor notifications go to `events`. The returned run must be
    /// finished with [`LocalRun::serve_until`] to remove the container.
    pub async fn deploy_local(
        &self,
        request: LocalRequest,
        events: UnboundedSender<SupervisorEvent>,
    ) -> Result<LocalRun> {
        let schema_path = require_schema(request.schema_path)?;
        let port = request.port.unwrap_or_else(random_port);
        let image = self.backends.credentials.get_credentials().await?;

        info!(schema = %schema_path.display(), port, "Starting local service");
        let supervisor = ContainerSupervisor::new(
            self.backends.runtime.clone(),
            self.backends.validator.clone(),
            events,
        );
        let session = supervisor
            .start(LocalRunSpec {
                schema_path,
                port,
                run_args: request.run_args,
                image,
            })
            .await?;

        Ok(LocalRun { session })
    }

    /// Provision a new remote deployment and record it.
    pub async fn deploy_remote(&self, request: CreateRequest) -> Result<Deployment> {
        let app_id = require_app_id(
            request.app_id.as_deref(),
            "Please specify unique app name for remote deployment",
        )?;
        let schema_path = require_schema(request.schema_path)?;

        if self.store.exists(app_id.as_str())? {
            return Err(Error::Conflict(format!(
                "app '{}' already exists; update or delete it instead",
                app_id
            )));
        }

        let provisioner = self.provisioner(&request.cloud, None)?;
        let deployment = provisioner
            .create(&app_id, &schema_path, request.run_args)
            .await?;
        self.store.save(&deployment.project)?;
        Ok(deployment)
    }

    /// Push a new schema to an existing remote deployment.
    ///
    /// The record is rewritten only when the update succeeds.
    pub async fn update_remote(&self, request: UpdateRequest) -> Result<Project> {
        let app_id = require_app_id(request.app_id.as_deref(), "Please specify the app to update")?;
        let schema_path = require_schema(request.schema_path)?;
        let project = self.store.load(app_id.as_str())?;

        let provisioner = self.provisioner(&request.cloud, Some(&project))?;
        let updated = provisioner.update_schema(&project, &schema_path).await?;
        self.store.save(&updated)?;
        Ok(updated)
    }

    /// Tear down a remote deployment, then forget it.
    pub async fn delete_remote(&self, request: DeleteRequest) -> Result<Project> {
        let app_id = require_app_id(request.app_id.as_deref(), "Please specify the app to delete")?;
        let project = self.store.load(app_id.as_str())?;

        let provisioner = self.provisioner(&request.cloud, Some(&project))?;
        provisioner.delete(&project).await?;
        self.store.delete(app_id.as_str())?;
        Ok(project)
    }

    /// Merge `update` into the stored defaults and return the result.
    pub fn set_config(&mut self, update: &RootConfig) -> Result<RootConfig> {
        let merged = self.store.save_root_config(update)?;
        self.root_config = merged.clone();
        Ok(merged)
    }

    pub fn show_config(&self) -> &RootConfig {
        &self.root_config
    }

    pub fn list_projects(&self) -> Result<Vec<Project>> {
        Ok(self.store.list_all()?)
    }

    pub fn validate(&self, schema_path: &Path) -> Result<()> {
        self.backends.validator.validate(schema_path)
    }

    fn provisioner(
        &self,
        overrides: &CloudOverrides,
        project: Option<&Project>,
    ) -> Result<RemoteProvisioner> {
        let target = CloudTarget {
            tenant_id: resolve_tenant(overrides.tenant.as_deref(), project, &self.root_config)?,
            subscription_id: resolve_subscription(
                overrides.subscription.as_deref(),
                project,
                &self.root_config,
            ),
        };
        info!(
            tenant = %target.tenant_id,
            subscription = ?target.subscription_id,
            "Resolved cloud target"
        );

        let region = project
            .and_then(|p| p.region.clone())
            .unwrap_or_else(|| self.region.clone());
        let provisioner = RemoteProvisioner::new(
            self.backends.cloud.connect(&target)?,
            self.backends.validator.clone(),
            self.backends.credentials.clone(),
            region,
        );
        Ok(match &self.progress {
            Some(progress) => provisioner.with_events(progress.clone()),
            None => provisioner,
        })
    }
}

/// A local service that is up and watching its schema.
pub struct LocalRun {
    session: SupervisorSession,
}

impl LocalRun {
    pub fn port(&self) -> u16 {
        self.session.port()
    }

    pub fn url(&self) -> String {
        local_service_url(self.session.port())
    }

    pub fn session(&self) -> &SupervisorSession {
        &self.session
    }

    /// Serve until `shutdown` resolves, then stop and remove the container.
    pub async fn serve_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        shutdown.await;
        let result = self.session.stop().await;
        if let Err(e) = &result {
            warn!(error = %e, "Failed to stop local service cleanly");
        }
        result
    }
}

fn require_app_id(value: Option<&str>, missing: &str) -> Result<AppId> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(raw) => AppId::parse(raw),
        None => Err(Error::InvalidInput(missing.to_string())),
    }
}

fn require_schema(value: Option<PathBuf>) -> Result<PathBuf> {
    let path = value
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| {
            Error::InvalidInput("Please specify the schema file for your project".to_string())
        })?;
    Ok(std::path::absolute(&path)?)
}

fn random_port() -> u16 {
    rand::rng().random_range(LOCAL_PORT_RANGE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use rapidapi_core::cloud::{CloudProvider, CloudSession, FileShareTarget};
    use rapidapi_core::credentials::ImageCredentials;
    use rapidapi_core::runtime::{ContainerHandle, ContainerSpec};
    use rapidapi_deployer::StaticCredentialProvider;
    use serde_json::Value;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct MockCloud {
        calls: Mutex<Vec<String>>,
        fail_on: Mutex<Option<&'static str>>,
    }

    impl MockCloud {
        fn record(&self, call: &'static str) -> Result<()> {
            self.calls.lock().unwrap().push(call.to_string());
            if *self.fail_on.lock().unwrap() == Some(call) {
                return Err(Error::Cloud(format!("{} failed", call)));
            }
            Ok(())
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CloudProvider for MockCloud {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn authenticate(&self) -> Result<CloudSession> {
            self.record("authenticate")?;
            Ok(CloudSession {
                tenant_id: "tenant-1".to_string(),
                subscription_id: "sub-1".to_string(),
            })
        }

        async fn create_resource_group(&self, _name: &str, _region: &str) -> Result<()> {
            self.record("create_resource_group")
        }

        async fn resource_group_exists(&self, _name: &str) -> Result<bool> {
            self.record("resource_group_exists")?;
            Ok(false)
        }

        async fn create_storage_account(&self, _rg: &str, _account: &str, _region: &str) -> Result<()> {
            self.record("create_storage_account")
        }

        async fn storage_account_keys(&self, _rg: &str, _account: &str) -> Result<Vec<String>> {
            self.record("storage_account_keys")?;
            Ok(vec!["a2V5".to_string()])
        }

        async fn create_file_share(&self, _rg: &str, _account: &str, _share: &str) -> Result<()> {
            self.record("create_file_share")
        }

        async fn upload_file(
            &self,
            _target: &FileShareTarget,
            _directory: &str,
            _file_name: &str,
            _contents: Bytes,
        ) -> Result<()> {
            self.record("upload_file")
        }

        async fn deploy_template(&self, _rg: &str, _name: &str, _template: Value) -> Result<()> {
            self.record("deploy_template")
        }

        async fn restart_container_group(&self, _rg: &str, _name: &str) -> Result<()> {
            self.record("restart_container_group")
        }

        async fn delete_resource_group(&self, _name: &str) -> Result<()> {
            self.record("delete_resource_group")
        }
    }

    /// Hands out one shared mock cloud and remembers each target.
    struct MockConnector {
        cloud: Arc<MockCloud>,
        targets: Mutex<Vec<CloudTarget>>,
    }

    impl CloudConnector for MockConnector {
        fn connect(&self, target: &CloudTarget) -> Result<Arc<dyn CloudProvider>> {
            self.targets.lock().unwrap().push(target.clone());
            Ok(self.cloud.clone())
        }
    }

    #[derive(Default)]
    struct MockRuntime {
        live: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ContainerRuntime for MockRuntime {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn pull(&self, _image: &ImageCredentials) -> Result<()> {
            Ok(())
        }

        async fn run(&self, spec: ContainerSpec) -> Result<ContainerHandle> {
            self.live.lock().unwrap().push(spec.name.clone());
            Ok(ContainerHandle {
                name: spec.name.clone(),
                runtime_id: format!("id-{}", spec.name),
                runtime_name: "mock".to_string(),
            })
        }

        async fn remove(&self, handle: &ContainerHandle) -> Result<()> {
            self.live.lock().unwrap().retain(|n| n != &handle.name);
            Ok(())
        }
    }

    struct PrefixValidator;

    impl SchemaValidator for PrefixValidator {
        fn validate_contents(&self, contents: &[u8]) -> Result<()> {
            if String::from_utf8_lossy(contents).trim_start().starts_with('<') {
                Ok(())
            } else {
                Err(Error::InvalidSchema("not XML".to_string()))
            }
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        cloud: Arc<MockCloud>,
        connector: Arc<MockConnector>,
        runtime: Arc<MockRuntime>,
        orchestrator: Orchestrator,
    }

    impl Fixture {
        fn schema(&self, name: &str, content: &str) -> PathBuf {
            let path = self.dir.path().join(name);
            std::fs::write(&path, content).unwrap();
            path
        }

        fn store(&self) -> ProjectStore {
            ProjectStore::open(self.dir.path().join("data")).unwrap()
        }

        fn targets(&self) -> Vec<CloudTarget> {
            self.connector.targets.lock().unwrap().clone()
        }
    }

    fn fixture(root_config: RootConfig) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::open(dir.path().join("data")).unwrap();
        let cloud = Arc::new(MockCloud::default());
        let connector = Arc::new(MockConnector {
            cloud: cloud.clone(),
            targets: Mutex::new(Vec::new()),
        });
        let runtime = Arc::new(MockRuntime::default());

        let backends = Backends {
            validator: Arc::new(PrefixValidator),
            credentials: Arc::new(StaticCredentialProvider::new(ImageCredentials {
                image_name: "registry.example/mock:latest".to_string(),
                registry_server: "registry.example".to_string(),
                registry_username: "user".to_string(),
                registry_password: "pass".to_string(),
            })),
            runtime: runtime.clone(),
            cloud: connector.clone(),
        };

        Fixture {
            orchestrator: Orchestrator::new(store, root_config, backends, "centralus"),
            dir,
            cloud,
            connector,
            runtime,
        }
    }

    fn with_tenant() -> RootConfig {
        RootConfig {
            tenant: Some("root-tenant".to_string()),
            subscription: None,
        }
    }

    fn create_request(f: &Fixture, app: &str) -> CreateRequest {
        CreateRequest {
            app_id: Some(app.to_string()),
            schema_path: Some(f.schema("schema.xml", "<Edmx/>")),
            cloud: CloudOverrides::default(),
            run_args: RunArgs::new(true),
        }
    }

    #[tokio::test]
    async fn test_create_saves_project() {
        let f = fixture(with_tenant());
        let deployment = f
            .orchestrator
            .deploy_remote(create_request(&f, "demoapp"))
            .await
            .unwrap();

        assert_eq!(
            deployment.project.service_url(),
            "http://demoapp.centralus.azurecontainer.io/odata"
        );
        let stored = f.store().load("demoapp").unwrap();
        assert_eq!(stored, deployment.project);
        assert_eq!(
            f.targets(),
            vec![CloudTarget {
                tenant_id: "root-tenant".to_string(),
                subscription_id: None,
            }]
        );
    }

    #[tokio::test]
    async fn test_create_then_delete_forgets_project() {
        let f = fixture(with_tenant());
        f.orchestrator
            .deploy_remote(create_request(&f, "demoapp"))
            .await
            .unwrap();

        f.orchestrator
            .delete_remote(DeleteRequest {
                app_id: Some("demoapp".to_string()),
                cloud: CloudOverrides::default(),
            })
            .await
            .unwrap();

        assert!(f.store().load("demoapp").unwrap_err().to_string().contains("not found"));
        assert!(f.cloud.calls().contains(&"delete_resource_group".to_string()));
        // Tenant and subscription come from the stored project now.
        assert_eq!(
            f.targets()[1],
            CloudTarget {
                tenant_id: "tenant-1".to_string(),
                subscription_id: Some("sub-1".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_record() {
        let f = fixture(with_tenant());
        f.orchestrator
            .deploy_remote(create_request(&f, "demoapp"))
            .await
            .unwrap();
        *f.cloud.fail_on.lock().unwrap() = Some("delete_resource_group");

        let result = f
            .orchestrator
            .delete_remote(DeleteRequest {
                app_id: Some("demoapp".to_string()),
                cloud: CloudOverrides::default(),
            })
            .await;

        assert!(matches!(result, Err(Error::ProvisioningFailed { .. })));
        assert!(f.store().exists("demoapp").unwrap());
    }

    #[tokio::test]
    async fn test_create_for_existing_record_conflicts() {
        let f = fixture(with_tenant());
        f.orchestrator
            .deploy_remote(create_request(&f, "demoapp"))
            .await
            .unwrap();
        let before = f.cloud.calls().len();

        let result = f.orchestrator.deploy_remote(create_request(&f, "demoapp")).await;
        assert!(matches!(result, Err(Error::Conflict(_))));
        assert_eq!(f.cloud.calls().len(), before);
    }

    #[tokio::test]
    async fn test_missing_inputs_fail_before_side_effects() {
        let f = fixture(with_tenant());

        let mut no_app = create_request(&f, "demoapp");
        no_app.app_id = None;
        let err = f.orchestrator.deploy_remote(no_app).await.unwrap_err();
        assert_eq!(err.to_string(), "Please specify unique app name for remote deployment");

        let mut no_schema = create_request(&f, "demoapp");
        no_schema.schema_path = None;
        assert!(matches!(
            f.orchestrator.deploy_remote(no_schema).await,
            Err(Error::InvalidInput(_))
        ));

        let bad_name = create_request(&f, "Demo-App");
        assert!(matches!(
            f.orchestrator.deploy_remote(bad_name).await,
            Err(Error::InvalidInput(_))
        ));

        assert!(f.cloud.calls().is_empty());
        assert!(f.targets().is_empty());
    }

    #[tokio::test]
    async fn test_missing_tenant_is_reported() {
        let f = fixture(RootConfig::default());
        let err = f
            .orchestrator
            .deploy_remote(create_request(&f, "demoapp"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Please provide value for tenant");
        assert!(f.cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn test_explicit_tenant_wins() {
        let f = fixture(with_tenant());
        let mut request = create_request(&f, "demoapp");
        request.cloud = CloudOverrides {
            tenant: Some("arg-tenant".to_string()),
            subscription: Some("arg-sub".to_string()),
        };
        f.orchestrator.deploy_remote(request).await.unwrap();

        assert_eq!(f.targets()[0].tenant_id, "arg-tenant");
        assert_eq!(f.targets()[0].subscription_id.as_deref(), Some("arg-sub"));
    }

    #[tokio::test]
    async fn test_update_with_invalid_schema_keeps_record() {
        let f = fixture(with_tenant());
        let created = f
            .orchestrator
            .deploy_remote(create_request(&f, "demoapp"))
            .await
            .unwrap();

        let result = f
            .orchestrator
            .update_remote(UpdateRequest {
                app_id: Some("demoapp".to_string()),
                schema_path: Some(f.schema("broken.xml", "broken")),
                cloud: CloudOverrides::default(),
            })
            .await;

        assert!(matches!(result, Err(Error::InvalidSchema(_))));
        assert_eq!(
            f.store().load("demoapp").unwrap().local_schema_path,
            created.project.local_schema_path
        );
        assert!(!f.cloud.calls().contains(&"restart_container_group".to_string()));
    }

    #[tokio::test]
    async fn test_update_records_new_schema_path() {
        let f = fixture(with_tenant());
        f.orchestrator
            .deploy_remote(create_request(&f, "demoapp"))
            .await
            .unwrap();
        let v2 = f.schema("v2.xml", "<Edmx Version=\"4.0\"/>");

        let updated = f
            .orchestrator
            .update_remote(UpdateRequest {
                app_id: Some("demoapp".to_string()),
                schema_path: Some(v2.clone()),
                cloud: CloudOverrides::default(),
            })
            .await
            .unwrap();

        assert_eq!(updated.local_schema_path.as_deref(), Some(v2.as_path()));
        assert_eq!(f.store().load("demoapp").unwrap(), updated);
        assert!(f.cloud.calls().contains(&"restart_container_group".to_string()));
    }

    #[tokio::test]
    async fn test_update_unknown_app_is_not_found() {
        let f = fixture(with_tenant());
        let result = f
            .orchestrator
            .update_remote(UpdateRequest {
                app_id: Some("ghost".to_string()),
                schema_path: Some(f.schema("schema.xml", "<Edmx/>")),
                cloud: CloudOverrides::default(),
            })
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_set_config_merges() {
        let mut f = fixture(RootConfig::default());
        f.orchestrator
            .set_config(&RootConfig {
                tenant: Some("T1".to_string()),
                subscription: None,
            })
            .unwrap();
        let merged = f
            .orchestrator
            .set_config(&RootConfig {
                tenant: Some(String::new()),
                subscription: Some("S1".to_string()),
            })
            .unwrap();

        let expected = RootConfig {
            tenant: Some("T1".to_string()),
            subscription: Some("S1".to_string()),
        };
        assert_eq!(merged, expected);
        assert_eq!(f.orchestrator.show_config(), &expected);
        assert_eq!(f.store().root_config(), expected);
    }

    #[tokio::test]
    async fn test_list_projects() {
        let f = fixture(with_tenant());
        for app in ["beta", "alpha"] {
            let mut request = create_request(&f, app);
            request.schema_path = Some(f.schema(&format!("{}.xml", app), "<Edmx/>"));
            f.orchestrator.deploy_remote(request).await.unwrap();
        }

        let ids: Vec<String> = f
            .orchestrator
            .list_projects()
            .unwrap()
            .into_iter()
            .map(|p| p.app_id.to_string())
            .collect();
        assert_eq!(ids, vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn test_local_run_stops_on_shutdown() {
        let f = fixture(RootConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let run = f
            .orchestrator
            .deploy_local(
                LocalRequest {
                    schema_path: Some(f.schema("schema.xml", "<Edmx/>")),
                    port: Some(5050),
                    run_args: RunArgs::default(),
                },
                tx,
            )
            .await
            .unwrap();

        assert_eq!(run.url(), "http://localhost:5050/odata");
        assert_eq!(f.runtime.live.lock().unwrap().len(), 1);

        run.serve_until(tokio::time::sleep(Duration::from_millis(10)))
            .await
            .unwrap();

        assert!(f.runtime.live.lock().unwrap().is_empty());
        let mut saw_terminating = false;
        while let Ok(event) = rx.try_recv() {
            saw_terminating |= event == SupervisorEvent::Terminating;
        }
        assert!(saw_terminating);
    }

    #[tokio::test]
    async fn test_local_run_picks_port_in_range() {
        let f = fixture(RootConfig::default());
        let (tx, _rx) = mpsc::unbounded_channel();

        let run = f
            .orchestrator
            .deploy_local(
                LocalRequest {
                    schema_path: Some(f.schema("schema.xml", "<Edmx/>")),
                    port: None,
                    run_args: RunArgs::default(),
                },
                tx,
            )
            .await
            .unwrap();

        assert!(LOCAL_PORT_RANGE.contains(&run.port()));
        run.serve_until(async {}).await.unwrap();
    }

    #[tokio::test]
    async fn test_local_run_with_invalid_schema_starts_nothing() {
        let f = fixture(RootConfig::default());
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = f
            .orchestrator
            .deploy_local(
                LocalRequest {
                    schema_path: Some(f.schema("schema.xml", "nope")),
                    port: Some(5050),
                    run_args: RunArgs::default(),
                },
                tx,
            )
            .await;

        assert!(matches!(result, Err(Error::InvalidSchema(_))));
        assert!(f.runtime.live.lock().unwrap().is_empty());
    }
}
