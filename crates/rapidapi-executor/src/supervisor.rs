//! Local container supervisor.
//!
//! Drives one mock service container through
//! `Stopped -> Starting -> Running -> Restarting -> Running -> Stopped`,
//! replacing the container whenever the schema file changes and validates.
//!
//! All container work for a session happens under a single lock, so a restart
//! and a stop never interleave: `stop` waits for an in-flight restart, then
//! removes whatever container that restart left behind.

use crate::watch::{SchemaChange, SchemaWatcher};
use bytes::Bytes;
use rapidapi_core::RunArgs;
use rapidapi_core::credentials::ImageCredentials;
use rapidapi_core::runtime::{
    CONTAINER_PORT, CONTAINER_SCHEMA_PATH, ContainerFile, ContainerHandle, ContainerRuntime,
    ContainerSpec, PortMapping,
};
use rapidapi_core::schema::SchemaValidator;
use rapidapi_core::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Quiet period used to coalesce the bursts of events a single save produces.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Environment variable asking the mock service to generate sample data.
pub const SEED_DATA_ENV: &str = "SEED_DATA";

/// What to run locally.
#[derive(Debug, Clone)]
pub struct LocalRunSpec {
    pub schema_path: PathBuf,
    /// Host port the service is published on.
    pub port: u16,
    pub run_args: RunArgs,
    pub image: ImageCredentials,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Stopped,
    Starting,
    /// Serving. `degraded` is set after a failed restart; the previous
    /// container (if any survived) keeps serving.
    Running { degraded: bool },
    Restarting,
}

/// Notifications emitted while a session runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    SchemaChanged { path: PathBuf },
    BeforeRestart { path: PathBuf, port: u16 },
    AfterRestart { path: PathBuf, port: u16 },
    Error { message: String },
    Terminating,
}

/// Starts supervised local sessions.
pub struct ContainerSupervisor {
    runtime: Arc<dyn ContainerRuntime>,
    validator: Arc<dyn SchemaValidator>,
    events: mpsc::UnboundedSender<SupervisorEvent>,
    debounce: Duration,
    watch_file: bool,
}

impl ContainerSupervisor {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        validator: Arc<dyn SchemaValidator>,
        events: mpsc::UnboundedSender<SupervisorEvent>,
    ) -> Self {
        Self {
            runtime,
            validator,
            events,
            debounce: DEFAULT_DEBOUNCE,
            watch_file: true,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Disable the file system watch. Changes then only arrive through
    /// [`SupervisorSession::schema_changed`].
    pub fn without_file_watch(mut self) -> Self {
        self.watch_file = false;
        self
    }

    /// Validate the schema, pull the image, start the first container and
    /// begin watching the schema file.
    ///
    /// Fails without leaving anything running if any of those steps fail.
    pub async fn start(&self, spec: LocalRunSpec) -> Result<SupervisorSession> {
        let schema = read_schema(&spec.schema_path).await?;
        self.validator.validate_contents(&schema)?;

        let (state_tx, _) = watch::channel(SupervisorState::Starting);
        let shared = Arc::new(Shared {
            runtime: self.runtime.clone(),
            validator: self.validator.clone(),
            events: self.events.clone(),
            spec,
            slot: Mutex::new(Slot::default()),
            state: state_tx,
        });

        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        let watcher = if self.watch_file {
            Some(SchemaWatcher::new(&shared.spec.schema_path, changes_tx.clone())?)
        } else {
            None
        };

        if let Err(e) = shared.initial_start(schema).await {
            shared.state.send_replace(SupervisorState::Stopped);
            return Err(e);
        }

        let task = tokio::spawn(watch_loop(shared.clone(), changes_rx, self.debounce));

        Ok(SupervisorSession {
            shared,
            changes: changes_tx,
            task: Some(task),
            watcher,
        })
    }
}

/// A running local instance. Call [`SupervisorSession::stop`] to shut it
/// down; dropping it only makes a best-effort attempt at removal.
pub struct SupervisorSession {
    shared: Arc<Shared>,
    changes: mpsc::UnboundedSender<SchemaChange>,
    task: Option<JoinHandle<()>>,
    watcher: Option<SchemaWatcher>,
}

impl SupervisorSession {
    pub fn port(&self) -> u16 {
        self.shared.spec.port
    }

    pub fn schema_path(&self) -> &Path {
        &self.shared.spec.schema_path
    }

    pub fn state(&self) -> SupervisorState {
        *self.shared.state.borrow()
    }

    /// Treat the schema file as changed, as if the watch had fired.
    pub fn schema_changed(&self) {
        let _ = self.changes.send(SchemaChange {
            path: self.shared.spec.schema_path.clone(),
        });
    }

    /// Stop watching and remove the container.
    ///
    /// Waits for a restart already in progress to finish first.
    pub async fn stop(mut self) -> Result<()> {
        self.watcher.take();

        let mut slot = self.shared.slot.lock().await;
        if slot.closed {
            return Ok(());
        }
        slot.closed = true;
        self.shared.emit(SupervisorEvent::Terminating);

        if let Some(task) = self.task.take() {
            task.abort();
        }

        let result = match slot.container.take() {
            Some(handle) => self.shared.runtime.remove(&handle).await,
            None => Ok(()),
        };
        self.shared.state.send_replace(SupervisorState::Stopped);
        info!(port = self.shared.spec.port, "Local service stopped");
        result
    }
}

impl Drop for SupervisorSession {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }

        let Ok(mut slot) = self.shared.slot.try_lock() else {
            warn!(
                port = self.shared.spec.port,
                "Session dropped during a restart; its container may be left running"
            );
            return;
        };
        if slot.closed {
            return;
        }
        slot.closed = true;

        if let Some(handle) = slot.container.take() {
            if let Ok(rt) = tokio::runtime::Handle::try_current() {
                let runtime = self.shared.runtime.clone();
                rt.spawn(async move {
                    if let Err(e) = runtime.remove(&handle).await {
                        warn!(container = %handle.name, error = %e, "Failed to remove container");
                    }
                });
            }
        }
        self.shared.state.send_replace(SupervisorState::Stopped);
    }
}

#[derive(Debug, Default)]
struct Slot {
    container: Option<ContainerHandle>,
    generation: u64,
    closed: bool,
}

struct Shared {
    runtime: Arc<dyn ContainerRuntime>,
    validator: Arc<dyn SchemaValidator>,
    events: mpsc::UnboundedSender<SupervisorEvent>,
    spec: LocalRunSpec,
    slot: Mutex<Slot>,
    state: watch::Sender<SupervisorState>,
}

impl Shared {
    fn emit(&self, event: SupervisorEvent) {
        let _ = self.events.send(event);
    }

    async fn initial_start(&self, schema: Bytes) -> Result<()> {
        self.runtime.pull(&self.spec.image).await?;
        let mut slot = self.slot.lock().await;
        self.replace_container(&mut slot, schema).await?;
        self.state
            .send_replace(SupervisorState::Running { degraded: false });
        info!(port = self.spec.port, "Local service started");
        Ok(())
    }

    async fn handle_change(&self) {
        let mut slot = self.slot.lock().await;
        if slot.closed {
            return;
        }

        let path = self.spec.schema_path.clone();
        let port = self.spec.port;
        self.emit(SupervisorEvent::SchemaChanged { path: path.clone() });

        // The bytes that pass validation are the bytes shipped to the container.
        let checked = match read_schema(&path).await {
            Ok(schema) => self.validator.validate_contents(&schema).map(|()| schema),
            Err(e) => Err(e),
        };
        let schema = match checked {
            Ok(schema) => schema,
            Err(e) => {
                warn!(error = %e, "Schema change rejected; keeping current container");
                self.emit(SupervisorEvent::Error {
                    message: e.to_string(),
                });
                self.state
                    .send_replace(SupervisorState::Running { degraded: true });
                return;
            }
        };

        self.emit(SupervisorEvent::BeforeRestart {
            path: path.clone(),
            port,
        });
        self.state.send_replace(SupervisorState::Restarting);

        match self.replace_container(&mut slot, schema).await {
            Ok(()) => {
                self.state
                    .send_replace(SupervisorState::Running { degraded: false });
                self.emit(SupervisorEvent::AfterRestart { path, port });
            }
            Err(e) => {
                error!(error = %e, "Restart failed");
                self.emit(SupervisorEvent::Error {
                    message: e.to_string(),
                });
                self.state
                    .send_replace(SupervisorState::Running { degraded: true });
            }
        }
    }

    /// Remove the current container (if any) and start a fresh one serving
    /// `schema`.
    ///
    /// The old handle stays in the slot until removal succeeds, so a later
    /// stop can still reach it.
    async fn replace_container(&self, slot: &mut Slot, schema: Bytes) -> Result<()> {
        if let Some(old) = slot.container.as_ref() {
            self.runtime.remove(old).await?;
            slot.container = None;
        }

        slot.generation += 1;
        let spec = self.container_spec(slot.generation, schema);
        debug!(container = %spec.name, "Starting container");
        slot.container = Some(self.runtime.run(spec).await?);
        Ok(())
    }

    fn container_spec(&self, generation: u64, schema: Bytes) -> ContainerSpec {
        let mut env = HashMap::new();
        if self.spec.run_args.seed_data {
            env.insert(SEED_DATA_ENV.to_string(), "true".to_string());
        }

        ContainerSpec {
            name: format!("rapidapi-{}-{}", self.spec.port, generation),
            image: self.spec.image.clone(),
            ports: vec![PortMapping {
                host: self.spec.port,
                container: CONTAINER_PORT,
            }],
            env,
            files: vec![ContainerFile {
                target_path: CONTAINER_SCHEMA_PATH.to_string(),
                contents: schema,
            }],
            auto_remove: true,
        }
    }
}

async fn read_schema(path: &Path) -> Result<Bytes> {
    tokio::fs::read(path).await.map(Bytes::from).map_err(|e| {
        Error::InvalidSchema(format!("cannot read {}: {}", path.display(), e))
    })
}

async fn watch_loop(
    shared: Arc<Shared>,
    mut changes: mpsc::UnboundedReceiver<SchemaChange>,
    debounce: Duration,
) {
    while let Some(change) = changes.recv().await {
        debug!(path = %change.path.display(), "Schema file changed");
        // Coalesce.
        while let Ok(Some(_)) = tokio::time::timeout(debounce, changes.recv()).await {}
        shared.handle_change().await;
    }
}
