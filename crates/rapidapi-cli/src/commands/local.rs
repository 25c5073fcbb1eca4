//! Local run command.

use super::Context;
use anyhow::Result;
use rapidapi_core::RunArgs;
use rapidapi_core::project::local_service_url;
use rapidapi_executor::SupervisorEvent;
use rapidapi_orchestrator::LocalRequest;
use std::path::PathBuf;
use std::time::Duration;
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Run the service in a local container until Ctrl+C.
pub async fn run(
    ctx: &Context,
    schema: Option<PathBuf>,
    port: Option<u16>,
    seed: bool,
) -> Result<()> {
    let orchestrator = ctx.orchestrator(None)?;
    if let Some(path) = &schema {
        println!("Schema Path: {}", path.display());
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_events(rx));

    println!("Starting local service, please wait...");
    let run = orchestrator
        .deploy_local(
            LocalRequest {
                schema_path: schema,
                port,
                run_args: RunArgs::new(seed),
            },
            tx,
        )
        .await?;

    println!("Server running on {}", run.url());
    println!("Press Ctrl+C to exit.");

    let result = run.serve_until(shutdown_signal()).await;
    // Let the printer drain the last events once the session has gone.
    let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;
    Ok(result?)
}

async fn print_events(mut rx: mpsc::UnboundedReceiver<SupervisorEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            SupervisorEvent::SchemaChanged { path } => {
                println!("Changes detected to {}...", path.display());
            }
            SupervisorEvent::BeforeRestart { .. } => println!("Restarting server..."),
            SupervisorEvent::AfterRestart { port, .. } => {
                println!("Server running on {}", local_service_url(port));
            }
            SupervisorEvent::Error { message } => eprintln!("{}", message),
            SupervisorEvent::Terminating => println!("Terminating server..."),
        }
    }
}

/// Resolves on Ctrl+C, or on SIGTERM/SIGHUP on Unix.
///
/// Unix handlers are installed when this is called, not when first polled.
fn shutdown_signal() -> impl Future<Output = ()> {
    #[cfg(unix)]
    let terminate = unix_signal(SignalKind::terminate(), "SIGTERM");
    #[cfg(unix)]
    let hangup = unix_signal(SignalKind::hangup(), "SIGHUP");

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    #[cfg(not(unix))]
    let hangup = std::future::pending::<()>();

    async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Cannot listen for Ctrl+C; stopping now");
            }
        };

        tokio::select! {
            () = ctrl_c => {}
            () = terminate => {}
            () = hangup => {}
        }
    }
}

#[cfg(unix)]
fn unix_signal(kind: SignalKind, name: &'static str) -> impl Future<Output = ()> {
    let installed = signal(kind);
    async move {
        match installed {
            Ok(mut stream) => {
                stream.recv().await;
                info!(signal = name, "Received signal");
            }
            Err(e) => {
                warn!(signal = name, error = %e, "Cannot listen for signal");
                std::future::pending::<()>().await;
            }
        }
    }
}
