//! Remote deployment commands.

use super::Context;
use anyhow::Result;
use rapidapi_core::RunArgs;
use rapidapi_deployer::ProvisionEvent;
use rapidapi_orchestrator::{CloudOverrides, CreateRequest, DeleteRequest, UpdateRequest};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Print provisioning progress until every sender is gone.
fn progress_printer() -> (mpsc::UnboundedSender<ProvisionEvent>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<ProvisionEvent>();
    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            println!("{}...", event);
        }
    });
    (tx, handle)
}

pub async fn deploy(
    ctx: &Context,
    schema: Option<PathBuf>,
    app_name: Option<String>,
    cloud: CloudOverrides,
    seed: bool,
) -> Result<()> {
    let (tx, printer) = progress_printer();
    let orchestrator = ctx.orchestrator(Some(tx))?;

    if let Some(path) = &schema {
        println!("Schema Path: {}", path.display());
    }
    if let Some(app) = &app_name {
        println!("App service name: {}", app);
    }
    println!("Deploying resources, please wait...");

    let result = orchestrator
        .deploy_remote(CreateRequest {
            app_id: app_name,
            schema_path: schema,
            cloud,
            run_args: RunArgs::new(seed),
        })
        .await;
    drop(orchestrator);
    let _ = printer.await;

    let deployment = result?;
    let project = &deployment.project;
    println!("Tenant Id: {}", project.tenant_id.as_deref().unwrap_or_default());
    println!(
        "Subscription Id: {}",
        project.subscription_id.as_deref().unwrap_or_default()
    );
    println!(
        "App created successfully in {}s. Your app URL is: {}",
        deployment.elapsed().num_seconds(),
        project.service_url()
    );
    Ok(())
}

pub async fn update(
    ctx: &Context,
    schema: Option<PathBuf>,
    app_name: Option<String>,
    cloud: CloudOverrides,
) -> Result<()> {
    let (tx, printer) = progress_printer();
    let orchestrator = ctx.orchestrator(Some(tx))?;

    println!("Updating app, please wait...");
    let result = orchestrator
        .update_remote(UpdateRequest {
            app_id: app_name,
            schema_path: schema,
            cloud,
        })
        .await;
    drop(orchestrator);
    let _ = printer.await;

    let project = result?;
    println!("Update complete. App url is {}", project.service_url());
    Ok(())
}

pub async fn delete(ctx: &Context, app_name: Option<String>, cloud: CloudOverrides) -> Result<()> {
    let (tx, printer) = progress_printer();
    let orchestrator = ctx.orchestrator(Some(tx))?;

    if let Some(app) = &app_name {
        println!("Deleting {} and related resources...", app);
    }
    let result = orchestrator
        .delete_remote(DeleteRequest {
            app_id: app_name,
            cloud,
        })
        .await;
    drop(orchestrator);
    let _ = printer.await;

    let project = result?;
    println!(
        "The app {} and its related resources have been deleted.",
        project.app_id
    );
    Ok(())
}
