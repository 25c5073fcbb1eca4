//! Commands that only touch local state.

use super::Context;
use anyhow::Result;
use rapidapi_core::RootConfig;
use std::path::Path;

pub fn set(ctx: &Context, tenant: Option<String>, subscription: Option<String>) -> Result<()> {
    let mut orchestrator = ctx.orchestrator(None)?;
    let config = orchestrator.set_config(&RootConfig {
        tenant,
        subscription,
    })?;
    print_config(&config);
    Ok(())
}

pub fn show(ctx: &Context) -> Result<()> {
    print_config(ctx.orchestrator(None)?.show_config());
    Ok(())
}

pub fn list(ctx: &Context) -> Result<()> {
    let projects = ctx.orchestrator(None)?.list_projects()?;
    if projects.is_empty() {
        println!("No apps deployed");
        return Ok(());
    }

    for project in projects {
        println!("App name: {}", project.app_id);
        println!("URL: {}", project.service_url());
        println!(
            "Subscription: {}",
            project.subscription_id.as_deref().unwrap_or_default()
        );
        println!("Tenant: {}", project.tenant_id.as_deref().unwrap_or_default());
        println!();
    }
    Ok(())
}

pub fn validate(ctx: &Context, path: &Path) -> Result<()> {
    ctx.orchestrator(None)?.validate(path)?;
    println!("Schema is valid");
    Ok(())
}

fn print_config(config: &RootConfig) {
    println!("Config settings");
    println!("Tenant: {}", config.tenant.as_deref().unwrap_or_default());
    println!(
        "Subscription: {}",
        config.subscription.as_deref().unwrap_or_default()
    );
}
