//! RapidAPI CLI tool.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "rapidapi")]
#[command(about = "Run and deploy OData mock services", long_about = None)]
struct Cli {
    /// Directory holding settings and project records
    #[arg(long, global = true, env = "RAPIDAPI_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Settings file (defaults to settings.kdl in the data directory)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the mock service locally and restart it when the schema changes
    Run {
        #[command(flatten)]
        schema: SchemaArg,
        /// Host port (random in 4000-8999 when omitted)
        #[arg(long)]
        port: Option<u16>,
        /// Populate the service with sample data
        #[arg(long)]
        seed: bool,
    },
    /// Deploy the mock service to Azure
    Deploy {
        #[command(flatten)]
        schema: SchemaArg,
        /// Unique app name; all resource names derive from it
        #[arg(long, visible_alias = "app")]
        app_name: Option<String>,
        #[command(flatten)]
        cloud: CloudArgs,
        /// Populate the service with sample data
        #[arg(long)]
        seed: bool,
    },
    /// Upload a new schema to a deployed app and restart it
    Update {
        #[command(flatten)]
        schema: SchemaArg,
        /// App to update
        #[arg(long, visible_alias = "app")]
        app_name: Option<String>,
        #[command(flatten)]
        cloud: CloudArgs,
    },
    /// Delete a deployed app and all of its resources
    Delete {
        /// App to delete
        #[arg(long, visible_alias = "app")]
        app_name: Option<String>,
        #[command(flatten)]
        cloud: CloudArgs,
    },
    /// Default tenant and subscription
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// List deployed apps
    List,
    /// Validate a schema file
    Validate {
        /// Path to the schema file
        path: PathBuf,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Save defaults; omitted values keep their stored setting
    Set {
        #[arg(long)]
        tenant: Option<String>,
        #[arg(long)]
        subscription: Option<String>,
    },
    /// Show the stored defaults
    Show,
}

#[derive(Args)]
struct SchemaArg {
    /// Path to the CSDL schema file
    #[arg(long = "schema", visible_aliases = ["csdl", "metadata"])]
    path: Option<PathBuf>,
}

#[derive(Args)]
struct CloudArgs {
    /// Azure tenant id (falls back to the app's, then the configured default)
    #[arg(long, visible_alias = "tenant-id")]
    tenant: Option<String>,
    /// Azure subscription id (falls back like the tenant, then the account default)
    #[arg(long, visible_alias = "subscription-id")]
    subscription: Option<String>,
}

impl From<CloudArgs> for rapidapi_orchestrator::CloudOverrides {
    fn from(args: CloudArgs) -> Self {
        Self {
            tenant: args.tenant,
            subscription: args.subscription,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let ctx = commands::Context::load(cli.data_dir, cli.settings)?;

    match cli.command {
        Commands::Run { schema, port, seed } => {
            commands::local::run(&ctx, schema.path, port, seed).await?;
        }
        Commands::Deploy {
            schema,
            app_name,
            cloud,
            seed,
        } => {
            commands::remote::deploy(&ctx, schema.path, app_name, cloud.into(), seed).await?;
        }
        Commands::Update {
            schema,
            app_name,
            cloud,
        } => {
            commands::remote::update(&ctx, schema.path, app_name, cloud.into()).await?;
        }
        Commands::Delete { app_name, cloud } => {
            commands::remote::delete(&ctx, app_name, cloud.into()).await?;
        }
        Commands::Config { command } => match command {
            ConfigCommands::Set {
                tenant,
                subscription,
            } => {
                commands::config::set(&ctx, tenant, subscription)?;
            }
            ConfigCommands::Show => {
                commands::config::show(&ctx)?;
            }
        },
        Commands::List => {
            commands::config::list(&ctx)?;
        }
        Commands::Validate { path } => {
            commands::config::validate(&ctx, &path)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_schema_aliases() {
        for flag in ["--schema", "--csdl", "--metadata"] {
            let cli = Cli::try_parse_from(["rapidapi", "run", flag, "api.xml"]).unwrap();
            match cli.command {
                Commands::Run { schema, .. } => {
                    assert_eq!(schema.path, Some(PathBuf::from("api.xml")))
                }
                _ => panic!("Expected run"),
            }
        }
    }

    #[test]
    fn test_deploy_arguments() {
        let cli = Cli::try_parse_from([
            "rapidapi", "deploy", "--schema", "api.xml", "--app", "demoapp", "--tenant", "t1",
            "--seed",
        ])
        .unwrap();
        match cli.command {
            Commands::Deploy {
                app_name,
                cloud,
                seed,
                ..
            } => {
                assert_eq!(app_name.as_deref(), Some("demoapp"));
                assert_eq!(cloud.tenant.as_deref(), Some("t1"));
                assert!(cloud.subscription.is_none());
                assert!(seed);
            }
            _ => panic!("Expected deploy"),
        }
    }
}
