//! # OACTL CLI
//!
//! Command-line interface for the OneAgent operator.
//!
//! ## Usage
//!
//! ```bash
//! # List OneAgent resources
//! oactl list oneagent
//!
//! # Show status of a OneAgentApm
//! oactl status oaapm my-apm --namespace dynatrace
//!
//! # Re-run every probe on the next reconcile
//! oactl reconcile oneagent oneagent -n dynatrace
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use kube::Client;
use oneagent_operator::crd::{OneAgent, OneAgentApm};

mod list;
mod reconcile;
mod status;

/// OneAgent operator CLI
#[derive(Parser)]
#[command(name = "oactl")]
#[command(
    about = "OneAgent operator CLI",
    long_about = None,
    after_help = "\
Available resource types:
  oneagent (or 'oa')         - OneAgent resource
  oneagentapm (or 'oaapm')   - OneAgentApm resource

Examples:
  oactl list oneagent
  oactl reconcile oa oneagent
  oactl status oneagentapm my-apm --namespace dynatrace
"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Kubernetes namespace (defaults to `dynatrace`)
    #[arg(short, long, global = true)]
    namespace: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Clear the probe timestamps so the next reconcile runs every probe
    Reconcile {
        #[arg(value_enum, value_name = "RESOURCE_TYPE")]
        resource_type: ResourceType,

        #[arg(value_name = "NAME")]
        name: String,
    },
    /// List agent resources, in all namespaces unless one is given
    List {
        #[arg(value_enum, value_name = "RESOURCE_TYPE")]
        resource_type: ResourceType,
    },
    /// Show the status of an agent resource
    Status {
        #[arg(value_enum, value_name = "RESOURCE_TYPE")]
        resource_type: ResourceType,

        #[arg(value_name = "NAME")]
        name: String,
    },
}

/// Resource types supported by oactl
#[derive(Clone, Copy, ValueEnum)]
enum ResourceType {
    /// Short form: 'oa'
    #[value(name = "oneagent", alias = "oa")]
    OneAgent,
    /// Short form: 'oaapm'
    #[value(name = "oneagentapm", alias = "oaapm")]
    OneAgentApm,
}

const DEFAULT_NAMESPACE: &str = "dynatrace";

#[tokio::main]
async fn main() -> Result<()> {
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        return Err(anyhow::anyhow!("Failed to install rustls crypto provider"));
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "oactl=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client. Ensure kubeconfig is configured.")?;

    match (cli.command, cli.namespace) {
        (Commands::Reconcile { resource_type, name }, namespace) => {
            let ns = namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE);
            match resource_type {
                ResourceType::OneAgent => reconcile::reconcile_command::<OneAgent>(client, &name, ns).await,
                ResourceType::OneAgentApm => {
                    reconcile::reconcile_command::<OneAgentApm>(client, &name, ns).await
                }
            }
        }
        (Commands::List { resource_type }, namespace) => match resource_type {
            ResourceType::OneAgent => list::list_command::<OneAgent>(client, namespace.as_deref()).await,
            ResourceType::OneAgentApm => {
                list::list_command::<OneAgentApm>(client, namespace.as_deref()).await
            }
        },
        (Commands::Status { resource_type, name }, namespace) => {
            let ns = namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE);
            match resource_type {
                ResourceType::OneAgent => status::status_command::<OneAgent>(client, &name, ns).await,
                ResourceType::OneAgentApm => {
                    status::status_command::<OneAgentApm>(client, &name, ns).await
                }
            }
        }
    }
}
