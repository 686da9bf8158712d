//! paasdeploy operator CLI: enqueue deploys, register/provision nodes, and
//! tail the event stream — a thin wrapper over `paasdeploy-api`'s REST/SSE
//! surface.

mod client;
mod commands;

use clap::{Parser, Subcommand};
use paasdeploy_core::ResourceId;
use tracing_subscriber::EnvFilter;

use client::Client;

#[derive(Parser)]
#[command(name = "paasdeploy")]
#[command(about = "paasdeploy operator CLI", long_about = None)]
struct Cli {
    /// Control-plane API base URL.
    #[arg(long, env = "PAASDEPLOY_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    /// Owner id sent as `x-owner-id` on every request.
    #[arg(long, env = "PAASDEPLOY_OWNER_ID")]
    owner_id: ResourceId,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage applications.
    App {
        #[command(subcommand)]
        command: AppCommands,
    },
    /// Enqueue a deploy for an application (shorthand for `app deploy`).
    Deploy {
        app_id: ResourceId,
        commit_sha: String,
        #[arg(long)]
        message: Option<String>,
    },
    /// Inspect or cancel deployments.
    Deployment {
        #[command(subcommand)]
        command: DeploymentCommands,
    },
    /// Register, list, or deprovision remote nodes.
    Node {
        #[command(subcommand)]
        command: NodeCommands,
    },
    /// Stream live deploy/log/health/provision events.
    Events,
}

#[derive(Subcommand)]
enum AppCommands {
    /// Register a new application.
    Create {
        name: String,
        repo_url: String,
        #[arg(long, default_value = "main")]
        branch: String,
        #[arg(long, default_value = "")]
        working_dir: String,
        #[arg(long)]
        node_id: Option<ResourceId>,
    },
    /// List applications owned by the caller.
    List,
    /// Show a single application.
    Get { id: ResourceId },
    /// Soft-delete an application.
    Delete { id: ResourceId },
    /// Enqueue a deploy for an application.
    Deploy {
        id: ResourceId,
        commit_sha: String,
        #[arg(long)]
        message: Option<String>,
    },
    /// List an application's recent deployments.
    Deployments {
        id: ResourceId,
        #[arg(long, default_value = "20")]
        limit: i64,
    },
}

#[derive(Subcommand)]
enum DeploymentCommands {
    /// Show a single deployment.
    Get { id: ResourceId },
    /// Cancel a pending or running deployment.
    Cancel { id: ResourceId },
}

#[derive(Subcommand)]
enum NodeCommands {
    /// Register a node; provisioning (§4.7) starts immediately in the background.
    Register {
        name: String,
        host: String,
        #[arg(long, default_value = "22")]
        ssh_port: u16,
        #[arg(long, default_value = "root")]
        ssh_user: String,
        /// Path to a private key file; mutually usable alongside --password.
        #[arg(long)]
        private_key_file: Option<std::path::PathBuf>,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        acme_email: Option<String>,
    },
    /// List nodes owned by the caller.
    List,
    /// Show a single node.
    Get { id: ResourceId },
    /// Deprovision (tear down the agent/unit) and stop tracking a node.
    Deprovision { id: ResourceId },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let client = Client::new(cli.api_url, cli.owner_id);

    match cli.command {
        Commands::App { command } => match command {
            AppCommands::Create { name, repo_url, branch, working_dir, node_id } => {
                commands::create_application(&client, &name, &repo_url, &branch, &working_dir, node_id).await?
            }
            AppCommands::List => commands::list_applications(&client).await?,
            AppCommands::Get { id } => commands::get_application(&client, id).await?,
            AppCommands::Delete { id } => commands::delete_application(&client, id).await?,
            AppCommands::Deploy { id, commit_sha, message } => {
                commands::deploy(&client, id, &commit_sha, message.as_deref()).await?
            }
            AppCommands::Deployments { id, limit } => commands::list_deployments(&client, id, limit).await?,
        },
        Commands::Deploy { app_id, commit_sha, message } => {
            commands::deploy(&client, app_id, &commit_sha, message.as_deref()).await?
        }
        Commands::Deployment { command } => match command {
            DeploymentCommands::Get { id } => commands::get_deployment(&client, id).await?,
            DeploymentCommands::Cancel { id } => commands::cancel_deployment(&client, id).await?,
        },
        Commands::Node { command } => match command {
            NodeCommands::Register { name, host, ssh_port, ssh_user, private_key_file, password, acme_email } => {
                let private_key = private_key_file.map(std::fs::read_to_string).transpose()?;
                commands::register_node(
                    &client,
                    &name,
                    &host,
                    ssh_port,
                    &ssh_user,
                    private_key,
                    password,
                    acme_email.as_deref(),
                )
                .await?
            }
            NodeCommands::List => commands::list_nodes(&client).await?,
            NodeCommands::Get { id } => commands::get_node(&client, id).await?,
            NodeCommands::Deprovision { id } => commands::deprovision_node(&client, id).await?,
        },
        Commands::Events => commands::tail_events(&client).await?,
    }

    Ok(())
}
