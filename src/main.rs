use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use ks_installer::config::Config;
use ks_installer::node::Orchestrator;
use ks_installer::proto::raft_service_client::RaftServiceClient;
use ks_installer::proto::StatusRequest;
use ks_installer::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "ks-installer")]
#[command(version)]
#[command(about = "Host provisioning orchestrator")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run an orchestrator node
    Server(ServerArgs),

    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Cluster commands
    Cluster {
        /// gRPC address of any node
        #[arg(long, short = 'a', default_value = "http://127.0.0.1:50051")]
        addr: String,

        /// Output format
        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,

        #[command(subcommand)]
        command: ClusterCommands,
    },
}

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Configuration file
    #[arg(long, short = 'c', env = "KS_CONFIG", default_value = "ks-installer.toml")]
    config: PathBuf,

    /// Join every configured node through the leader when the cluster
    /// already exists
    #[arg(long)]
    force_bootstrap: bool,
}

#[derive(clap::Subcommand, Debug)]
enum ConfigCommands {
    /// Load and validate a configuration, then print it as JSON
    Check {
        #[arg(long, short = 'c', env = "KS_CONFIG", default_value = "ks-installer.toml")]
        config: PathBuf,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ClusterCommands {
    /// Show role, term, leader and members as seen by one node
    Status,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Serialize)]
struct MemberOutput {
    node_id: u64,
    address: String,
}

#[derive(Serialize)]
struct ClusterStatusOutput {
    node_id: u64,
    role: String,
    current_term: u64,
    leader_id: Option<u64>,
    commit_index: u64,
    last_applied: u64,
    members: Vec<MemberOutput>,
}

fn load_config(path: &PathBuf) -> Result<Config, Box<dyn std::error::Error>> {
    let config = Config::load(path)?;
    config.validate()?;
    Ok(config)
}

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&args.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    tracing::info!(
        config = %args.config.display(),
        node_id = config.raft.node_id,
        nodes = config.raft.nodes.len(),
        inmemory_store = config.raft.inmemory_store,
        "Starting ks-installer"
    );

    let cancel = install_shutdown_handler()?;
    let orchestrator = Orchestrator::new(config).await?;
    orchestrator.run(args.force_bootstrap, cancel).await?;
    Ok(())
}

async fn handle_cluster_status(addr: String, output: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = RaftServiceClient::connect(addr).await?;
    let resp = client.status(StatusRequest {}).await?.into_inner();

    let status = ClusterStatusOutput {
        node_id: resp.node_id,
        role: resp.role,
        current_term: resp.current_term,
        leader_id: (resp.leader_id != 0).then_some(resp.leader_id),
        commit_index: resp.commit_index,
        last_applied: resp.last_applied,
        members: resp
            .servers
            .into_iter()
            .map(|s| MemberOutput {
                node_id: s.node_id,
                address: s.address,
            })
            .collect(),
    };

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
        OutputFormat::Table => {
            println!("Cluster Status (node {})", status.node_id);
            println!("{}", "=".repeat(40));
            println!("Role:    {}", status.role);
            println!("Term:    {}", status.current_term);
            match status.leader_id {
                Some(id) => println!("Leader:  Node {id}"),
                None => println!("Leader:  unknown"),
            }
            println!("Commit:  {} (applied {})", status.commit_index, status.last_applied);
            println!();
            println!("{:<8} ADDRESS", "ID");
            println!("{}", "-".repeat(40));
            for member in &status.members {
                println!("{:<8} {}", member.node_id, member.address);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => run_server(server_args).await,
        Commands::Config {
            command: ConfigCommands::Check { config },
        } => {
            let mut config = load_config(&config)?;
            if !config.rsview.password.is_empty() {
                config.rsview.password = "********".into();
            }
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Cluster {
            addr,
            output,
            command: ClusterCommands::Status,
        } => handle_cluster_status(addr, output).await,
    }
}
