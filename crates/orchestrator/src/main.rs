//! Orchestrator operator CLI
//!
//! Plans cluster topologies and inspects the topology store. Process
//! supervision and database access are provided by the embedding service.

use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use orchestrator::lifecycle::planner;
use orchestrator::storage::{ClusterStore, FileClusterStore};
use orchestrator::OrchestratorConfig;

/// Orchestrator - Sharded database cluster control plane
#[derive(Parser, Debug)]
#[command(name = "orchestrator")]
#[command(about = "Control plane for sharded database clusters")]
struct Args {
    /// Configuration file path (YAML); repeat to layer files, later ones win
    #[arg(short, long)]
    config: Vec<String>,

    /// Topology store directory (overrides config)
    #[arg(long)]
    store_dir: Option<String>,

    /// Log level (overrides config)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Plan a new cluster and persist its topology
    Plan {
        /// Cluster ID
        cluster_id: String,
        /// Number of shards
        #[arg(long, default_value = "2")]
        shards: u32,
        /// Number of config servers
        #[arg(long, default_value = "1")]
        config_servers: u32,
        /// Members per shard replica set
        #[arg(long, default_value = "1")]
        replica_set_size: u32,
        /// Print the plan without saving it
        #[arg(long)]
        dry_run: bool,
    },
    /// List stored clusters
    List,
    /// Print a stored topology as JSON
    Show {
        /// Cluster ID
        cluster_id: String,
    },
    /// Remove a stored topology
    Forget {
        /// Cluster ID
        cluster_id: String,
    },
    /// Print the effective configuration as YAML
    Config,
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = OrchestratorConfig::default();
    for path in &args.config {
        config.merge(OrchestratorConfig::from_file(path)?);
    }
    if let Some(dir) = &args.store_dir {
        config.topology.store_dir = dir.into();
    }
    if let Some(level) = &args.log_level {
        config.log.level = level.clone();
    }

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(parse_level(&config.log.level))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let store = FileClusterStore::new(&config.topology.store_dir);

    match args.command {
        Command::Plan {
            cluster_id,
            shards,
            config_servers,
            replica_set_size,
            dry_run,
        } => {
            if !dry_run && store.exists(&cluster_id).await? {
                anyhow::bail!("Cluster already exists: {}", cluster_id);
            }
            let cluster = planner::plan(
                &config.topology,
                &cluster_id,
                shards,
                config_servers,
                replica_set_size,
            )?;
            cluster.validate().map_err(anyhow::Error::msg)?;

            println!("{}", serde_json::to_string_pretty(&cluster)?);
            if !dry_run {
                store.save(&cluster).await?;
                info!(
                    "Saved cluster {} with {} nodes to {:?}",
                    cluster.id,
                    cluster.nodes.len(),
                    config.topology.store_dir
                );
            }
        }
        Command::List => {
            for id in store.list_ids().await? {
                println!("{}", id);
            }
        }
        Command::Show { cluster_id } => match store.load(&cluster_id).await? {
            Some(cluster) => println!("{}", serde_json::to_string_pretty(&cluster)?),
            None => anyhow::bail!("Cluster not found: {}", cluster_id),
        },
        Command::Forget { cluster_id } => {
            if !store.delete(&cluster_id).await? {
                anyhow::bail!("Cluster not found: {}", cluster_id);
            }
            info!("Removed stored topology of {}", cluster_id);
        }
        Command::Config => {
            print!("{}", serde_yaml::to_string(&config)?);
        }
    }

    Ok(())
}
