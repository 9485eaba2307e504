//! rlog - Replicated Append-Only Log
//!
//! Runs one node of an rlog cluster: a fixed master that orders writes and
//! any number of secondaries that receive them.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rlog::api::HttpServer;
use rlog::config::RlogConfig;
use rlog::error::{Error, Result};
use rlog::node::{HttpConnector, LocalNode, NodeRole};
use rlog::replication::{QuorumCoordinator, ReplicatedLog};
use rlog::state::{Registration, Topology};

const DEFAULT_CONFIG: &str = "rlog.toml";

/// rlog - Replicated Append-Only Log
#[derive(Parser)]
#[command(name = "rlog")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (defaults to ./rlog.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the rlog node
    Start {
        /// Node role (master or secondary)
        #[arg(short, long)]
        role: Option<NodeRole>,

        /// Master URL (secondaries only)
        #[arg(short, long)]
        master: Option<String>,

        /// Secondary URLs to discover
        #[arg(short, long, num_args = 1.., value_delimiter = ',')]
        secondaries: Vec<String>,

        /// Address to bind the HTTP server
        #[arg(short, long)]
        bind: Option<String>,

        /// Node ID (random when unset)
        #[arg(long)]
        id: Option<String>,

        /// URL other nodes use to reach this one
        #[arg(long)]
        advertise: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        output: PathBuf,

        /// Node role
        #[arg(short, long, default_value = "master")]
        role: NodeRole,
    },

    /// Validate configuration file
    Validate,

    /// Show the effective configuration
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            role,
            master,
            secondaries,
            bind,
            id,
            advertise,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(role) = role {
                config.node.role = role;
            }
            if master.is_some() {
                config.cluster.master = master;
            }
            if !secondaries.is_empty() {
                config.cluster.secondaries = secondaries;
            }
            if let Some(bind) = bind {
                config.node.bind_address = bind;
            }
            if let Some(id) = id {
                config.node.id = id;
            }
            if advertise.is_some() {
                config.node.advertise_url = advertise;
            }

            init_logging(cli.log_level.as_deref().unwrap_or(&config.logging.level));
            run_start(config).await
        }
        Commands::Init { output, role } => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"));
            run_init(output, role)
        }
        Commands::Validate => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"));
            run_validate(cli.config.as_deref())
        }
        Commands::Info => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"));
            run_info(cli.config.as_deref())
        }
    }
}

/// Initialize logging
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// The explicit path, or `default` when that file exists
fn config_path(path: Option<&Path>, default: &Path) -> Option<PathBuf> {
    match path {
        Some(path) => Some(path.to_path_buf()),
        None if default.exists() => Some(default.to_path_buf()),
        None => None,
    }
}

/// Load the given file, `./rlog.toml` if present, or the defaults
fn load_config(path: Option<&Path>) -> Result<RlogConfig> {
    match config_path(path, Path::new(DEFAULT_CONFIG)) {
        Some(path) => RlogConfig::from_file(&path),
        None => Ok(RlogConfig::default()),
    }
}

/// Start the rlog node
async fn run_start(mut config: RlogConfig) -> Result<()> {
    config.validate()?;
    let node_id = config.ensure_node_id().to_string();
    let url = config.advertise_url();

    tracing::info!(
        "Starting rlog node {} as {} at {}",
        node_id,
        config.node.role,
        url
    );

    let local = Arc::new(LocalNode::new(node_id, url, config.node.role));
    let connector = HttpConnector::new(
        config.request_timeout(),
        config.health_config().probe_timeout,
    )?;
    let client = connector.client().clone();
    let topology = Topology::new(
        local,
        Arc::new(connector),
        config.health_config(),
        config.catchup_config(),
    );
    let log = ReplicatedLog::new(
        Arc::clone(&topology),
        QuorumCoordinator::new(config.quorum_config()),
    );
    let server = HttpServer::new(log, client);

    let listener = tokio::net::TcpListener::bind(&config.node.bind_address).await?;
    let shutdown = CancellationToken::new();

    let server_handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { server.serve(listener, shutdown).await })
    };

    // Peers may still be booting, so each target is retried until reached
    for target in config.discovery_targets() {
        let topology = Arc::clone(&topology);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { discover(topology, target, shutdown).await });
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Received shutdown signal");

    topology.shutdown();
    shutdown.cancel();

    match server_handle.await {
        Ok(result) => result?,
        Err(e) => return Err(Error::Internal(format!("HTTP server task failed: {}", e))),
    }

    tracing::info!("rlog node stopped");
    Ok(())
}

/// Register the node at `url`, retrying with backoff until it answers
async fn discover(topology: Arc<Topology>, url: String, shutdown: CancellationToken) {
    let mut delay = Duration::from_millis(500);
    let max_delay = Duration::from_secs(10);

    loop {
        match topology.add_remote_node(&url).await {
            Ok(Registration::Added(info)) => {
                tracing::info!("Discovered {} ({}) at {}", info.node_id, info.role, url);
                return;
            }
            Ok(Registration::AlreadyKnown(_)) => return,
            Ok(Registration::Local) => {
                tracing::warn!("Discovery target {} is this node, skipping", url);
                return;
            }
            Err(e) => {
                tracing::warn!("Discovery of {} failed: {}, retrying in {:?}", url, e, delay);
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        delay = (delay * 2).min(max_delay);
    }
}

/// Initialize a new configuration file
fn run_init(output: PathBuf, role: NodeRole) -> Result<()> {
    let cluster = match role {
        NodeRole::Master => "# secondaries = [\"http://10.0.0.2:8080\", \"http://10.0.0.3:8080\"]",
        NodeRole::Secondary => "master = \"http://10.0.0.1:8080\"",
    };
    let role_name = match role {
        NodeRole::Master => "master",
        NodeRole::Secondary => "secondary",
    };

    let config_content = format!(
        r#"# rlog Configuration
# Generated configuration file

[node]
# id = "node-1"              # random UUID when unset
role = "{role_name}"
bind_address = "0.0.0.0:8080"
# advertise_url = "http://my-public-ip:8080"

[cluster]
{cluster}
quorum_timeout_ms = 5000      # 0 waits indefinitely
request_timeout_ms = 2000

[health]
probe_interval_ms = 1000
max_probe_interval_ms = 8000
probe_timeout_ms = 500
max_retries = 3

[catchup]
interval_ms = 1000
max_interval_ms = 10000

[logging]
level = "info"
"#
    );

    // The sample must parse as written
    RlogConfig::from_str(&config_content)?;

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("Then start with: rlog --config {} start", output.display());

    Ok(())
}

fn run_validate(path: Option<&Path>) -> Result<()> {
    let Some(path) = config_path(path, Path::new(DEFAULT_CONFIG)) else {
        eprintln!("✗ No configuration file found (pass --config or create {})", DEFAULT_CONFIG);
        return Err(Error::Config(format!("no configuration file at {}", DEFAULT_CONFIG)));
    };

    match RlogConfig::from_file(&path) {
        Ok(config) => {
            println!("✓ Configuration is valid: {}", path.display());
            println!("  Node ID: {}", if config.node.id.is_empty() { "(generated)" } else { config.node.id.as_str() });
            println!("  Role: {}", config.node.role);
            println!("  Bind Address: {}", config.node.bind_address);
            println!("  Advertised URL: {}", config.advertise_url());
            println!("  Master: {}", config.cluster.master.as_deref().unwrap_or("(this node)"));
            println!("  Secondaries: {}", config.cluster.secondaries.len());
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

fn run_info(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let rendered = toml::to_string_pretty(&config)
        .map_err(|e| Error::Config(format!("Failed to render configuration: {}", e)))?;
    println!("{}", rendered);
    Ok(())
}
