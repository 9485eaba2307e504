//! rlogctl - Command line tool for rlog clusters
//!
//! Usage:
//!   rlogctl append '{"k": 1}' -w 2   - Append an entry
//!   rlogctl get 3 -r 2               - Read one entry
//!   rlogctl list                     - Read the whole log
//!   rlogctl nodes                    - Show cluster membership

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;

use rlog::log::{LogEntry, Payload};
use rlog::replication::protocol::{
    AppendRequest, ClusterResponse, ErrorResponse, HealthResponse, InfoResponse, LogsResponse,
};
use rlog::state::Health;

/// rlog Cluster Control Tool
#[derive(Parser)]
#[command(name = "rlogctl")]
#[command(about = "Append to and inspect rlog clusters", long_about = None)]
struct Cli {
    /// Node to talk to
    #[arg(short, long, default_value = "http://127.0.0.1:8080")]
    endpoint: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Append an entry (a JSON object, or plain text stored as {"msg": ...})
    Append {
        payload: String,
        /// Write concern
        #[arg(short, long, default_value_t = 1)]
        w: usize,
    },
    /// Read one entry
    Get {
        id: u64,
        /// Read concern
        #[arg(short, long, default_value_t = 1)]
        r: usize,
    },
    /// Read every entry
    List {
        /// Read concern
        #[arg(short, long, default_value_t = 1)]
        r: usize,
    },
    /// Show node identity and data version
    Info,
    /// List cluster nodes and their health
    Nodes,
    /// Check that the node is up
    Health,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let endpoint = cli.endpoint.trim_end_matches('/').to_string();
    let client = reqwest::Client::new();

    let result = match cli.command {
        Commands::Append { payload, w } => append(&client, &endpoint, &payload, w).await,
        Commands::Get { id, r } => get(&client, &endpoint, id, r).await,
        Commands::List { r } => list(&client, &endpoint, r).await,
        Commands::Info => info(&client, &endpoint).await,
        Commands::Nodes => nodes(&client, &endpoint).await,
        Commands::Health => health(&client, &endpoint).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

// ============ Helpers ============

/// Decode a success body, or turn an API error body into an error
async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorResponse>(&text) {
            Ok(err) => bail!("{} ({}, HTTP {})", err.error, err.code, status.as_u16()),
            Err(_) => bail!("API error: {} {}", status, text),
        }
    }
    response.json().await.context("Malformed response body")
}

async fn fetch<T: DeserializeOwned>(client: &reqwest::Client, url: &str) -> Result<T> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", url))?;
    decode(response).await
}

/// Parse the command-line payload: JSON objects are taken as-is
fn parse_payload(raw: &str) -> Payload {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => LogEntry::message_payload(raw),
    }
}

fn print_entry(entry: &LogEntry) {
    println!(
        "{:>6}  {}  {:<12}  {}",
        entry.id,
        entry.created_at.format("%Y-%m-%d %H:%M:%S"),
        entry.origin_node_id,
        serde_json::Value::Object(entry.payload.clone())
    );
}

// ============ Commands ============

async fn append(client: &reqwest::Client, endpoint: &str, raw: &str, w: usize) -> Result<()> {
    let url = format!("{}/log", endpoint);
    let response = client
        .post(&url)
        .json(&AppendRequest::new(parse_payload(raw), w))
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", url))?;
    let entry: LogEntry = decode(response).await?;
    println!("✓ Appended entry {} (w={})", entry.id, w);
    Ok(())
}

async fn get(client: &reqwest::Client, endpoint: &str, id: u64, r: usize) -> Result<()> {
    let entry: LogEntry = fetch(client, &format!("{}/log/{}?r={}", endpoint, id, r)).await?;
    print_entry(&entry);
    Ok(())
}

async fn list(client: &reqwest::Client, endpoint: &str, r: usize) -> Result<()> {
    let logs: LogsResponse = fetch(client, &format!("{}/logs?r={}", endpoint, r)).await?;
    if logs.entries.is_empty() {
        println!("(empty log)");
    }
    for entry in &logs.entries {
        print_entry(entry);
    }
    Ok(())
}

async fn info(client: &reqwest::Client, endpoint: &str) -> Result<()> {
    let info: InfoResponse = fetch(client, &format!("{}/info", endpoint)).await?;
    println!("Node ID: {}", info.node_id);
    println!("URL:     {}", info.url);
    println!("Role:    {}", info.role);
    println!("Version: {}", info.version);
    Ok(())
}

async fn nodes(client: &reqwest::Client, endpoint: &str) -> Result<()> {
    let cluster: ClusterResponse = fetch(client, &format!("{}/cluster/nodes", endpoint)).await?;

    println!();
    println!("rlog Cluster (rlogctl v{})", env!("CARGO_PKG_VERSION"));
    println!("========================================");
    println!(
        "Master: {}",
        cluster.master_id.as_deref().unwrap_or("UNKNOWN")
    );
    println!();

    println!("{:<38} {:<28} {:<10} {:<10}", "NODE ID", "URL", "ROLE", "HEALTH");
    println!("{}", "-".repeat(88));
    println!(
        "{:<38} {:<28} {:<10} {:<10}",
        cluster.local.node_id,
        cluster.local.url,
        cluster.local.role.to_string(),
        "(local)"
    );

    for peer in &cluster.peers {
        // Pad before adding color codes
        let health_padded = format!("{:<10}", peer.health.to_string());
        let health_colored = match peer.health {
            Health::Healthy => format!("\x1b[32m{}\x1b[0m", health_padded),
            Health::Suspect => format!("\x1b[33m{}\x1b[0m", health_padded),
            Health::Dead => format!("\x1b[31m{}\x1b[0m", health_padded),
        };
        println!(
            "{:<38} {:<28} {:<10} {}",
            peer.node_id,
            peer.url,
            peer.role.to_string(),
            health_colored
        );
    }
    println!();
    Ok(())
}

async fn health(client: &reqwest::Client, endpoint: &str) -> Result<()> {
    let health: HealthResponse = fetch(client, &format!("{}/healthcheck", endpoint)).await?;
    println!("✓ {} is up ({})", health.node_id, health.status);
    Ok(())
}
