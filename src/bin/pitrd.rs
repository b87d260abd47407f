//! pitrd binary
//!
//! Runs an in-process cluster simulation: one agent per node, all sharing
//! the simulated control plane, with PITR enabled. Useful for watching the
//! election and slicing lifecycle without a real cluster.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pitrd::agent::http::serve_status;
use pitrd::common::parse_duration;
use pitrd::meta::AgentBrief;
use pitrd::sim::{SimCluster, SimSlicerFactory};
use pitrd::Agent;

#[derive(Parser)]
#[command(name = "pitrd")]
#[command(about = "PITR coordinator simulation", version = pitrd::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an in-process multi-agent simulation
    Sim {
        /// Replica set names (comma-separated)
        #[arg(long, default_value = "rs0", value_delimiter = ',')]
        replsets: Vec<String>,

        /// Nodes per replica set
        #[arg(long, default_value = "2")]
        nodes: usize,

        /// Slicing interval (e.g. "30s", "10m")
        #[arg(long, default_value = "1m")]
        interval: String,

        /// Slice the oplog without base backups
        #[arg(long)]
        oplog_only: bool,

        /// Serve the first agent's status endpoint on this address
        #[arg(long)]
        http: Option<SocketAddr>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Sim {
            replsets,
            nodes,
            interval,
            oplog_only,
            http,
        } => {
            let interval = parse_duration(&interval)?;
            run_sim(replsets, nodes, interval, oplog_only, http).await?;
        }
    }

    Ok(())
}

async fn run_sim(
    replsets: Vec<String>,
    nodes: usize,
    interval: Duration,
    oplog_only: bool,
    http: Option<SocketAddr>,
) -> anyhow::Result<()> {
    if replsets.is_empty() || nodes == 0 {
        anyhow::bail!("need at least one replica set with one node");
    }

    tracing::info!(
        "simulating {} replica set(s) with {} node(s) each",
        replsets.len(),
        nodes
    );

    let cluster = SimCluster::new();
    for (rs_idx, rs) in replsets.iter().enumerate() {
        for node_idx in 0..nodes {
            let node = format!("{}/node-{}", rs, node_idx);
            let primary = node_idx == 0;
            // the primary of the first replica set plays the config-set
            // primary, i.e. the cluster leader
            let leader = rs_idx == 0 && node_idx == 0;
            cluster.add_node(rs, &node, primary, leader);
        }
    }

    cluster.configure(|cfg| {
        cfg.pitr.enabled = true;
        cfg.pitr.oplog_only = oplog_only;
        cfg.pitr.slicing_interval_secs = interval.as_secs();
    });

    let cancel = CancellationToken::new();

    // the cluster clock ticks in wall time
    {
        let cluster = cluster.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(1)) => cluster.advance_clock(1),
                }
            }
        });
    }

    let mut agents = Vec::new();
    for rs in &replsets {
        for node_idx in 0..nodes {
            let agent = Agent::new(
                AgentBrief {
                    replset: rs.clone(),
                    node: format!("{}/node-{}", rs, node_idx),
                },
                cluster.clone(),
                cluster.clone(),
                Arc::new(SimSlicerFactory::new()),
            );
            agents.push(agent.clone());
            tokio::spawn(agent.run(cancel.clone()));
        }
    }

    if let Some(addr) = http {
        let agent = agents[0].clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = serve_status(agent, addr, cancel).await {
                tracing::error!("status endpoint: {}", err);
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    cancel.cancel();

    // give streaming tasks a moment to release their locks
    tokio::time::sleep(Duration::from_secs(1)).await;

    Ok(())
}
