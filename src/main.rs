//! slotsync: run a simulated network or a single multicast node

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use slotsync::core::{Config, NodeId};
use slotsync::network::{Medium, MediumConfig, RadioConfig, UdpRadio};
use slotsync::node::{Node, NodeReport};
use slotsync::time::NodeClock;
use slotsync::topology::TopologyTable;
use slotsync::{Error, Result};

/// Run a simulated network or a single multicast node
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// TOML configuration; defaults to the reference deployment
    config: Option<PathBuf>,

    /// Node to run when the radio is udp
    #[arg(long, value_name = "ID")]
    node: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let topology = Arc::new(config.validate()?);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, stopping");
                cancel.cancel();
            }
        });
    }

    let reports = match config.radio.clone() {
        RadioConfig::Simulated { medium, .. } => {
            if args.node.is_some() {
                warn!("--node is ignored by the simulated radio");
            }
            simulate(&config, topology, &medium, cancel).await?
        }
        RadioConfig::Udp { group, port, interface, .. } => {
            let id = args
                .node
                .map(NodeId)
                .ok_or_else(|| Error::config("the udp radio needs --node ID"))?;
            info!(node = %id, %group, port, "starting multicast node");

            let radio = UdpRadio::bind(id, group, port, interface).await?;
            let node = Node::new(id, config.clone(), topology, radio, NodeClock::new(Duration::ZERO))?
                .with_cancellation(cancel);
            vec![node.run().await]
        }
    };

    print_summary(&reports);

    let failed = reports.iter().filter(|r| r.exit.is_fatal()).count();
    if failed > 0 {
        warn!(failed, "nodes stopped on a fatal condition");
    }
    Ok(())
}

/// Runs every node of the topology on one in-memory medium
async fn simulate(
    config: &Config,
    topology: Arc<TopologyTable>,
    medium_config: &MediumConfig,
    cancel: CancellationToken,
) -> Result<Vec<NodeReport>> {
    let medium = Medium::new(medium_config)?;
    let mut rng = StdRng::seed_from_u64(config.generator.seed);

    info!(
        nodes = topology.nodes().len(),
        sink = %topology.sink(),
        "simulating network"
    );

    // Forwarders first so they are listening before the sink starts the flood
    let mut order: Vec<NodeId> = topology.nodes().to_vec();
    order.sort_by_key(|&id| topology.is_sink(id));

    let mut tasks = Vec::with_capacity(order.len());
    for id in order {
        let radio = medium.attach(id).await?;
        let clock = NodeClock::new(Duration::from_micros(rng.gen_range(0..10_000_000)));
        let node = Node::new(id, config.clone(), Arc::clone(&topology), radio, clock)?
            .with_cancellation(cancel.clone());
        tasks.push(tokio::spawn(node.run()));
    }

    let mut reports = Vec::with_capacity(tasks.len());
    for task in futures::future::join_all(tasks).await {
        match task {
            Ok(report) => reports.push(report),
            Err(e) => warn!(error = %e, "node task failed"),
        }
    }

    let stats = medium.stats();
    info!(delivered = stats.delivered, lost = stats.lost, "medium statistics");
    Ok(reports)
}

fn print_summary(reports: &[NodeReport]) {
    println!(
        "{:>5} {:>7} {:>6} {:>6} {:>6} {:>6} {:>6} {:>6}  {}",
        "node", "epochs", "sent", "recv", "rdgs", "drop", "deliv", "dup", "exit"
    );
    for report in reports {
        let c = &report.counters;
        println!(
            "{:>5} {:>7} {:>6} {:>6} {:>6} {:>6} {:>6} {:>6}  {}",
            report.node,
            report.epochs,
            c.batches_sent,
            c.batches_received,
            c.readings_sent,
            c.aggregation_dropped,
            c.delivered,
            c.duplicates,
            report.exit
        );
    }
}
