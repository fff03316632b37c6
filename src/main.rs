use std::net::SocketAddr;
use std::time::Duration;

use ringstore::config::NodeConfig;
use ringstore::node::{run_node, NodeMode};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        // .with_max_level(tracing::Level::DEBUG)
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 3 {
        eprintln!(
            "Usage: {} --bind <addr:port> (--peer <addr:port> ... | --seed <addr:port>)",
            args[0]
        );
        eprintln!("       [--replication <n>] [--delta <ms>] [--keyspace <step>]");
        eprintln!(
            "Example: {} --bind 127.0.0.1:5000 --peer 127.0.0.1:5000 --peer 127.0.0.1:5001",
            args[0]
        );
        eprintln!(
            "Example: {} --bind 127.0.0.1:5002 --seed 127.0.0.1:5000",
            args[0]
        );
        std::process::exit(1);
    }

    let mut bind_addr: Option<SocketAddr> = None;
    let mut peers: Vec<SocketAddr> = vec![];
    let mut seed: Option<SocketAddr> = None;
    let mut config = NodeConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" => {
                bind_addr = Some(args[i + 1].parse()?);
                i += 2;
            }
            "--peer" => {
                peers.push(args[i + 1].parse()?);
                i += 2;
            }
            "--seed" => {
                seed = Some(args[i + 1].parse()?);
                i += 2;
            }
            "--replication" => {
                config.replication_degree = args[i + 1].parse()?;
                i += 2;
            }
            "--delta" => {
                config.delta = Duration::from_millis(args[i + 1].parse()?);
                i += 2;
            }
            "--keyspace" => {
                config.key_space = args[i + 1].parse()?;
                i += 2;
            }
            _ => {
                i += 1;
            }
        }
    }

    let Some(bind_addr) = bind_addr else {
        anyhow::bail!("--bind is required");
    };

    let mode = match (peers.is_empty(), seed) {
        (false, None) => {
            tracing::info!("Starting as genesis node with {} peers", peers.len());
            NodeMode::Genesis { peers }
        }
        (true, Some(seed)) => {
            tracing::info!("Joining the cluster via seed {}", seed);
            NodeMode::Join { seed }
        }
        _ => anyhow::bail!("pass either --peer (genesis) or --seed (join), not both"),
    };

    tracing::info!("Starting node on {}", bind_addr);
    run_node(config, bind_addr, mode).await
}
