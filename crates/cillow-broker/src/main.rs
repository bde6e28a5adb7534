// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

use anyhow::{Context, Result};
use cillow_broker::{Broker, BrokerConfig};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cillow-broker", version, about = "Cillow code-execution broker")]
struct Args {
    /// TCP port to bind the router socket on.
    #[arg(long)]
    port: u16,

    /// Maximum total interpreter processes (default: host CPU count).
    #[arg(long)]
    max_interpreters: Option<usize>,

    /// Maximum interpreter processes per client.
    #[arg(long)]
    interpreters_per_client: Option<usize>,

    /// Number of dispatcher tasks.
    #[arg(long)]
    num_worker_threads: Option<usize>,

    /// Request queue capacity.
    #[arg(long)]
    max_queue_size: Option<usize>,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("cillow=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cillow=info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = BrokerConfig {
        port: args.port,
        max_interpreters: args.max_interpreters,
        interpreters_per_client: args.interpreters_per_client,
        num_worker_threads: args.num_worker_threads,
        max_queue_size: args.max_queue_size,
    };

    let broker = Broker::bind(config)
        .await
        .with_context(|| format!("bind port {}", args.port))?;

    broker.run_until_signalled().await.context("broker run")
}
