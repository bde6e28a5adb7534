// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

use anyhow::{Context, Result};
use cillow_protocol::{Environment, SYSTEM_TOKEN};
use cillow_worker::{Interpreter, run_worker_loop};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cillow-worker", version, about = "Cillow worker process")]
struct Args {
    /// Environment to host: `$system` or an environment directory.
    #[arg(long, default_value = SYSTEM_TOKEN)]
    environment: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Stdout carries the pipe protocol; logs go to stderr for the parent
    // to forward.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cillow=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let environment = Environment::validate(&args.environment)
        .with_context(|| format!("environment {}", args.environment))?;

    let interpreter = Interpreter::new(environment);
    run_worker_loop(tokio::io::stdin(), tokio::io::stdout(), interpreter)
        .await
        .context("worker loop")
}
