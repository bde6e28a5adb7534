// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod dispatch;
mod error;
mod frontend;
mod outbound;
mod stop;

use std::sync::Arc;

use cillow_queue::RequestQueue;
use cillow_registry::{ClientRegistry, Limits};
use cillow_worker::{ProcessFactory, WorkerFactory};
use tracing::info;
use zeromq::{Endpoint, RouterSocket, Socket};

pub use config::BrokerConfig;
pub use error::BrokerError;
pub use outbound::Responder;
pub use stop::StopToken;

/// The broker: a bound router socket, a registry, a queue, and the task
/// pool that connects them.
///
/// Construction binds the socket — a bind failure is fatal, per the
/// failure model — and [`run`](Broker::run) drives everything until the
/// stop token fires.
pub struct Broker {
    socket: RouterSocket,
    endpoint: Endpoint,
    registry: Arc<ClientRegistry>,
    queue: Arc<RequestQueue>,
    stop: StopToken,
    num_worker_threads: usize,
}

impl Broker {
    /// Bind a broker that spawns real worker processes.
    pub async fn bind(config: BrokerConfig) -> Result<Self, BrokerError> {
        let limits = Limits::new(config.max_interpreters, config.interpreters_per_client);
        let registry = Arc::new(ClientRegistry::new(limits, Arc::new(ProcessFactory)));
        Self::bind_with_registry(config, registry).await
    }

    /// Bind a broker with a custom worker factory (tests, embedders).
    pub async fn bind_with_factory(
        config: BrokerConfig,
        factory: Arc<dyn WorkerFactory>,
    ) -> Result<Self, BrokerError> {
        let limits = Limits::new(config.max_interpreters, config.interpreters_per_client);
        let registry = Arc::new(ClientRegistry::new(limits, factory));
        Self::bind_with_registry(config, registry).await
    }

    /// Bind a broker around an existing registry.
    pub async fn bind_with_registry(
        config: BrokerConfig,
        registry: Arc<ClientRegistry>,
    ) -> Result<Self, BrokerError> {
        let limits = registry.limits();
        let num_worker_threads = config
            .num_worker_threads
            .unwrap_or_else(|| limits.optimal_worker_thread_count());
        let max_queue_size = config
            .max_queue_size
            .unwrap_or_else(|| limits.optimal_queue_capacity());

        info!("Max interpreter processes: {}", limits.max_interpreters);
        info!(
            "Interpreter processes per client: {}",
            limits.interpreters_per_client
        );
        info!("Number of worker threads: {num_worker_threads}");
        info!("Max request queue size: {max_queue_size}");

        let mut socket = RouterSocket::new();
        let endpoint = socket
            .bind(&format!("tcp://0.0.0.0:{}", config.port))
            .await
            .map_err(BrokerError::Bind)?;
        info!("Listening on {endpoint}");

        Ok(Self {
            socket,
            endpoint,
            registry,
            queue: Arc::new(RequestQueue::new(max_queue_size)),
            stop: StopToken::new(),
            num_worker_threads,
        })
    }

    /// The bound endpoint, with any ephemeral port resolved.
    #[must_use]
    pub fn endpoint(&self) -> String {
        self.endpoint.to_string()
    }

    /// The bound TCP port, when the endpoint is TCP.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        match &self.endpoint {
            Endpoint::Tcp(_, port) => Some(*port),
            _ => None,
        }
    }

    /// A stop token that shuts the broker down when cancelled.
    #[must_use]
    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    /// The shared registry (admission state, worker ownership).
    #[must_use]
    pub fn registry(&self) -> Arc<ClientRegistry> {
        Arc::clone(&self.registry)
    }

    /// Run until the stop token fires, then tear down: join the
    /// dispatchers, stop every worker, drop the socket.
    pub async fn run(self) -> Result<(), BrokerError> {
        let (responder, outbound_rx) = Responder::channel();

        let mut dispatchers = Vec::with_capacity(self.num_worker_threads);
        for _ in 0..self.num_worker_threads {
            dispatchers.push(tokio::spawn(dispatch::run_dispatcher(
                Arc::clone(&self.queue),
                Arc::clone(&self.registry),
                responder.clone(),
                self.stop.clone(),
            )));
        }

        frontend::run_frontend(
            self.socket,
            Arc::clone(&self.queue),
            outbound_rx,
            self.stop.clone(),
        )
        .await;

        // Stopping workers first closes their pipes, which unblocks any
        // dispatcher still draining one.
        info!("Cleaning up resources...");
        self.registry.cleanup().await;

        info!("Stopping worker threads...");
        for dispatcher in dispatchers {
            let _ = dispatcher.await;
        }
        info!("Shutdown complete.");
        Ok(())
    }

    /// Like [`run`](Broker::run), additionally wiring SIGINT/SIGTERM to
    /// the stop token.
    pub async fn run_until_signalled(self) -> Result<(), BrokerError> {
        let stop = self.stop_token();
        tokio::spawn(async move {
            wait_for_signal().await;
            info!("Shutdown signal received");
            stop.cancel();
        });
        self.run().await
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            tracing::warn!("SIGTERM handler unavailable: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
