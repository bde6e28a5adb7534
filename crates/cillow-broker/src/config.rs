// SPDX-License-Identifier: MIT OR Apache-2.0
//! Broker construction parameters.

/// Tunables for a [`Broker`](crate::Broker).
///
/// Everything but the port is optional; unset values fall back to the
/// registry's derived sizing (CPU-clamped worker budget, two workers per
/// client, a dispatcher pool and queue sized from those).
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// TCP port for the router socket; `0` binds an ephemeral port.
    pub port: u16,
    /// Total worker processes allowed; clamped to the host CPU count.
    pub max_interpreters: Option<usize>,
    /// Worker processes allowed per client.
    pub interpreters_per_client: Option<usize>,
    /// Dispatcher task count.
    pub num_worker_threads: Option<usize>,
    /// Request queue capacity.
    pub max_queue_size: Option<usize>,
}

impl BrokerConfig {
    /// A config with defaults for everything but the port.
    #[must_use]
    pub fn new(port: u16) -> Self {
        Self {
            port,
            max_interpreters: None,
            interpreters_per_client: None,
            num_worker_threads: None,
            max_queue_size: None,
        }
    }
}
