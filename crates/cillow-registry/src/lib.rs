// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::HashMap;
use std::sync::Arc;

use cillow_protocol::{ClientId, Environment, EnvironmentError};
use cillow_worker::{WorkerError, WorkerFactory, WorkerHandle};
use indexmap::IndexMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by registry operations. The display strings are part of
/// the wire contract: dispatchers forward them verbatim as
/// `request_exception` bodies.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No more clients can be admitted.
    #[error("Client limit exceeded. Try again later.")]
    ClientLimit,

    /// Neither the per-client nor the global worker budget allows another
    /// worker.
    #[error("Unable to create new interpreter due to process limit.")]
    ProcessLimit,

    /// The client has no record.
    #[error("Client '{0}' not found.")]
    UnknownClient(ClientId),

    /// The environment failed validation.
    #[error(transparent)]
    Environment(#[from] EnvironmentError),

    /// A worker could not be spawned.
    #[error("failed to start interpreter: {0}")]
    Worker(#[from] WorkerError),
}

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Derived sizing for the broker, computed once from the configured caps
/// and the host CPU count.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Total worker processes allowed, clamped to the host CPU count.
    pub max_interpreters: usize,
    /// Worker processes allowed per client.
    pub interpreters_per_client: usize,
    /// Host CPU count used for the clamps.
    pub cpu_count: usize,
}

impl Limits {
    /// Compute limits from optional configuration.
    #[must_use]
    pub fn new(max_interpreters: Option<usize>, interpreters_per_client: Option<usize>) -> Self {
        let cpu_count = num_cpus::get();
        let max_interpreters = max_interpreters.unwrap_or(cpu_count).min(cpu_count).max(1);
        let interpreters_per_client = interpreters_per_client
            .unwrap_or_else(|| 2.min(max_interpreters))
            .max(1);
        Self {
            max_interpreters,
            interpreters_per_client,
            cpu_count,
        }
    }

    /// Clients admitted at once: `max_interpreters / interpreters_per_client`.
    #[must_use]
    pub fn max_clients(&self) -> usize {
        self.max_interpreters / self.interpreters_per_client
    }

    /// Dispatcher task count that keeps every admitted client served.
    #[must_use]
    pub fn optimal_worker_thread_count(&self) -> usize {
        (2 * self.max_clients()).min(self.cpu_count).max(1)
    }

    /// Queue capacity that gives every possible worker a small backlog.
    #[must_use]
    pub fn optimal_queue_capacity(&self) -> usize {
        self.max_clients() * self.interpreters_per_client * 2
    }
}

// ---------------------------------------------------------------------------
// Client records
// ---------------------------------------------------------------------------

struct ClientRecord {
    default_environment: Environment,
    current: Environment,
    // Insertion-ordered: `GetEnvironment{all}` reports spawn order.
    interpreters: IndexMap<Environment, Arc<dyn WorkerHandle>>,
}

impl ClientRecord {
    fn current_worker(&self) -> Option<Arc<dyn WorkerHandle>> {
        self.interpreters.get(&self.current).cloned()
    }
}

/// A read-only snapshot of one client's record.
#[derive(Debug, Clone)]
pub struct ClientSnapshot {
    /// The environment the client registered with.
    pub default_environment: Environment,
    /// The environment of the currently selected worker.
    pub current_environment: Environment,
    /// Every environment the client owns a worker for, in spawn order.
    pub environments: Vec<Environment>,
}

// ---------------------------------------------------------------------------
// ClientRegistry
// ---------------------------------------------------------------------------

/// The broker's shared client state.
///
/// A single mutex guards the whole map; every public operation holds it for
/// its full duration, which keeps the cap invariants trivial to reason
/// about. Worker handles are cloned out under the lock; the actual pipe
/// traffic happens outside it.
pub struct ClientRegistry {
    limits: Limits,
    factory: Arc<dyn WorkerFactory>,
    clients: Mutex<HashMap<ClientId, ClientRecord>>,
}

impl ClientRegistry {
    /// Create a registry producing workers through `factory`.
    pub fn new(limits: Limits, factory: Arc<dyn WorkerFactory>) -> Self {
        Self {
            limits,
            factory,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// The derived sizing this registry enforces.
    #[must_use]
    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Register a client, spawning its first worker for `environment`.
    ///
    /// A second registration of a live client is a no-op regardless of the
    /// environment argument.
    pub async fn register(
        &self,
        client_id: &ClientId,
        environment: &str,
    ) -> Result<(), RegistryError> {
        let mut clients = self.clients.lock().await;
        if clients.contains_key(client_id) {
            return Ok(());
        }
        if clients.len() >= self.limits.max_clients() {
            return Err(RegistryError::ClientLimit);
        }

        let environment = Environment::validate(environment)?;
        let worker = self.factory.spawn(&environment).await?;
        let mut interpreters = IndexMap::new();
        interpreters.insert(environment.clone(), worker);
        clients.insert(
            client_id.clone(),
            ClientRecord {
                default_environment: environment.clone(),
                current: environment.clone(),
                interpreters,
            },
        );
        info!(client = %client_id, environment = %environment, "client joined");
        Ok(())
    }

    /// Snapshot a client's record, if registered.
    pub async fn snapshot(&self, client_id: &ClientId) -> Option<ClientSnapshot> {
        let clients = self.clients.lock().await;
        clients.get(client_id).map(|record| ClientSnapshot {
            default_environment: record.default_environment.clone(),
            current_environment: record.current.clone(),
            environments: record.interpreters.keys().cloned().collect(),
        })
    }

    /// The client's currently selected worker and its environment.
    pub async fn current_worker(
        &self,
        client_id: &ClientId,
    ) -> Result<(Environment, Arc<dyn WorkerHandle>), RegistryError> {
        let clients = self.clients.lock().await;
        let record = clients
            .get(client_id)
            .ok_or_else(|| RegistryError::UnknownClient(client_id.clone()))?;
        let worker = record
            .current_worker()
            .ok_or_else(|| RegistryError::UnknownClient(client_id.clone()))?;
        Ok((record.current.clone(), worker))
    }

    /// Switch the client to `environment`, spawning a worker when the caps
    /// allow one. Returns the canonical environment.
    pub async fn switch_interpreter(
        &self,
        client_id: &ClientId,
        environment: &str,
    ) -> Result<Environment, RegistryError> {
        let mut clients = self.clients.lock().await;
        let total_active: usize = clients.values().map(|c| c.interpreters.len()).sum();
        let record = clients
            .get_mut(client_id)
            .ok_or_else(|| RegistryError::UnknownClient(client_id.clone()))?;

        let environment = Environment::validate(environment)?;
        // Early return only while the worker actually exists; after a
        // delete of the current environment we must fall through and
        // respawn.
        if record.current == environment && record.interpreters.contains_key(&environment) {
            return Ok(environment);
        }

        if !record.interpreters.contains_key(&environment) {
            if record.interpreters.len() < self.limits.interpreters_per_client
                && total_active < self.limits.max_interpreters
            {
                let worker = self.factory.spawn(&environment).await?;
                record.interpreters.insert(environment.clone(), worker);
            } else {
                return Err(RegistryError::ProcessLimit);
            }
        }

        record.current = environment.clone();
        Ok(environment)
    }

    /// Stop and remove the client's worker for `environment`.
    ///
    /// Unknown clients and absent environments are silent no-ops. The
    /// current selection is left untouched; callers follow up with a
    /// [`switch_interpreter`](Self::switch_interpreter) to the default.
    pub async fn delete_interpreter(&self, client_id: &ClientId, environment: &str) {
        let mut clients = self.clients.lock().await;
        let Some(record) = clients.get_mut(client_id) else {
            return;
        };
        let Ok(environment) = Environment::validate(environment) else {
            return;
        };
        if let Some(worker) = record.interpreters.shift_remove(&environment) {
            worker.stop().await;
        }
    }

    /// Remove a client, stopping every worker it owns.
    pub async fn remove(&self, client_id: &ClientId) {
        let mut clients = self.clients.lock().await;
        let Some(record) = clients.remove(client_id) else {
            return;
        };
        for (_, worker) in record.interpreters {
            worker.stop().await;
        }
        info!(client = %client_id, "client left");
    }

    /// Stop every worker of every client and clear the registry.
    pub async fn cleanup(&self) {
        let mut clients = self.clients.lock().await;
        for (_, record) in clients.drain() {
            for (_, worker) in record.interpreters {
                worker.stop().await;
            }
        }
    }

    /// Total workers currently alive across all clients.
    pub async fn total_active_workers(&self) -> usize {
        let clients = self.clients.lock().await;
        clients.values().map(|c| c.interpreters.len()).sum()
    }

    /// Number of registered clients.
    pub async fn client_count(&self) -> usize {
        self.clients.lock().await.len()
    }
}
