// SPDX-License-Identifier: MIT OR Apache-2.0
//! Broker error taxonomy.

use cillow_protocol::{ClientId, ProtocolError};
use cillow_registry::RegistryError;
use cillow_worker::WorkerError;
use thiserror::Error;

/// Errors from broker setup and request dispatch.
///
/// Dispatch-time variants are caught at the dispatcher boundary and
/// forwarded to the client as `request_exception` bodies; only
/// [`BrokerError::Bind`] is fatal to the process.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The router socket could not be bound at startup.
    #[error("failed to bind router socket: {0}")]
    Bind(#[source] zeromq::ZmqError),

    /// An admission or routing operation failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A worker failed mid-request.
    #[error(transparent)]
    Worker(#[from] WorkerError),

    /// A body failed to encode or decode.
    #[error(transparent)]
    Codec(#[from] ProtocolError),

    /// A lookup raced with the client's removal.
    #[error("Client '{0}' not found.")]
    UnknownClient(ClientId),
}
