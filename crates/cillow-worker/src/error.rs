// SPDX-License-Identifier: MIT OR Apache-2.0
//! Error types for worker I/O and lifecycle.

use cillow_protocol::ProtocolError;
use thiserror::Error;

/// Errors from worker process spawning, pipe I/O, and protocol handling.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Failed to spawn a child process.
    #[error("failed to spawn process: {0}")]
    Spawn(#[source] std::io::Error),

    /// A read or write on a worker pipe failed.
    #[error("worker pipe error: {0}")]
    Pipe(#[source] std::io::Error),

    /// A frame violated the pipe protocol.
    #[error("worker protocol violation: {0}")]
    Protocol(String),

    /// A frame body failed to encode or decode.
    #[error(transparent)]
    Codec(#[from] ProtocolError),

    /// The worker process exited before completing the request.
    #[error("worker process exited unexpectedly")]
    Exited,

    /// The worker has been stopped and accepts no further requests.
    #[error("worker process is stopped")]
    Stopped,

    /// No worker binary could be located.
    #[error("cillow-worker binary not found; set CILLOW_WORKER_BIN or add it to PATH")]
    BinaryNotFound,
}
