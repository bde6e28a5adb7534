// SPDX-License-Identifier: MIT OR Apache-2.0
//! Worker ownership seams: the handle the registry holds and the factory
//! that produces handles.

use std::sync::Arc;

use async_trait::async_trait;
use cillow_protocol::{Environment, ResponseFrame};

use crate::pipe::WorkerRequest;
use crate::WorkerError;

/// Callback receiving each streamed [`ResponseFrame`] as the worker emits it.
pub type FrameSink<'a> = &'a mut (dyn FnMut(ResponseFrame) + Send);

/// A live worker bound to one environment.
///
/// `execute` delivers one request and drains its response stream up to the
/// completion sentinel; the handle serializes concurrent callers on its
/// pipe, so dispatchers never interleave two requests on one worker.
#[async_trait]
pub trait WorkerHandle: Send + Sync {
    /// The environment this worker hosts.
    fn environment(&self) -> &Environment;

    /// Run one request to completion, forwarding every streamed frame.
    async fn execute(
        &self,
        request: WorkerRequest,
        sink: FrameSink<'_>,
    ) -> Result<(), WorkerError>;

    /// Stop the worker: cooperative first, forceful after the grace period.
    async fn stop(&self);
}

/// Produces worker handles for the registry.
///
/// The default implementation spawns the `cillow-worker` binary; tests
/// inject factories that fabricate in-process handles.
#[async_trait]
pub trait WorkerFactory: Send + Sync {
    /// Spawn a worker for a validated environment.
    async fn spawn(&self, environment: &Environment) -> Result<Arc<dyn WorkerHandle>, WorkerError>;
}
