// SPDX-License-Identifier: MIT OR Apache-2.0
//! Parent-side worker process handle: spawn, drive, stop.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use cillow_protocol::Environment;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::handle::{FrameSink, WorkerFactory, WorkerHandle};
use crate::pipe::{WorkerReply, WorkerRequest, read_frame, write_frame};
use crate::shell::which;
use crate::WorkerError;

/// How long a stopped worker gets to exit on its own before being killed.
const STOP_GRACE: Duration = Duration::from_secs(5);

struct WorkerIo {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// A spawned `cillow-worker` child process.
///
/// The pipes live behind one async mutex, so concurrent `execute` calls on
/// the same worker are serialized for the full request-to-sentinel span.
/// The registry owns the handle; nothing else mutates it.
pub struct WorkerProcess {
    environment: Environment,
    io: Mutex<Option<WorkerIo>>,
    child: Mutex<Child>,
    stopped: AtomicBool,
}

impl std::fmt::Debug for WorkerProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerProcess")
            .field("environment", &self.environment)
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish()
    }
}

impl WorkerProcess {
    /// Spawn a worker for `environment`, locating the binary via
    /// `CILLOW_WORKER_BIN`, the current executable's directory, then PATH.
    pub async fn spawn(environment: Environment) -> Result<Self, WorkerError> {
        let binary = worker_binary()?;
        Self::spawn_with_binary(binary, environment).await
    }

    /// Spawn a worker using an explicit binary path.
    pub async fn spawn_with_binary(
        binary: PathBuf,
        environment: Environment,
    ) -> Result<Self, WorkerError> {
        let mut cmd = Command::new(&binary);
        cmd.arg("--environment")
            .arg(environment.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(WorkerError::Spawn)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| WorkerError::Protocol("stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WorkerError::Protocol("stdout unavailable".into()))?;

        // Forward worker stderr via tracing.
        if let Some(stderr) = child.stderr.take() {
            let env = environment.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let line = line.trim_end();
                    if !line.is_empty() {
                        warn!(target: "cillow.worker.stderr", environment = %env, "{line}");
                    }
                }
            });
        }

        debug!(environment = %environment, "spawned worker process");

        Ok(Self {
            environment,
            io: Mutex::new(Some(WorkerIo {
                stdin,
                stdout: BufReader::new(stdout),
            })),
            child: Mutex::new(child),
            stopped: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl WorkerHandle for WorkerProcess {
    fn environment(&self) -> &Environment {
        &self.environment
    }

    async fn execute(
        &self,
        request: WorkerRequest,
        sink: FrameSink<'_>,
    ) -> Result<(), WorkerError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(WorkerError::Stopped);
        }

        let mut guard = self.io.lock().await;
        let io = guard.as_mut().ok_or(WorkerError::Stopped)?;

        write_frame(&mut io.stdin, &request).await?;

        // Drain until the sentinel. A worker that dies (or is stopped and
        // killed) closes its stdout, which surfaces here as EOF.
        loop {
            match read_frame::<_, WorkerReply>(&mut io.stdout).await? {
                Some(WorkerReply::Frame { frame }) => sink(frame),
                Some(WorkerReply::Completed) => return Ok(()),
                None => {
                    if self.stopped.load(Ordering::SeqCst) {
                        return Err(WorkerError::Stopped);
                    }
                    return Err(WorkerError::Exited);
                }
            }
        }
    }

    async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        // Cooperative: closing stdin ends the child's event loop. Skipped
        // when a drain still holds the pipes; the kill below unblocks it.
        if let Ok(mut guard) = self.io.try_lock() {
            if let Some(io) = guard.as_mut() {
                let _ = io.stdin.shutdown().await;
            }
            *guard = None;
        }

        let mut child = self.child.lock().await;
        match timeout(STOP_GRACE, child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                warn!(environment = %self.environment, "worker ignored stop; killing");
                let _ = child.kill().await;
            }
        }
        debug!(environment = %self.environment, "worker stopped");
    }
}

/// Default factory: one spawned `cillow-worker` process per handle.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessFactory;

#[async_trait]
impl WorkerFactory for ProcessFactory {
    async fn spawn(&self, environment: &Environment) -> Result<Arc<dyn WorkerHandle>, WorkerError> {
        Ok(Arc::new(WorkerProcess::spawn(environment.clone()).await?))
    }
}

/// Locate the worker binary.
fn worker_binary() -> Result<PathBuf, WorkerError> {
    if let Some(explicit) = std::env::var_os("CILLOW_WORKER_BIN") {
        return Ok(PathBuf::from(explicit));
    }
    if let Ok(exe) = std::env::current_exe()
        && let Some(dir) = exe.parent()
    {
        let sibling = dir.join(format!("cillow-worker{}", std::env::consts::EXE_SUFFIX));
        if sibling.is_file() {
            return Ok(sibling);
        }
    }
    which("cillow-worker").ok_or(WorkerError::BinaryNotFound)
}
