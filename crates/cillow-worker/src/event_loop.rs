// SPDX-License-Identifier: MIT OR Apache-2.0
//! The child-side event loop: one request in, an ordered frame stream and a
//! completion sentinel out.

use cillow_protocol::ResponseFrame;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::interpreter::Interpreter;
use crate::pipe::{WorkerReply, WorkerRequest, read_frame, write_frame};
use crate::WorkerError;

/// Run the worker loop until the input pipe closes.
///
/// Each request's frames are forwarded to `writer` as they are produced,
/// followed by exactly one [`WorkerReply::Completed`]. An undecodable frame
/// is answered with a bare sentinel so the parent's drain never wedges; a
/// failure inside request handling is fatal to the worker, which the parent
/// observes as EOF.
pub async fn run_worker_loop<R, W>(
    mut reader: R,
    mut writer: W,
    mut interpreter: Interpreter,
) -> Result<(), WorkerError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    debug!(environment = %interpreter.environment(), "worker loop started");

    loop {
        let request: WorkerRequest = match read_frame(&mut reader).await {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(WorkerError::Codec(e)) => {
                warn!("ignoring undecodable request frame: {e}");
                write_frame(&mut writer, &WorkerReply::Completed).await?;
                continue;
            }
            Err(e) => return Err(e),
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<ResponseFrame>();
        let forward = async {
            while let Some(frame) = rx.recv().await {
                write_frame(&mut writer, &WorkerReply::Frame { frame }).await?;
            }
            Ok::<(), WorkerError>(())
        };
        let work = async {
            let mut sink = move |frame: ResponseFrame| {
                let _ = tx.send(frame);
            };
            interpreter.handle(request, &mut sink).await
        };

        let (forwarded, handled) = tokio::join!(forward, work);
        forwarded?;
        handled?;

        write_frame(&mut writer, &WorkerReply::Completed).await?;
    }

    debug!("worker loop finished");
    Ok(())
}
