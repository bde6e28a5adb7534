// SPDX-License-Identifier: MIT OR Apache-2.0
//! Length-prefixed MessagePack framing over the worker's stdio pipes.
//!
//! Each frame is a u32 big-endian length followed by a MessagePack body.
//! The parent writes [`WorkerRequest`] frames to the child's stdin; the
//! child answers with zero or more [`WorkerReply::Frame`]s and exactly one
//! [`WorkerReply::Completed`] sentinel per request.

use std::collections::BTreeMap;

use cillow_protocol::{ResponseFrame, WireCodec};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::WorkerError;

/// Upper bound on a single pipe frame; anything larger is a protocol error.
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// One unit of work delivered to a worker over its input pipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WorkerRequest {
    /// Evaluate a code snippet.
    Code {
        /// The source code.
        code: String,
    },
    /// Run a command, streaming its output.
    Cmd {
        /// Command argv.
        cmd: Vec<String>,
    },
    /// Install requirements into the worker's environment.
    Requirements {
        /// Requirement specifiers, one manifest line each.
        requirements: Vec<String>,
    },
    /// Merge variables into the worker's process environment.
    EnvironmentVariables {
        /// Variables to merge.
        variables: BTreeMap<String, String>,
    },
}

/// One frame on a worker's output pipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum WorkerReply {
    /// A streamed response frame for the in-flight request.
    Frame {
        /// The response frame.
        frame: ResponseFrame,
    },
    /// The completion sentinel: the in-flight request produced all of its
    /// frames and the worker is ready for the next one.
    Completed,
}

/// Write one length-prefixed frame and flush.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), WorkerError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = WireCodec::encode(value)?;
    let len = u32::try_from(body.len())
        .map_err(|_| WorkerError::Protocol("frame exceeds u32 length".into()))?;
    if len > MAX_FRAME_LEN {
        return Err(WorkerError::Protocol(format!("frame of {len} bytes exceeds limit")));
    }
    writer.write_u32(len).await.map_err(WorkerError::Pipe)?;
    writer.write_all(&body).await.map_err(WorkerError::Pipe)?;
    writer.flush().await.map_err(WorkerError::Pipe)?;
    Ok(())
}

/// Read one length-prefixed frame. Returns `Ok(None)` on a clean EOF at a
/// frame boundary.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, WorkerError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = match reader.read_u32().await {
        Ok(len) => len,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(WorkerError::Pipe(e)),
    };
    if len > MAX_FRAME_LEN {
        return Err(WorkerError::Protocol(format!("frame of {len} bytes exceeds limit")));
    }
    let mut body = vec![0u8; len as usize];
    reader
        .read_exact(&mut body)
        .await
        .map_err(WorkerError::Pipe)?;
    Ok(Some(WireCodec::decode(&body)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_round_trip_over_a_duplex_pipe() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let request = WorkerRequest::Cmd {
            cmd: vec!["echo".into(), "hi".into()],
        };
        write_frame(&mut a, &request).await.unwrap();
        drop(a);

        let got: Option<WorkerRequest> = read_frame(&mut b).await.unwrap();
        assert_eq!(got, Some(request));
        let eof: Option<WorkerRequest> = read_frame(&mut b).await.unwrap();
        assert!(eof.is_none());
    }
}
