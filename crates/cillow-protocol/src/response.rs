// SPDX-License-Identifier: MIT OR Apache-2.0
//! Response frames streamed from workers back to clients.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind tag for textual [`Stream`] frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// Evaluated code's standard output.
    Stdout,
    /// Evaluated code's standard error.
    Stderr,
    /// Output of a command or installer invocation.
    CmdExec,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
            Self::CmdExec => "cmd_exec",
        })
    }
}

/// Kind tag for binary [`ByteStream`] frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteStreamKind {
    /// Rendered image bytes.
    Image,
    /// Audio bytes.
    Audio,
    /// Video bytes.
    Video,
}

impl fmt::Display for ByteStreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
        })
    }
}

/// UTF-8 textual output produced during code or command execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    /// The stream kind.
    pub kind: StreamKind,
    /// The stream data.
    pub data: String,
}

/// Binary output produced during code execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ByteStream {
    /// The byte stream kind.
    pub kind: ByteStreamKind,
    /// The byte stream data.
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
    /// Identifier for audio or video payloads.
    #[serde(default)]
    pub id: Option<String>,
}

/// Exception details produced by a failed evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    /// Exception type name.
    pub type_name: String,
    /// Exception message.
    pub message: String,
    /// Where the exception occurred, when known.
    #[serde(default)]
    pub location: Option<String>,
}

impl fmt::Display for ExceptionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)?;
        if let Some(location) = &self.location {
            write!(f, "\n{location}")?;
        }
        Ok(())
    }
}

/// One frame in the ordered response stream of a single request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ResponseFrame {
    /// Textual output.
    Stream(Stream),
    /// Binary output.
    ByteStream(ByteStream),
    /// Final value of an expression evaluation.
    Result {
        /// The result value; may be any JSON-shaped payload.
        value: Value,
    },
    /// Evaluation failure details.
    ExceptionInfo(ExceptionInfo),
}

/// The client-side aggregate of one `RunCode` request: every frame the
/// worker emitted, accumulated until the terminator arrived.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    /// Final value of the evaluation (`Value::Null` when none was produced).
    pub result: Value,
    /// Textual streams, in emission order.
    pub streams: Vec<Stream>,
    /// Binary streams, in emission order.
    pub byte_streams: Vec<ByteStream>,
    /// Exception raised by the evaluation, if any.
    pub exception: Option<ExceptionInfo>,
}
