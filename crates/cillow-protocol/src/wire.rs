// SPDX-License-Identifier: MIT OR Apache-2.0
//! Multipart frame layout: message-type tags and client identities.
//!
//! Incoming messages are three frames — identity, empty delimiter, body.
//! Outgoing messages are four — identity, empty delimiter, one of the tags
//! below, body.

use std::fmt;

use bytes::Bytes;

/// The literal message-type tag carried in the third outgoing frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Terminates a successful request; body is the encoded return value.
    RequestDone,
    /// Terminates a failed request; body is a UTF-8 error message.
    RequestException,
    /// One streamed response frame; zero or more per request.
    Interpreter,
}

impl MessageType {
    /// The tag bytes as they appear on the wire.
    #[must_use]
    pub const fn as_bytes(self) -> &'static [u8] {
        match self {
            Self::RequestDone => b"request_done",
            Self::RequestException => b"request_exception",
            Self::Interpreter => b"interpreter",
        }
    }

    /// Parse a tag frame received from the wire.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            b"request_done" => Some(Self::RequestDone),
            b"request_exception" => Some(Self::RequestException),
            b"interpreter" => Some(Self::Interpreter),
            _ => None,
        }
    }

    /// Returns `true` for the two terminator tags.
    #[must_use]
    pub const fn is_terminator(self) -> bool {
        matches!(self, Self::RequestDone | Self::RequestException)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::RequestDone => "request_done",
            Self::RequestException => "request_exception",
            Self::Interpreter => "interpreter",
        })
    }
}

/// A client identity: the routing-id frame the router transport supplies,
/// kept verbatim. Identities may be arbitrary bytes; display is lossy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(Bytes);

impl ClientId {
    /// Wrap a raw identity frame.
    #[must_use]
    pub fn new(bytes: Bytes) -> Self {
        Self(bytes)
    }

    /// The raw identity bytes for routing.
    #[must_use]
    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}
