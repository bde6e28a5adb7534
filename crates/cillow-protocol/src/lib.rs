// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod environment;
pub mod request;
pub mod response;
pub mod wire;

pub use codec::{ProtocolError, WireCodec};
pub use environment::{Environment, EnvironmentError, SYSTEM_TOKEN};
pub use request::{EnvironmentScope, InterpreterMode, Request};
pub use response::{
    ByteStream, ByteStreamKind, ExceptionInfo, Execution, ResponseFrame, Stream, StreamKind,
};
pub use wire::{ClientId, MessageType};
