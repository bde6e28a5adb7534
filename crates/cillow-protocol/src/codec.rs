// SPDX-License-Identifier: MIT OR Apache-2.0
//! Stateless MessagePack codec for request and response bodies.

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Errors from body encoding and decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Value could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Bytes could not be decoded into the expected type.
    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// The decoded value violates a shape constraint.
    #[error("invalid request: {0}")]
    Invalid(String),
}

/// Stateless codec shared by broker, workers, and clients.
///
/// Bodies are MessagePack in named (map) encoding, so every frame is
/// self-describing and round-trips bit-identically.
#[derive(Debug, Clone, Copy)]
pub struct WireCodec;

impl WireCodec {
    /// Encode a value into a MessagePack body.
    pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode a MessagePack body into a value.
    pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
