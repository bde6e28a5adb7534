// SPDX-License-Identifier: MIT OR Apache-2.0
//! The outbound funnel: dispatchers send here, the front-end writes to the
//! socket.
//!
//! The router socket is not shareable across tasks, so every response
//! flows through one unbounded channel into the socket-owning front-end.

use cillow_protocol::{ClientId, MessageType};
use tokio::sync::mpsc;

/// One response message awaiting transmission.
#[derive(Debug)]
pub(crate) struct Outbound {
    pub client_id: ClientId,
    pub kind: MessageType,
    pub body: Vec<u8>,
}

/// Cloneable sender half handed to each dispatcher.
#[derive(Clone)]
pub struct Responder {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl Responder {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, client_id: &ClientId, kind: MessageType, body: Vec<u8>) {
        // A closed channel means the front-end is gone; the response has
        // nowhere to go either way.
        let _ = self.tx.send(Outbound {
            client_id: client_id.clone(),
            kind,
            body,
        });
    }

    /// Terminate a request successfully.
    pub fn done(&self, client_id: &ClientId, body: Vec<u8>) {
        self.send(client_id, MessageType::RequestDone, body);
    }

    /// Terminate a request with an error message.
    pub fn exception(&self, client_id: &ClientId, message: impl Into<String>) {
        self.send(
            client_id,
            MessageType::RequestException,
            message.into().into_bytes(),
        );
    }

    /// Forward one streamed response frame.
    pub fn frame(&self, client_id: &ClientId, body: Vec<u8>) {
        self.send(client_id, MessageType::Interpreter, body);
    }
}
