// SPDX-License-Identifier: MIT OR Apache-2.0
//! The single-reader front-end owning the router socket.

use std::sync::Arc;

use bytes::Bytes;
use cillow_protocol::{ClientId, MessageType};
use cillow_queue::{QueueError, QueueItem, RequestQueue};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use zeromq::{RouterSocket, SocketRecv, SocketSend, ZmqMessage};

use crate::outbound::Outbound;
use crate::stop::StopToken;

/// Error body for malformed multipart messages.
const INVALID_FRAMES: &str = "Invalid number of frames received";

/// Run the front-end until the stop token fires.
///
/// Incoming messages are framing-checked and enqueued without blocking;
/// outbound responses from the dispatcher pool are written to the socket.
/// Neither path may stall the other, so both are arms of one select loop.
pub(crate) async fn run_frontend(
    mut socket: RouterSocket,
    queue: Arc<RequestQueue>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    stop: StopToken,
) {
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,

            response = outbound.recv() => {
                let Some(response) = response else { break };
                send_response(&mut socket, response).await;
            }

            incoming = socket.recv() => match incoming {
                Ok(message) => handle_incoming(&mut socket, &queue, message).await,
                Err(e) => warn!("router recv failed: {e}"),
            },
        }
    }
    debug!("front-end loop finished");
}

async fn handle_incoming(socket: &mut RouterSocket, queue: &RequestQueue, message: ZmqMessage) {
    let frames = message.into_vec();

    if frames.len() != 3 {
        warn!(count = frames.len(), "malformed multipart message");
        let Some(identity) = frames.first() else {
            return;
        };
        let response = Outbound {
            client_id: ClientId::new(identity.clone()),
            kind: MessageType::RequestException,
            body: INVALID_FRAMES.as_bytes().to_vec(),
        };
        send_response(socket, response).await;
        return;
    }

    let client_id = ClientId::new(frames[0].clone());
    let body = frames[2].clone();

    if let Err(QueueError::Full { max }) = queue.try_push(QueueItem {
        client_id: client_id.clone(),
        body,
    }) {
        debug!(client = %client_id, max, "request queue full");
        let response = Outbound {
            client_id,
            kind: MessageType::RequestException,
            body: QueueError::Full { max }.to_string().into_bytes(),
        };
        send_response(socket, response).await;
    }
}

async fn send_response(socket: &mut RouterSocket, response: Outbound) {
    let mut message = ZmqMessage::from(response.client_id.as_bytes().to_vec());
    message.push_back(Bytes::new());
    message.push_back(Bytes::from_static(response.kind.as_bytes()));
    message.push_back(Bytes::from(response.body));

    if let Err(e) = socket.send(message).await {
        warn!(client = %response.client_id, "response send failed: {e}");
    }
}
