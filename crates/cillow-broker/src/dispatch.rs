// SPDX-License-Identifier: MIT OR Apache-2.0
//! Dispatcher tasks: decode, register, route, stream.

use std::sync::Arc;
use std::time::Duration;

use cillow_protocol::{
    ClientId, EnvironmentScope, InterpreterMode, Request, ResponseFrame, SYSTEM_TOKEN, WireCodec,
};
use cillow_queue::{QueueItem, RequestQueue};
use cillow_registry::ClientRegistry;
use cillow_worker::WorkerRequest;
use tracing::{debug, warn};

use crate::error::BrokerError;
use crate::outbound::Responder;
use crate::stop::StopToken;

/// Queue poll budget; bounds how long a dispatcher can miss the stop
/// signal.
const POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Run one dispatcher until the stop token fires.
pub(crate) async fn run_dispatcher(
    queue: Arc<RequestQueue>,
    registry: Arc<ClientRegistry>,
    responder: Responder,
    stop: StopToken,
) {
    while !stop.is_cancelled() {
        let Some(item) = queue.pop_timeout(POLL_TIMEOUT).await else {
            continue;
        };
        handle_item(item, &registry, &responder).await;
    }
    debug!("dispatcher finished");
}

async fn handle_item(item: QueueItem, registry: &ClientRegistry, responder: &Responder) {
    let QueueItem { client_id, body } = item;

    let request: Request = match WireCodec::decode(&body) {
        Ok(request) => request,
        Err(e) => {
            responder.exception(&client_id, e.to_string());
            return;
        }
    };
    if let Err(e) = request.validate() {
        responder.exception(&client_id, e.to_string());
        return;
    }

    // First contact registers the client. A ModifyInterpreter carries the
    // new client's default environment; everything else defaults to
    // $system.
    let registered = match &request {
        Request::ModifyInterpreter { environment, .. } => {
            registry.register(&client_id, environment).await
        }
        _ => registry.register(&client_id, SYSTEM_TOKEN).await,
    };
    if let Err(e) = registered {
        responder.exception(&client_id, e.to_string());
        return;
    }

    if let Err(e) = dispatch(request, &client_id, registry, responder).await {
        warn!(client = %client_id, "request failed: {e}");
        responder.exception(&client_id, e.to_string());
    }
}

async fn dispatch(
    request: Request,
    client_id: &ClientId,
    registry: &ClientRegistry,
    responder: &Responder,
) -> Result<(), BrokerError> {
    match request {
        Request::GetEnvironment { kind } => {
            let snapshot = registry
                .snapshot(client_id)
                .await
                .ok_or_else(|| BrokerError::UnknownClient(client_id.clone()))?;
            let body = match kind {
                EnvironmentScope::Current => WireCodec::encode(&snapshot.current_environment)?,
                EnvironmentScope::Default => WireCodec::encode(&snapshot.default_environment)?,
                EnvironmentScope::All => WireCodec::encode(&snapshot.environments)?,
            };
            responder.done(client_id, body);
        }

        Request::ModifyInterpreter { environment, mode } => match mode {
            InterpreterMode::Switch => {
                let env = registry.switch_interpreter(client_id, &environment).await?;
                responder.done(client_id, WireCodec::encode(&env)?);
            }
            InterpreterMode::Delete => {
                registry.delete_interpreter(client_id, &environment).await;
                let snapshot = registry
                    .snapshot(client_id)
                    .await
                    .ok_or_else(|| BrokerError::UnknownClient(client_id.clone()))?;
                let default = snapshot.default_environment.to_string();
                let env = registry.switch_interpreter(client_id, &default).await?;
                responder.done(client_id, WireCodec::encode(&env)?);
            }
        },

        Request::SetEnvironmentVariables { variables } => {
            stream_to_worker(
                client_id,
                registry,
                responder,
                WorkerRequest::EnvironmentVariables { variables },
            )
            .await?;
        }
        Request::RunCommand { cmd } => {
            stream_to_worker(client_id, registry, responder, WorkerRequest::Cmd { cmd }).await?;
        }
        Request::InstallRequirements { requirements } => {
            stream_to_worker(
                client_id,
                registry,
                responder,
                WorkerRequest::Requirements { requirements },
            )
            .await?;
        }
        Request::RunCode { code } => {
            stream_to_worker(client_id, registry, responder, WorkerRequest::Code { code }).await?;
        }

        Request::Disconnect => {
            registry.remove(client_id).await;
            responder.done(client_id, Vec::new());
        }
    }
    Ok(())
}

/// Pipe one request to the client's current worker, forwarding every frame
/// it emits, then terminate with an empty `request_done`.
///
/// The worker handle is cloned out of the registry and driven outside its
/// lock; the handle's own pipe mutex serializes concurrent use.
async fn stream_to_worker(
    client_id: &ClientId,
    registry: &ClientRegistry,
    responder: &Responder,
    request: WorkerRequest,
) -> Result<(), BrokerError> {
    let (_environment, worker) = registry.current_worker(client_id).await?;

    let forward_to = responder.clone();
    let forward_id = client_id.clone();
    let mut sink = move |frame: ResponseFrame| match WireCodec::encode(&frame) {
        Ok(body) => forward_to.frame(&forward_id, body),
        Err(e) => warn!(client = %forward_id, "dropping unencodable frame: {e}"),
    };
    worker.execute(request, &mut sink).await?;

    responder.done(client_id, Vec::new());
    Ok(())
}
