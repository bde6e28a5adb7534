// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use cillow_protocol::{
    Environment, EnvironmentScope, Execution, InterpreterMode, MessageType, ProtocolError,
    Request, ResponseFrame, WireCodec,
};
use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;
use zeromq::{DealerSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

/// Errors surfaced by client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The underlying socket failed.
    #[error("transport error: {0}")]
    Transport(#[from] zeromq::ZmqError),

    /// No response arrived within the configured request timeout.
    #[error("Request timed out")]
    Timeout,

    /// A body failed to encode or decode.
    #[error(transparent)]
    Codec(#[from] ProtocolError),

    /// The broker answered with `request_exception`.
    #[error("{0}")]
    Server(String),

    /// The response violated the frame layout.
    #[error("protocol violation: {0}")]
    Protocol(String),
}

/// A connection to the broker.
///
/// Construction performs the first `switch_interpreter`, so the chosen
/// environment becomes the client's default on the broker side. All
/// requests are strictly sequential: one outstanding request per client.
pub struct Client {
    socket: DealerSocket,
    current_environment: Option<Environment>,
    default_environment: Option<Environment>,
    request_timeout: Option<Duration>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("current_environment", &self.current_environment)
            .field("default_environment", &self.default_environment)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl Client {
    /// Connect to `addr` (e.g. `tcp://localhost:5556`) and register with
    /// `environment` as the default.
    pub async fn connect(addr: &str, environment: &str) -> Result<Self, ClientError> {
        let mut socket = DealerSocket::new();
        socket.connect(addr).await?;
        debug!(addr, "connected to broker");

        let mut client = Self {
            socket,
            current_environment: None,
            default_environment: None,
            request_timeout: None,
        };
        client.switch_interpreter(environment).await?;
        Ok(client)
    }

    /// Bound on the wait for the first response frame of each request.
    /// `None` (the default) waits indefinitely.
    pub fn set_request_timeout(&mut self, timeout: Option<Duration>) {
        self.request_timeout = timeout;
    }

    /// Send one request and drain its response stream.
    ///
    /// `on_frame` sees every `interpreter` frame in arrival order; the
    /// terminator's body is returned. A `request_exception` terminator
    /// becomes [`ClientError::Server`].
    async fn request(
        &mut self,
        request: &Request,
        mut on_frame: impl FnMut(ResponseFrame),
    ) -> Result<Vec<u8>, ClientError> {
        let body = WireCodec::encode(request)?;
        let mut message = ZmqMessage::from(Vec::<u8>::new());
        message.push_back(Bytes::from(body));
        self.socket.send(message).await?;

        let mut first = true;
        loop {
            let reply = if first && let Some(budget) = self.request_timeout {
                timeout(budget, self.socket.recv())
                    .await
                    .map_err(|_| ClientError::Timeout)??
            } else {
                self.socket.recv().await?
            };
            first = false;

            let frames = reply.into_vec();
            if frames.len() != 3 {
                return Err(ClientError::Protocol(format!(
                    "expected 3 response frames, got {}",
                    frames.len()
                )));
            }
            let kind = MessageType::from_bytes(&frames[1]).ok_or_else(|| {
                ClientError::Protocol(format!(
                    "unknown message type {:?}",
                    String::from_utf8_lossy(&frames[1])
                ))
            })?;
            match kind {
                MessageType::RequestDone => return Ok(frames[2].to_vec()),
                MessageType::RequestException => {
                    return Err(ClientError::Server(
                        String::from_utf8_lossy(&frames[2]).into_owned(),
                    ));
                }
                MessageType::Interpreter => on_frame(WireCodec::decode(&frames[2])?),
            }
        }
    }

    async fn request_value<T: serde::de::DeserializeOwned>(
        &mut self,
        request: &Request,
    ) -> Result<T, ClientError> {
        let body = self.request(request, |_| {}).await?;
        Ok(WireCodec::decode(&body)?)
    }

    /// The environment of the currently selected interpreter.
    pub async fn current_environment(&mut self) -> Result<Environment, ClientError> {
        if let Some(env) = &self.current_environment {
            return Ok(env.clone());
        }
        let env: Environment = self
            .request_value(&Request::GetEnvironment {
                kind: EnvironmentScope::Current,
            })
            .await?;
        self.current_environment = Some(env.clone());
        Ok(env)
    }

    /// The environment the broker holds as this client's default.
    pub async fn default_environment(&mut self) -> Result<Environment, ClientError> {
        if let Some(env) = &self.default_environment {
            return Ok(env.clone());
        }
        let env: Environment = self
            .request_value(&Request::GetEnvironment {
                kind: EnvironmentScope::Default,
            })
            .await?;
        self.default_environment = Some(env.clone());
        Ok(env)
    }

    /// Every environment this client owns a worker for, in spawn order.
    pub async fn all_environments(&mut self) -> Result<Vec<Environment>, ClientError> {
        self.request_value(&Request::GetEnvironment {
            kind: EnvironmentScope::All,
        })
        .await
    }

    /// Switch to `environment`, spawning its interpreter when needed.
    /// Returns the canonical environment.
    pub async fn switch_interpreter(
        &mut self,
        environment: &str,
    ) -> Result<Environment, ClientError> {
        let env: Environment = self
            .request_value(&Request::ModifyInterpreter {
                environment: environment.to_string(),
                mode: InterpreterMode::Switch,
            })
            .await?;
        self.current_environment = Some(env.clone());
        Ok(env)
    }

    /// Stop `environment`'s interpreter; the broker falls back to the
    /// default environment, which is returned.
    pub async fn delete_interpreter(
        &mut self,
        environment: &str,
    ) -> Result<Environment, ClientError> {
        let env: Environment = self
            .request_value(&Request::ModifyInterpreter {
                environment: environment.to_string(),
                mode: InterpreterMode::Delete,
            })
            .await?;
        self.current_environment = Some(env.clone());
        Ok(env)
    }

    /// Merge variables into the current interpreter's process environment.
    pub async fn set_environment_variables(
        &mut self,
        variables: BTreeMap<String, String>,
    ) -> Result<(), ClientError> {
        self.request(&Request::SetEnvironmentVariables { variables }, |_| {})
            .await?;
        Ok(())
    }

    /// Run a command in the current interpreter, streaming its output.
    pub async fn run_command(
        &mut self,
        cmd: &[String],
        mut on_stream: impl FnMut(&ResponseFrame),
    ) -> Result<(), ClientError> {
        self.request(
            &Request::RunCommand { cmd: cmd.to_vec() },
            |frame| on_stream(&frame),
        )
        .await?;
        Ok(())
    }

    /// Install requirements into the current environment, streaming
    /// installer output.
    pub async fn install_requirements(
        &mut self,
        requirements: &[String],
        mut on_stream: impl FnMut(&ResponseFrame),
    ) -> Result<(), ClientError> {
        self.request(
            &Request::InstallRequirements {
                requirements: requirements.to_vec(),
            },
            |frame| on_stream(&frame),
        )
        .await?;
        Ok(())
    }

    /// Run code in the current interpreter, accumulating the full response
    /// stream.
    pub async fn run_code(&mut self, code: &str) -> Result<Execution, ClientError> {
        self.run_code_with(code, |_| {}).await
    }

    /// Like [`run_code`](Self::run_code), additionally invoking `on_stream`
    /// for each `Stream`/`ByteStream` frame as it arrives.
    pub async fn run_code_with(
        &mut self,
        code: &str,
        mut on_stream: impl FnMut(&ResponseFrame),
    ) -> Result<Execution, ClientError> {
        let mut execution = Execution::default();
        self.request(
            &Request::RunCode {
                code: code.to_string(),
            },
            |frame| match frame {
                ResponseFrame::Stream(stream) => {
                    on_stream(&ResponseFrame::Stream(stream.clone()));
                    execution.streams.push(stream);
                }
                ResponseFrame::ByteStream(bytes) => {
                    on_stream(&ResponseFrame::ByteStream(bytes.clone()));
                    execution.byte_streams.push(bytes);
                }
                ResponseFrame::Result { value } => execution.result = value,
                ResponseFrame::ExceptionInfo(info) => execution.exception = Some(info),
            },
        )
        .await?;
        Ok(execution)
    }

    /// Remove this client from the broker, stopping all of its
    /// interpreters, and close the connection.
    pub async fn disconnect(mut self) -> Result<(), ClientError> {
        self.request(&Request::Disconnect, |_| {}).await?;
        Ok(())
    }
}
