// SPDX-License-Identifier: MIT OR Apache-2.0
//! Client request variants.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::codec::ProtocolError;

/// Which environment(s) a [`Request::GetEnvironment`] asks about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentScope {
    /// The environment of the client's currently selected worker.
    Current,
    /// The environment the client registered with.
    Default,
    /// Every environment the client owns a worker for, in spawn order.
    All,
}

/// What a [`Request::ModifyInterpreter`] does with its environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpreterMode {
    /// Select (spawning if needed) the worker for the environment.
    Switch,
    /// Stop and remove the worker for the environment.
    Delete,
}

/// One client request, as carried in the third frame of an incoming
/// multipart message.
///
/// The `environment` field of [`Request::ModifyInterpreter`] is the raw,
/// client-supplied string; the registry validates it before use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Report the current, default, or full set of environments.
    GetEnvironment {
        /// Which environment(s) to report.
        kind: EnvironmentScope,
    },
    /// Switch to or delete the worker for an environment.
    ModifyInterpreter {
        /// Raw environment string (`$system` or a directory path).
        environment: String,
        /// Switch or delete.
        mode: InterpreterMode,
    },
    /// Merge variables into the current worker's process environment.
    SetEnvironmentVariables {
        /// Variables to merge.
        variables: BTreeMap<String, String>,
    },
    /// Run a command in the current worker, streaming its output.
    RunCommand {
        /// Command argv; must be nonempty.
        cmd: Vec<String>,
    },
    /// Install packages into the current worker's environment.
    InstallRequirements {
        /// Requirement specifiers; must be nonempty.
        requirements: Vec<String>,
    },
    /// Evaluate a code snippet in the current worker.
    RunCode {
        /// The source code to evaluate.
        code: String,
    },
    /// Remove the client and stop all of its workers.
    Disconnect,
}

impl Request {
    /// Shape checks the codec cannot express: argv and requirement lists
    /// must be nonempty.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            Self::RunCommand { cmd } if cmd.is_empty() => {
                Err(ProtocolError::Invalid("cmd must be nonempty".into()))
            }
            Self::InstallRequirements { requirements } if requirements.is_empty() => {
                Err(ProtocolError::Invalid("requirements must be nonempty".into()))
            }
            _ => Ok(()),
        }
    }
}
