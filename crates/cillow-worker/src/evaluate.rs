// SPDX-License-Identifier: MIT OR Apache-2.0
//! Code evaluation strategies.
//!
//! The worker never interprets source itself; it hands the snippet to a
//! [`CodeEvaluator`]. The bundled [`SubprocessEvaluator`] runs snippets
//! through the environment's interpreter binary, capturing the trailing
//! expression's value and carrying the evaluation namespace across calls;
//! richer evaluators (a resident interpreter process) plug in through the
//! same trait.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use cillow_protocol::{Environment, ExceptionInfo, ResponseFrame, Stream, StreamKind};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::handle::FrameSink;
use crate::shell::which;
use crate::WorkerError;

/// Outcome of one evaluation: exactly one of a result value or exception
/// details, never both.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalOutcome {
    /// The snippet completed; carries the final expression value, if any.
    Result(Value),
    /// The snippet raised.
    Exception(ExceptionInfo),
}

/// Evaluates snippets inside a worker's environment.
#[async_trait]
pub trait CodeEvaluator: Send + Sync {
    /// Evaluate `code`, streaming intermediate output through `sink` and
    /// returning the single terminal outcome.
    async fn evaluate(
        &mut self,
        code: &str,
        environment: &Environment,
        env_overlay: &BTreeMap<String, String>,
        sink: FrameSink<'_>,
    ) -> Result<EvalOutcome, WorkerError>;
}

/// Driver program each invocation feeds to the interpreter: splits the
/// snippet REPL-style, runs it against the persisted namespace, and writes
/// the trailing expression's value out of band.
const DRIVER: &str = include_str!("snippet_driver.py");

/// Runs each snippet through the environment's interpreter binary while
/// keeping the worker's evaluation namespace alive between calls.
///
/// Statements execute first and a trailing expression is evaluated for the
/// `Result` value, so `2+2` yields `Result{4}`. The namespace lives as a
/// serialized snapshot in the evaluator's scratch directory and is threaded
/// through every invocation: a binding made by one `Code` request is
/// visible to the next. Stdout is streamed live as `Stream{stdout}` frames;
/// stderr is replayed as `Stream{stderr}` frames on a clean exit or parsed
/// into an [`ExceptionInfo`] from the traceback tail on a nonzero one.
#[derive(Debug, Default)]
pub struct SubprocessEvaluator {
    interpreter: Option<PathBuf>,
    scratch: Option<tempfile::TempDir>,
}

impl SubprocessEvaluator {
    /// Create an evaluator; the interpreter binary and scratch directory
    /// are set up lazily.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn scratch_dir(&mut self) -> Result<PathBuf, WorkerError> {
        if let Some(dir) = &self.scratch {
            return Ok(dir.path().to_path_buf());
        }
        let dir = tempfile::tempdir().map_err(WorkerError::Pipe)?;
        let path = dir.path().to_path_buf();
        self.scratch = Some(dir);
        Ok(path)
    }

    fn interpreter_for(&mut self, environment: &Environment) -> Result<PathBuf, WorkerError> {
        if let Some(found) = &self.interpreter {
            return Ok(found.clone());
        }
        let found = match environment.path() {
            Some(root) => {
                let bin = if cfg!(windows) { "Scripts" } else { "bin" };
                ["python3", "python"]
                    .iter()
                    .map(|name| {
                        root.join(bin)
                            .join(format!("{name}{}", std::env::consts::EXE_SUFFIX))
                    })
                    .find(|p| p.is_file())
            }
            None => which("python3").or_else(|| which("python")),
        }
        .ok_or_else(|| {
            WorkerError::Protocol(format!("no interpreter found for environment {environment}"))
        })?;
        self.interpreter = Some(found.clone());
        Ok(found)
    }
}

#[async_trait]
impl CodeEvaluator for SubprocessEvaluator {
    async fn evaluate(
        &mut self,
        code: &str,
        environment: &Environment,
        env_overlay: &BTreeMap<String, String>,
        sink: FrameSink<'_>,
    ) -> Result<EvalOutcome, WorkerError> {
        let interpreter = self.interpreter_for(environment)?;
        let scratch = self.scratch_dir()?;
        let snippet_path = scratch.join("snippet.py");
        let namespace_path = scratch.join("namespace.pkl");
        let result_path = scratch.join("result.json");
        std::fs::write(&snippet_path, code).map_err(WorkerError::Pipe)?;
        let _ = std::fs::remove_file(&result_path);

        let mut child = Command::new(&interpreter)
            .arg("-")
            .arg(&snippet_path)
            .arg(&namespace_path)
            .arg(&result_path)
            .envs(env_overlay)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(WorkerError::Spawn)?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| WorkerError::Protocol("stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WorkerError::Protocol("stdout unavailable".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| WorkerError::Protocol("stderr unavailable".into()))?;

        stdin
            .write_all(DRIVER.as_bytes())
            .await
            .map_err(WorkerError::Pipe)?;
        drop(stdin);

        // Collect stderr off-thread so neither pipe can fill up.
        let (err_tx, mut err_rx) = mpsc::unbounded_channel::<String>();
        let err_reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if err_tx.send(line).is_err() {
                    break;
                }
            }
        });

        let mut out_lines = BufReader::new(stdout).lines();
        while let Some(line) = out_lines.next_line().await.map_err(WorkerError::Pipe)? {
            sink(ResponseFrame::Stream(Stream {
                kind: StreamKind::Stdout,
                data: format!("{line}\n"),
            }));
        }

        let status = child.wait().await.map_err(WorkerError::Pipe)?;
        let _ = err_reader.await;

        let mut err_lines = Vec::new();
        while let Ok(line) = err_rx.try_recv() {
            err_lines.push(line);
        }

        if status.success() {
            for line in err_lines {
                sink(ResponseFrame::Stream(Stream {
                    kind: StreamKind::Stderr,
                    data: format!("{line}\n"),
                }));
            }
            let value = std::fs::read_to_string(&result_path)
                .ok()
                .and_then(|contents| serde_json::from_str(&contents).ok())
                .unwrap_or(Value::Null);
            return Ok(EvalOutcome::Result(value));
        }

        Ok(EvalOutcome::Exception(parse_traceback(&err_lines)))
    }
}

/// Derive exception details from an interpreter's stderr tail.
///
/// The last `Type: message` line names the exception; the last `File ...`
/// line locates it.
fn parse_traceback(lines: &[String]) -> ExceptionInfo {
    let mut type_name = "Exception".to_string();
    let mut message = String::new();
    let mut location = None;

    for line in lines {
        let trimmed = line.trim_start();
        if trimmed.starts_with("File ") {
            location = Some(trimmed.trim_end().to_string());
            continue;
        }
        if let Some((head, tail)) = line.split_once(": ")
            && is_exception_name(head)
        {
            type_name = head.to_string();
            message = tail.trim_end().to_string();
        } else if !line.trim().is_empty() && line == line.trim_start() && !line.contains(' ') {
            // A bare `SystemExit`-style terminal line without a message.
            if is_exception_name(line.trim_end()) {
                type_name = line.trim_end().to_string();
                message = String::new();
            }
        }
    }

    if message.is_empty() && type_name == "Exception" {
        message = lines
            .iter()
            .rev()
            .find(|l| !l.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| "evaluation failed".to_string());
    }

    ExceptionInfo {
        type_name,
        message,
        location,
    }
}

fn is_exception_name(candidate: &str) -> bool {
    !candidate.is_empty()
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        && candidate.chars().next().is_some_and(char::is_alphabetic)
}
