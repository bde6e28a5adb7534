// SPDX-License-Identifier: MIT OR Apache-2.0
//! Command execution with line-by-line output streaming.
//!
//! Commands run without any shell; on Windows hosts without a `SHELL`
//! variable the argv is wrapped in a PowerShell invocation, matching how
//! interactive users would run it there.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::WorkerError;

/// Run `argv` with `env` merged over the inherited environment, invoking
/// `on_line` for every output line, newline-terminated.
///
/// All of stderr is delivered before stdout; stdout is buffered off the
/// child concurrently so neither pipe can fill and wedge the child.
pub async fn stream_command(
    argv: &[String],
    env: &BTreeMap<String, String>,
    mut on_line: impl FnMut(String),
) -> Result<(), WorkerError> {
    let argv = effective_argv(argv);
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| WorkerError::Protocol("empty command".into()))?;

    let mut child = Command::new(program)
        .args(args)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(WorkerError::Spawn)?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| WorkerError::Protocol("stdout unavailable".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| WorkerError::Protocol("stderr unavailable".into()))?;

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    let mut err_lines = BufReader::new(stderr).lines();
    while let Some(line) = err_lines.next_line().await.map_err(WorkerError::Pipe)? {
        on_line(format!("{line}\n"));
    }

    while let Some(line) = rx.recv().await {
        on_line(format!("{line}\n"));
    }

    let _ = reader.await;
    let _ = child.wait().await.map_err(WorkerError::Pipe)?;
    Ok(())
}

/// Wrap the argv for the host shell conventions.
fn effective_argv(argv: &[String]) -> Vec<String> {
    if cfg!(windows) && std::env::var_os("SHELL").is_none() {
        let mut wrapped = vec![
            "powershell".to_string(),
            "-NoProfile".to_string(),
            "-NonInteractive".to_string(),
            "-Command".to_string(),
        ];
        wrapped.extend(argv.iter().cloned());
        return wrapped;
    }
    argv.to_vec()
}

/// Search PATH for an executable.
pub(crate) fn which(bin: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path) {
        let candidate = dir.join(bin);
        if candidate.is_file() {
            return Some(candidate);
        }
        let with_suffix = dir.join(format!("{bin}{}", std::env::consts::EXE_SUFFIX));
        if !std::env::consts::EXE_SUFFIX.is_empty() && with_suffix.is_file() {
            return Some(with_suffix);
        }
    }
    None
}
