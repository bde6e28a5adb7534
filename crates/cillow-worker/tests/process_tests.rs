// SPDX-License-Identifier: MIT OR Apache-2.0
//! Lifecycle tests against the real `cillow-worker` binary.

use std::path::PathBuf;

use cillow_protocol::{Environment, ResponseFrame, StreamKind};
use cillow_worker::{WorkerError, WorkerHandle, WorkerProcess, WorkerRequest};

fn worker_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_cillow-worker"))
}

fn python_available() -> bool {
    ["python3", "python"].iter().any(|cmd| {
        std::process::Command::new(cmd)
            .arg("--version")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .is_ok()
    })
}

macro_rules! require_python {
    () => {
        if !python_available() {
            eprintln!("SKIP: python not found");
            return;
        }
    };
}

async fn spawn_system_worker() -> WorkerProcess {
    WorkerProcess::spawn_with_binary(worker_bin(), Environment::System)
        .await
        .expect("worker should spawn")
}

async fn collect(
    worker: &WorkerProcess,
    request: WorkerRequest,
) -> Result<Vec<ResponseFrame>, WorkerError> {
    let mut frames = Vec::new();
    let mut sink = |frame: ResponseFrame| frames.push(frame);
    worker.execute(request, &mut sink).await?;
    Ok(frames)
}

// ---------------------------------------------------------------------------
// 1. Command streaming
// ---------------------------------------------------------------------------

#[cfg(unix)]
#[tokio::test]
async fn command_output_streams_as_cmd_exec() {
    let worker = spawn_system_worker().await;

    let frames = collect(
        &worker,
        WorkerRequest::Cmd {
            cmd: vec!["echo".to_string(), "from the worker".to_string()],
        },
    )
    .await
    .expect("command should run");

    assert_eq!(frames.len(), 1);
    match &frames[0] {
        ResponseFrame::Stream(stream) => {
            assert_eq!(stream.kind, StreamKind::CmdExec);
            assert_eq!(stream.data, "from the worker\n");
        }
        other => panic!("expected cmd_exec stream, got {other:?}"),
    }

    worker.stop().await;
}

// ---------------------------------------------------------------------------
// 2. Sequential requests reuse one process
// ---------------------------------------------------------------------------

#[cfg(unix)]
#[tokio::test]
async fn sequential_requests_share_the_worker() {
    let worker = spawn_system_worker().await;

    for i in 0..3 {
        let frames = collect(
            &worker,
            WorkerRequest::Cmd {
                cmd: vec!["echo".to_string(), format!("run-{i}")],
            },
        )
        .await
        .unwrap_or_else(|e| panic!("request {i} failed: {e}"));
        match &frames[0] {
            ResponseFrame::Stream(stream) => assert_eq!(stream.data, format!("run-{i}\n")),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    worker.stop().await;
}

// ---------------------------------------------------------------------------
// 3. Stop protocol
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stopped_worker_rejects_further_requests() {
    let worker = spawn_system_worker().await;
    worker.stop().await;

    let err = collect(
        &worker,
        WorkerRequest::Cmd {
            cmd: vec!["echo".to_string(), "late".to_string()],
        },
    )
    .await
    .expect_err("stopped worker should refuse work");
    assert!(matches!(err, WorkerError::Stopped));

    // Stopping again is a no-op.
    worker.stop().await;
}

// ---------------------------------------------------------------------------
// 4. Code evaluation through the bundled evaluator
// ---------------------------------------------------------------------------

#[tokio::test]
async fn python_stdout_streams_then_result() {
    require_python!();
    let worker = spawn_system_worker().await;

    let frames = collect(
        &worker,
        WorkerRequest::Code {
            code: "print('hi')".to_string(),
        },
    )
    .await
    .expect("code should run");

    assert!(frames.len() >= 2, "expected stream + result, got {frames:?}");
    match &frames[0] {
        ResponseFrame::Stream(stream) => {
            assert_eq!(stream.kind, StreamKind::Stdout);
            assert_eq!(stream.data, "hi\n");
        }
        other => panic!("expected stdout stream, got {other:?}"),
    }
    // `print` returns no value, so the terminal frame carries null.
    assert_eq!(
        frames.last().unwrap(),
        &ResponseFrame::Result {
            value: serde_json::Value::Null
        }
    );

    worker.stop().await;
}

#[tokio::test]
async fn trailing_expression_value_is_captured() {
    require_python!();
    let worker = spawn_system_worker().await;

    let frames = collect(
        &worker,
        WorkerRequest::Code {
            code: "2+2".to_string(),
        },
    )
    .await
    .expect("code should run");

    assert_eq!(
        frames.last().expect("at least one frame"),
        &ResponseFrame::Result {
            value: serde_json::json!(4)
        }
    );

    worker.stop().await;
}

#[tokio::test]
async fn namespace_persists_across_code_requests() {
    require_python!();
    let worker = spawn_system_worker().await;

    let frames = collect(
        &worker,
        WorkerRequest::Code {
            code: "x = 21".to_string(),
        },
    )
    .await
    .expect("assignment should run");
    assert_eq!(
        frames.last().expect("at least one frame"),
        &ResponseFrame::Result {
            value: serde_json::Value::Null
        }
    );

    // The binding made by the previous request is still live.
    let frames = collect(
        &worker,
        WorkerRequest::Code {
            code: "x * 2".to_string(),
        },
    )
    .await
    .expect("follow-up should run");
    assert_eq!(
        frames.last().expect("at least one frame"),
        &ResponseFrame::Result {
            value: serde_json::json!(42)
        }
    );

    worker.stop().await;
}

#[tokio::test]
async fn python_exception_becomes_exception_info() {
    require_python!();
    let worker = spawn_system_worker().await;

    let frames = collect(
        &worker,
        WorkerRequest::Code {
            code: "print('hi')\n1/0".to_string(),
        },
    )
    .await
    .expect("request should complete even though the code raised");

    let last = frames.last().expect("at least one frame");
    match last {
        ResponseFrame::ExceptionInfo(info) => {
            assert_eq!(info.type_name, "ZeroDivisionError");
            assert!(info.message.contains("division by zero"));
            assert!(info.location.is_some());
        }
        other => panic!("expected ExceptionInfo terminal frame, got {other:?}"),
    }
    // Exactly one terminal frame: no Result anywhere in the stream.
    assert!(
        !frames
            .iter()
            .any(|f| matches!(f, ResponseFrame::Result { .. }))
    );

    worker.stop().await;
}

// ---------------------------------------------------------------------------
// 5. Spawn failure surfaces as an error
// ---------------------------------------------------------------------------

#[tokio::test]
async fn bad_binary_fails_to_spawn() {
    let err = WorkerProcess::spawn_with_binary(
        PathBuf::from("cillow-no-such-worker-binary"),
        Environment::System,
    )
    .await
    .expect_err("bogus binary must not spawn");
    assert!(matches!(err, WorkerError::Spawn(_)));
}
