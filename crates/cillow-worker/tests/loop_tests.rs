// SPDX-License-Identifier: MIT OR Apache-2.0
//! Event-loop tests over in-memory pipes with stub strategies.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use cillow_protocol::{
    Environment, ExceptionInfo, ResponseFrame, Stream, StreamKind,
};
use cillow_worker::{
    CodeEvaluator, EvalOutcome, FrameSink, ImportResolver, Interpreter, WorkerError, WorkerReply,
    WorkerRequest, read_frame, run_worker_loop, write_frame,
};
use serde_json::json;

// ---------------------------------------------------------------------------
// Stubs
// ---------------------------------------------------------------------------

/// Evaluator scripted per test: echoes its overlay, streams, then returns.
struct StubEvaluator;

#[async_trait]
impl CodeEvaluator for StubEvaluator {
    async fn evaluate(
        &mut self,
        code: &str,
        _environment: &Environment,
        env_overlay: &BTreeMap<String, String>,
        sink: FrameSink<'_>,
    ) -> Result<EvalOutcome, WorkerError> {
        match code {
            "2+2" => Ok(EvalOutcome::Result(json!(4))),
            "boom" => Ok(EvalOutcome::Exception(ExceptionInfo {
                type_name: "ZeroDivisionError".to_string(),
                message: "division by zero".to_string(),
                location: Some("line 1".to_string()),
            })),
            "overlay" => Ok(EvalOutcome::Result(json!(
                env_overlay.get("GREETING").cloned().unwrap_or_default()
            ))),
            _ => {
                sink(ResponseFrame::Stream(Stream {
                    kind: StreamKind::Stdout,
                    data: "hi\n".to_string(),
                }));
                Ok(EvalOutcome::Result(serde_json::Value::Null))
            }
        }
    }
}

/// Resolver that counts its invocations and reports nothing missing.
struct CountingResolver(Arc<AtomicUsize>);

impl ImportResolver for CountingResolver {
    fn missing_packages(&self, _code: &str, _environment: &Environment) -> Vec<String> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Vec::new()
    }
}

fn stub_interpreter(calls: Arc<AtomicUsize>) -> Interpreter {
    Interpreter::with_strategies(
        Environment::System,
        Box::new(StubEvaluator),
        Box::new(CountingResolver(calls)),
    )
}

/// Drive one request through a worker loop and collect replies up to and
/// including the sentinel.
async fn round_trip(requests: Vec<WorkerRequest>) -> Vec<Vec<WorkerReply>> {
    let calls = Arc::new(AtomicUsize::new(0));
    let (mut parent_in, child_out) = tokio::io::duplex(64 * 1024);
    let (parent_out, child_in) = tokio::io::duplex(64 * 1024);

    let worker = tokio::spawn(run_worker_loop(
        child_in,
        child_out,
        stub_interpreter(calls),
    ));

    let mut parent_out = parent_out;
    let mut all = Vec::new();
    for request in requests {
        write_frame(&mut parent_out, &request).await.unwrap();
        let mut replies = Vec::new();
        loop {
            let reply: Option<WorkerReply> = read_frame(&mut parent_in).await.unwrap();
            let reply = reply.expect("worker closed mid-request");
            let done = matches!(reply, WorkerReply::Completed);
            replies.push(reply);
            if done {
                break;
            }
        }
        all.push(replies);
    }

    drop(parent_out);
    worker.await.unwrap().unwrap();
    all
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn code_request_yields_result_then_sentinel() {
    let replies = round_trip(vec![WorkerRequest::Code {
        code: "2+2".to_string(),
    }])
    .await;

    assert_eq!(
        replies[0],
        vec![
            WorkerReply::Frame {
                frame: ResponseFrame::Result { value: json!(4) }
            },
            WorkerReply::Completed,
        ]
    );
}

#[tokio::test]
async fn failing_code_yields_exception_info_not_result() {
    let replies = round_trip(vec![WorkerRequest::Code {
        code: "boom".to_string(),
    }])
    .await;

    assert_eq!(replies[0].len(), 2);
    match &replies[0][0] {
        WorkerReply::Frame {
            frame: ResponseFrame::ExceptionInfo(info),
        } => {
            assert_eq!(info.type_name, "ZeroDivisionError");
            assert_eq!(info.message, "division by zero");
        }
        other => panic!("expected ExceptionInfo, got {other:?}"),
    }
    assert_eq!(replies[0][1], WorkerReply::Completed);
}

#[tokio::test]
async fn streamed_frames_precede_the_sentinel() {
    let replies = round_trip(vec![WorkerRequest::Code {
        code: "print".to_string(),
    }])
    .await;

    assert_eq!(replies[0].len(), 3);
    assert!(matches!(
        &replies[0][0],
        WorkerReply::Frame {
            frame: ResponseFrame::Stream(Stream {
                kind: StreamKind::Stdout,
                ..
            })
        }
    ));
    assert!(matches!(
        &replies[0][1],
        WorkerReply::Frame {
            frame: ResponseFrame::Result { .. }
        }
    ));
    assert_eq!(replies[0][2], WorkerReply::Completed);
}

#[tokio::test]
async fn environment_variables_persist_across_requests() {
    let mut variables = BTreeMap::new();
    variables.insert("GREETING".to_string(), "howdy".to_string());

    let replies = round_trip(vec![
        WorkerRequest::EnvironmentVariables { variables },
        WorkerRequest::Code {
            code: "overlay".to_string(),
        },
    ])
    .await;

    // Setting variables emits no frames, only the sentinel.
    assert_eq!(replies[0], vec![WorkerReply::Completed]);
    // The overlay is visible to the evaluator on the next request.
    assert_eq!(
        replies[1][0],
        WorkerReply::Frame {
            frame: ResponseFrame::Result {
                value: json!("howdy")
            }
        }
    );
}

#[cfg(unix)]
#[tokio::test]
async fn command_request_streams_cmd_exec_frames() {
    let replies = round_trip(vec![WorkerRequest::Cmd {
        cmd: vec!["echo".to_string(), "hello".to_string()],
    }])
    .await;

    assert_eq!(
        replies[0],
        vec![
            WorkerReply::Frame {
                frame: ResponseFrame::Stream(Stream {
                    kind: StreamKind::CmdExec,
                    data: "hello\n".to_string(),
                })
            },
            WorkerReply::Completed,
        ]
    );
}

#[tokio::test]
async fn eof_on_input_ends_the_loop_cleanly() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (_parent_in, child_out) = tokio::io::duplex(1024);
    let (parent_out, child_in) = tokio::io::duplex(1024);

    let worker = tokio::spawn(run_worker_loop(
        child_in,
        child_out,
        stub_interpreter(calls),
    ));
    drop(parent_out);

    worker.await.unwrap().unwrap();
}
