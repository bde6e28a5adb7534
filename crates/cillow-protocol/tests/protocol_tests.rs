// SPDX-License-Identifier: MIT OR Apache-2.0
//! Codec and type-level tests for the broker wire protocol.

use std::collections::BTreeMap;

use cillow_protocol::{
    ByteStream, ByteStreamKind, ClientId, Environment, EnvironmentScope, ExceptionInfo,
    InterpreterMode, MessageType, Request, ResponseFrame, Stream, StreamKind, WireCodec,
    SYSTEM_TOKEN,
};
use serde_json::json;

// ---------------------------------------------------------------------------
// Request round-trips
// ---------------------------------------------------------------------------

#[test]
fn request_variants_round_trip() {
    let mut variables = BTreeMap::new();
    variables.insert("API_KEY".to_string(), "secret".to_string());

    let requests = vec![
        Request::GetEnvironment {
            kind: EnvironmentScope::Current,
        },
        Request::GetEnvironment {
            kind: EnvironmentScope::Default,
        },
        Request::GetEnvironment {
            kind: EnvironmentScope::All,
        },
        Request::ModifyInterpreter {
            environment: "/opt/envs/py311".to_string(),
            mode: InterpreterMode::Switch,
        },
        Request::ModifyInterpreter {
            environment: SYSTEM_TOKEN.to_string(),
            mode: InterpreterMode::Delete,
        },
        Request::SetEnvironmentVariables { variables },
        Request::RunCommand {
            cmd: vec!["echo".to_string(), "hello".to_string()],
        },
        Request::InstallRequirements {
            requirements: vec!["requests>=2".to_string()],
        },
        Request::RunCode {
            code: "print('hi')\n2 + 2".to_string(),
        },
        Request::Disconnect,
    ];

    for request in requests {
        let bytes = WireCodec::encode(&request).expect("encode");
        let back: Request = WireCodec::decode(&bytes).expect("decode");
        assert_eq!(back, request);
        // Encoding is deterministic, so a re-encode is bit-identical.
        assert_eq!(WireCodec::encode(&back).unwrap(), bytes);
    }
}

#[test]
fn empty_cmd_and_requirements_are_rejected() {
    let req = Request::RunCommand { cmd: vec![] };
    assert!(req.validate().is_err());

    let req = Request::InstallRequirements {
        requirements: vec![],
    };
    assert!(req.validate().is_err());

    let req = Request::RunCode {
        code: String::new(),
    };
    assert!(req.validate().is_ok());
}

// ---------------------------------------------------------------------------
// Response round-trips
// ---------------------------------------------------------------------------

#[test]
fn response_frames_round_trip() {
    let frames = vec![
        ResponseFrame::Stream(Stream {
            kind: StreamKind::Stdout,
            data: "hi\n".to_string(),
        }),
        ResponseFrame::Stream(Stream {
            kind: StreamKind::CmdExec,
            data: "Collecting requests".to_string(),
        }),
        ResponseFrame::ByteStream(ByteStream {
            kind: ByteStreamKind::Image,
            data: vec![0x89, b'P', b'N', b'G', 0, 255],
            id: None,
        }),
        ResponseFrame::ByteStream(ByteStream {
            kind: ByteStreamKind::Audio,
            data: vec![1, 2, 3],
            id: Some("clip-1".to_string()),
        }),
        ResponseFrame::Result { value: json!(4) },
        ResponseFrame::Result {
            value: json!({"rows": [1, 2, 3]}),
        },
        ResponseFrame::ExceptionInfo(ExceptionInfo {
            type_name: "ZeroDivisionError".to_string(),
            message: "division by zero".to_string(),
            location: Some("line 2".to_string()),
        }),
    ];

    for frame in frames {
        let bytes = WireCodec::encode(&frame).expect("encode");
        let back: ResponseFrame = WireCodec::decode(&bytes).expect("decode");
        assert_eq!(back, frame);
    }
}

#[test]
fn stream_kind_strings_are_literal() {
    assert_eq!(StreamKind::Stdout.to_string(), "stdout");
    assert_eq!(StreamKind::Stderr.to_string(), "stderr");
    assert_eq!(StreamKind::CmdExec.to_string(), "cmd_exec");
    assert_eq!(ByteStreamKind::Image.to_string(), "image");
    assert_eq!(ByteStreamKind::Audio.to_string(), "audio");
    assert_eq!(ByteStreamKind::Video.to_string(), "video");
}

#[test]
fn exception_info_display_includes_location() {
    let info = ExceptionInfo {
        type_name: "ValueError".to_string(),
        message: "bad input".to_string(),
        location: Some("File \"<code>\", line 1".to_string()),
    };
    let rendered = info.to_string();
    assert!(rendered.starts_with("ValueError: bad input"));
    assert!(rendered.contains("line 1"));
}

// ---------------------------------------------------------------------------
// Message-type tags
// ---------------------------------------------------------------------------

#[test]
fn message_type_tags_match_wire_literals() {
    assert_eq!(MessageType::RequestDone.as_bytes(), b"request_done");
    assert_eq!(
        MessageType::RequestException.as_bytes(),
        b"request_exception"
    );
    assert_eq!(MessageType::Interpreter.as_bytes(), b"interpreter");

    for tag in [
        MessageType::RequestDone,
        MessageType::RequestException,
        MessageType::Interpreter,
    ] {
        assert_eq!(MessageType::from_bytes(tag.as_bytes()), Some(tag));
    }
    assert_eq!(MessageType::from_bytes(b"bogus"), None);
    assert!(MessageType::RequestDone.is_terminator());
    assert!(MessageType::RequestException.is_terminator());
    assert!(!MessageType::Interpreter.is_terminator());
}

// ---------------------------------------------------------------------------
// Environments
// ---------------------------------------------------------------------------

#[test]
fn environment_validates_site_packages_layout() {
    let dir = tempfile::tempdir().unwrap();
    let env_path = dir.path().join("env");
    std::fs::create_dir_all(env_path.join("lib").join("site-packages")).unwrap();

    let env = Environment::validate(env_path.to_str().unwrap()).expect("valid env");
    assert!(!env.is_system());
    // Canonicalization normalizes, so validating the display form again
    // yields an equal value.
    let again = Environment::validate(&env.to_string()).unwrap();
    assert_eq!(env, again);
}

#[test]
fn environment_without_site_packages_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let err = Environment::validate(dir.path().to_str().unwrap()).unwrap_err();
    assert!(err.to_string().contains("is invalid or not found."));
}

#[test]
fn environment_list_encoding_preserves_order() {
    let envs = vec![
        Environment::System,
        Environment::Path("/opt/envs/a".into()),
        Environment::Path("/opt/envs/b".into()),
    ];
    let bytes = WireCodec::encode(&envs).unwrap();
    let back: Vec<Environment> = WireCodec::decode(&bytes).unwrap();
    assert_eq!(back, envs);
    assert_eq!(back[0].to_string(), SYSTEM_TOKEN);
}

#[test]
fn client_id_display_is_lossy() {
    let id = ClientId::from("client-42");
    assert_eq!(id.to_string(), "client-42");
    assert_eq!(id.as_bytes().as_ref(), b"client-42");
}
