// SPDX-License-Identifier: MIT OR Apache-2.0
//! Property tests for codec round-trips over arbitrary payloads.

use cillow_protocol::{Request, ResponseFrame, Stream, StreamKind, WireCodec};
use proptest::prelude::*;

fn stream_kind() -> impl Strategy<Value = StreamKind> {
    prop_oneof![
        Just(StreamKind::Stdout),
        Just(StreamKind::Stderr),
        Just(StreamKind::CmdExec),
    ]
}

proptest! {
    #[test]
    fn run_code_round_trips(code in ".*") {
        let request = Request::RunCode { code };
        let bytes = WireCodec::encode(&request).unwrap();
        let back: Request = WireCodec::decode(&bytes).unwrap();
        prop_assert_eq!(back, request);
    }

    #[test]
    fn stream_frames_round_trip(kind in stream_kind(), data in ".*") {
        let frame = ResponseFrame::Stream(Stream { kind, data });
        let bytes = WireCodec::encode(&frame).unwrap();
        let back: ResponseFrame = WireCodec::decode(&bytes).unwrap();
        prop_assert_eq!(back, frame);
    }

    #[test]
    fn byte_payloads_round_trip(data in proptest::collection::vec(any::<u8>(), 0..512)) {
        let frame = ResponseFrame::ByteStream(cillow_protocol::ByteStream {
            kind: cillow_protocol::ByteStreamKind::Image,
            data,
            id: None,
        });
        let bytes = WireCodec::encode(&frame).unwrap();
        let back: ResponseFrame = WireCodec::decode(&bytes).unwrap();
        prop_assert_eq!(back, frame);
    }
}
