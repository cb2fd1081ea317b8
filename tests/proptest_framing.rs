//! Property tests for Content-Length framing and message decoding.

use bytes::BytesMut;
use proptest::prelude::*;
use rpc_core::rpc::codec::{encode_frame, Frame, FrameCodec};
use rpc_core::rpc::message::{decode_body, ErrorObject, Message};
use rpc_core::RequestId;
use serde_json::{json, Value};
use tokio_util::codec::Decoder;

fn arb_id() -> impl Strategy<Value = RequestId> {
    prop_oneof![
        any::<i64>().prop_map(RequestId::Number),
        "[a-zA-Z0-9-]{1,16}".prop_map(RequestId::String),
    ]
}

fn arb_params() -> impl Strategy<Value = Option<Value>> {
    prop_oneof![
        Just(None),
        ("[ -~]{0,24}", any::<i32>()).prop_map(|(s, n)| Some(json!({"text": s, "n": n}))),
        prop::collection::vec(any::<i32>(), 0..6).prop_map(|v| Some(json!(v))),
    ]
}

fn arb_method() -> impl Strategy<Value = String> {
    "(\\$/)?[a-z]{1,8}(/[a-zA-Z]{1,10})?"
}

fn arb_message() -> impl Strategy<Value = Message> {
    prop_oneof![
        (arb_id(), arb_method(), arb_params()).prop_map(|(id, m, p)| Message::request(id, m, p)),
        (arb_method(), arb_params()).prop_map(|(m, p)| Message::notification(m, p)),
        (arb_id(), "[ -~]{0,32}").prop_map(|(id, s)| Message::response(id, json!(s))),
        (proptest::option::of(arb_id()), -32800i64..-32000, "[ -~]{0,32}")
            .prop_map(|(id, code, msg)| Message::error(id, ErrorObject::new(code, msg))),
    ]
}

fn decode_chunks(chunks: &[&[u8]]) -> Vec<Frame> {
    let mut codec = FrameCodec::default();
    let mut buf = BytesMut::new();
    let mut frames = Vec::new();
    for chunk in chunks {
        buf.extend_from_slice(chunk);
        while let Some(frame) = codec.decode(&mut buf).unwrap() {
            frames.push(frame);
        }
    }
    frames
}

fn body_of(frame: &Frame) -> &[u8] {
    match frame {
        Frame::Message { body, .. } => body,
        Frame::Oversized { length } => panic!("unexpected oversized frame of {}", length),
        Frame::Unframed { skipped } => panic!("unexpected unframed bytes: {}", skipped),
    }
}

proptest! {
    #[test]
    fn split_anywhere_reassembles(msg in arb_message(), cut in any::<prop::sample::Index>()) {
        let body = msg.encode().unwrap();
        let wire = encode_frame(&body);
        let at = cut.index(wire.len() + 1);

        let frames = decode_chunks(&[&wire[..at], &wire[at..]]);
        prop_assert_eq!(frames.len(), 1);
        prop_assert_eq!(body_of(&frames[0]), &body[..]);
    }

    #[test]
    fn arbitrary_chunking_of_a_stream(
        msgs in prop::collection::vec(arb_message(), 1..6),
        sizes in prop::collection::vec(1usize..40, 1..64),
    ) {
        let bodies: Vec<Vec<u8>> = msgs.iter().map(|m| m.encode().unwrap()).collect();
        let wire: Vec<u8> = bodies.iter().flat_map(|b| encode_frame(b).to_vec()).collect();

        let mut chunks = Vec::new();
        let mut rest = &wire[..];
        let mut i = 0;
        while !rest.is_empty() {
            let n = sizes[i % sizes.len()].min(rest.len());
            let (head, tail) = rest.split_at(n);
            chunks.push(head);
            rest = tail;
            i += 1;
        }

        let frames = decode_chunks(&chunks);
        prop_assert_eq!(frames.len(), bodies.len());
        for (frame, body) in frames.iter().zip(&bodies) {
            prop_assert_eq!(body_of(frame), &body[..]);
        }
    }

    #[test]
    fn decode_inverts_encode(msg in arb_message()) {
        let body = msg.encode().unwrap();
        let text = std::str::from_utf8(&body).unwrap();
        let mut decoded = decode_body(text).unwrap();
        prop_assert_eq!(decoded.len(), 1);
        let decoded = decoded.remove(0).unwrap();
        prop_assert_eq!(decoded, msg);
    }

    #[test]
    fn non_json_never_panics(text in "\\PC{0,64}") {
        let _ = decode_body(&text);
    }
}
