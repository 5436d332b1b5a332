// test-only module included via protocol/mod.rs
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use bytes::{Bytes, BytesMut};

use crate::core::codec::{Codec, Message};
use crate::core::session::{Peer, SessionBuilder};
use crate::error::RpcError;
use crate::protocol::binary::*;
use crate::protocol::json::*;

fn peer() -> Peer {
    Peer::udp("127.0.0.1:7000".parse().unwrap())
}

#[test]
fn test_json_request_reply_flow() {
    let req = JsonFrame::request(42, "Echo", "ping").with_trace_id("t-1");
    let mut buf = BytesMut::new();
    JsonCodec.encode(&req, &mut buf).unwrap();

    // Length prefix covers exactly the JSON payload
    let prefix = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    assert_eq!(prefix + 4, buf.len());

    let decoded = JsonCodec.decode(&buf).unwrap();
    assert_eq!(decoded, req);

    let session = JsonSessionBuilder.build(decoded, peer()).unwrap();
    assert_eq!(session.rpc_name(), "Echo");
    assert_eq!(session.trace_context().trace_id(), Some("t-1"));

    let reply = session.request().reply(Bytes::from_static(b"pong")).unwrap();
    assert_eq!(reply.seq, 42);
    assert_eq!(reply.code, 0);
    assert_eq!(reply.body, "pong");
    assert_eq!(reply.trace_id.as_deref(), Some("t-1"));
}

#[test]
fn test_json_missing_fields_default() {
    let payload = br#"{"rpc":"Echo"}"#;
    let mut frame = (payload.len() as u32).to_be_bytes().to_vec();
    frame.extend_from_slice(payload);

    let decoded = JsonCodec.decode(&frame).unwrap();
    assert_eq!(decoded.seq, 0);
    assert_eq!(decoded.rpc, "Echo");
    assert!(decoded.trace_id.is_none());
}

#[test]
fn test_json_garbage_payload_is_decode_error() {
    let payload = b"not json";
    let mut frame = (payload.len() as u32).to_be_bytes().to_vec();
    frame.extend_from_slice(payload);

    assert!(matches!(JsonCodec.decode(&frame), Err(RpcError::Json(_))));
}

#[test]
fn test_json_error_reply_carries_status() {
    let req = JsonFrame::request(5, "Nope", "");
    let reply = req.error_reply(&RpcError::MethodNotFound("Nope".into()));
    assert!(reply.is_error());
    assert_eq!(reply.code, 2);
    assert!(reply.message.unwrap().contains("Nope"));
}

#[test]
fn test_binary_packet_layout() {
    let req = BinaryFrame::request(1, 10, b"hello".to_vec());
    let mut buf = BytesMut::new();
    BinaryCodec.encode(&req, &mut buf).unwrap();

    assert_eq!(&buf[..4], &MAGIC_BYTES);
    assert_eq!(buf[4], PROTOCOL_VERSION);
    assert_eq!(BinaryCodec.frame_len(&buf).unwrap(), Some(buf.len()));
    assert_eq!(BinaryCodec.decode(&buf).unwrap(), req);
}

#[test]
fn test_binary_rejects_bad_magic_early() {
    assert!(matches!(
        BinaryCodec.frame_len(b"XP"),
        Err(RpcError::InvalidFrame(_))
    ));
    // A correct prefix of the magic still waits for more bytes
    assert_eq!(BinaryCodec.frame_len(b"PR").unwrap(), None);
}

#[test]
fn test_binary_rejects_unknown_version() {
    let mut buf = BytesMut::new();
    BinaryCodec
        .encode(&BinaryFrame::request(1, 1, vec![]), &mut buf)
        .unwrap();
    buf[4] = 9;
    assert!(matches!(
        BinaryCodec.frame_len(&buf),
        Err(RpcError::UnsupportedVersion(9))
    ));
}

#[test]
fn test_binary_command_table() {
    let builder = BinarySessionBuilder::new()
        .with_command(1, "Echo")
        .with_command(2, "Sum");

    let ok = builder
        .build(BinaryFrame::request(7, 2, vec![]).with_trace_id(0xabc), peer())
        .unwrap();
    assert_eq!(ok.rpc_name(), "Sum");
    assert_eq!(ok.trace_context().trace_id(), Some("0000000000000abc"));

    let unknown = builder.build_or_reject(BinaryFrame::request(8, 99, vec![]), peer());
    assert!(matches!(unknown.error(), Some(RpcError::Unroutable(_))));
    let reply = unknown.into_reply();
    assert_eq!(reply.seq, 8);
    assert_eq!(reply.status, RpcError::Unroutable(String::new()).code());
}
