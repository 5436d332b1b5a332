//! Property-based tests for codecs and stream framing

use bytes::BytesMut;
use polyrpc::core::codec::Codec;
use polyrpc::core::reader::MessageReader;
use polyrpc::protocol::binary::{BinaryCodec, BinaryFrame, HEADER_SIZE};
use polyrpc::protocol::json::{JsonCodec, JsonFrame};
use proptest::prelude::*;
use std::sync::Arc;
use tokio_util::codec::Decoder;

fn json_frame() -> impl Strategy<Value = JsonFrame> {
    (
        any::<u64>(),
        "[A-Za-z][A-Za-z0-9_.]{0,32}",
        ".{0,512}",
        proptest::option::of("[0-9a-f]{16}"),
    )
        .prop_map(|(seq, rpc, body, trace)| {
            let frame = JsonFrame::request(seq, rpc, body);
            match trace {
                Some(t) => frame.with_trace_id(t),
                None => frame,
            }
        })
}

proptest! {
    #[test]
    fn prop_json_frame_survives_codec(frame in json_frame()) {
        let mut buf = BytesMut::new();
        JsonCodec.encode(&frame, &mut buf).unwrap();

        prop_assert_eq!(JsonCodec.frame_len(&buf).unwrap(), Some(buf.len()));
        let decoded = JsonCodec.decode(&buf).unwrap();
        prop_assert_eq!(decoded, frame);
    }

    #[test]
    fn prop_binary_frame_survives_codec(
        seq in any::<u32>(),
        cmd in any::<u32>(),
        trace in any::<u64>(),
        body in prop::collection::vec(any::<u8>(), 0..10000),
    ) {
        let frame = BinaryFrame::request(seq, cmd, body).with_trace_id(trace);
        let mut buf = BytesMut::new();
        BinaryCodec.encode(&frame, &mut buf).unwrap();

        prop_assert!(buf.len() >= HEADER_SIZE);
        prop_assert_eq!(BinaryCodec.decode(&buf).unwrap(), frame);
    }

    #[test]
    fn prop_reader_reassembles_arbitrary_chunking(
        frames in prop::collection::vec(json_frame(), 1..8),
        chunk in 1usize..64,
    ) {
        let mut wire = BytesMut::new();
        for f in &frames {
            JsonCodec.encode(f, &mut wire).unwrap();
        }

        let mut reader = MessageReader::<JsonFrame>::new(Arc::new(JsonCodec));
        let mut src = BytesMut::new();
        let mut decoded = Vec::new();
        for piece in wire.chunks(chunk) {
            src.extend_from_slice(piece);
            while let Some(raw) = reader.decode(&mut src).unwrap() {
                decoded.push(JsonCodec.decode(&raw).unwrap());
            }
        }

        prop_assert!(src.is_empty());
        prop_assert_eq!(decoded, frames);
    }

    #[test]
    fn prop_binary_garbage_never_panics(data in prop::collection::vec(any::<u8>(), 0..256)) {
        // Any outcome is fine as long as it is a value, not a panic.
        let _ = BinaryCodec.frame_len(&data);
        let _ = BinaryCodec.decode(&data);
    }

    #[test]
    fn prop_datagram_must_be_exact(frame in json_frame(), extra in 1usize..16) {
        let reader = MessageReader::<JsonFrame>::new(Arc::new(JsonCodec));
        let mut buf = BytesMut::new();
        JsonCodec.encode(&frame, &mut buf).unwrap();

        prop_assert!(reader.read_datagram(&buf).is_ok());
        prop_assert!(reader.read_datagram(&buf[..buf.len() - 1]).is_err());

        buf.extend_from_slice(&vec![0u8; extra]);
        prop_assert!(reader.read_datagram(&buf).is_err());
    }
}
