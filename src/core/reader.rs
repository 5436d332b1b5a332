//! # Message Framing
//!
//! [`MessageReader`] cuts raw frames out of a byte stream (as a tokio-util
//! [`Decoder`]) or validates a single datagram, using the codec's framing rules.
//! [`MessageWriter`] is the matching [`Encoder`] for the write side.
//!
//! The reader never decodes messages; it only yields complete frames so the
//! read loop can decide how to treat framing failures separately from decode
//! failures.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::core::codec::{Message, SharedCodec};
use crate::core::session::Session;
use crate::error::{constants, RpcError, Result};

/// Frames discrete messages for one codec.
pub struct MessageReader<M> {
    codec: SharedCodec<M>,
    max_frame_size: usize,
}

impl<M: Message> MessageReader<M> {
    pub fn new(codec: SharedCodec<M>) -> Self {
        let max_frame_size = codec.max_frame_size();
        Self {
            codec,
            max_frame_size,
        }
    }

    /// Lower the frame size limit below the codec's own.
    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max.min(self.codec.max_frame_size());
        self
    }

    pub fn codec(&self) -> &SharedCodec<M> {
        &self.codec
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Validate that `datagram` holds exactly one complete frame.
    pub fn read_datagram(&self, datagram: &[u8]) -> Result<Bytes> {
        if datagram.len() > self.max_frame_size {
            return Err(RpcError::OversizedFrame(datagram.len()));
        }
        match self.codec.frame_len(datagram)? {
            Some(len) if len == datagram.len() => Ok(Bytes::copy_from_slice(datagram)),
            _ => Err(RpcError::InvalidFrame(
                constants::ERR_DATAGRAM_TRUNCATED.to_string(),
            )),
        }
    }
}

impl<M: Message> Decoder for MessageReader<M> {
    type Item = Bytes;
    type Error = RpcError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        let len = match self.codec.frame_len(src)? {
            Some(len) => len,
            None => return Ok(None),
        };

        if len > self.max_frame_size {
            return Err(RpcError::OversizedFrame(len));
        }

        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }

        Ok(Some(src.split_to(len).freeze()))
    }
}

/// Encodes sessions into replies for one codec and counts the bytes produced.
///
/// A reply that cannot be encoded, or that exceeds the size limit, is replaced
/// by an error reply to the same request so the peer is still answered.
pub struct MessageWriter<M> {
    codec: SharedCodec<M>,
    max_frame_size: usize,
    bytes_encoded: u64,
    replaced: u64,
}

impl<M: Message> MessageWriter<M> {
    pub fn new(codec: SharedCodec<M>) -> Self {
        let max_frame_size = codec.max_frame_size();
        Self {
            codec,
            max_frame_size,
            bytes_encoded: 0,
            replaced: 0,
        }
    }

    /// Lower the reply size limit below the codec's own.
    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max.min(self.codec.max_frame_size());
        self
    }

    /// Total bytes encoded since creation.
    pub fn bytes_encoded(&self) -> u64 {
        self.bytes_encoded
    }

    /// Replies swapped for an error reply because they could not be encoded.
    pub fn replaced(&self) -> u64 {
        self.replaced
    }

    fn encode_message(&mut self, msg: &M, dst: &mut BytesMut) -> Result<()> {
        let before = dst.len();
        self.codec.encode(msg, dst)?;
        let len = dst.len() - before;
        if len > self.max_frame_size {
            dst.truncate(before);
            return Err(RpcError::OversizedFrame(len));
        }
        self.bytes_encoded += len as u64;
        Ok(())
    }
}

impl<M: Message> Encoder<Session<M>> for MessageWriter<M> {
    type Error = RpcError;

    fn encode(&mut self, session: Session<M>, dst: &mut BytesMut) -> Result<()> {
        let peer = session.peer();
        let (request, reply) = session.into_parts();
        match self.encode_message(&reply, dst) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.replaced += 1;
                warn!(peer = %peer, error = %e, "Reply cannot be encoded, answering with an error");
                self.encode_message(&request.error_reply(&e), dst)
            }
        }
    }
}
