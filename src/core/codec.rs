//! # Codec Contract
//!
//! A [`Codec`] turns one protocol's wire representation into its in-memory
//! message type and back. Codecs are registered per protocol name in the
//! [`Registry`](crate::core::registry::Registry) and shared by every connection
//! of every module serving that protocol, so they must be pure: the same bytes
//! always decode to the same message and no state is kept between calls.
//!
//! Each protocol owns a closed message type implementing [`Message`]. The engine
//! never looks inside it; it only asks the message for its body and for reply
//! heads, so protocol types never leak across protocol boundaries.

use bytes::{BufMut, Bytes, BytesMut};
use std::sync::Arc;

use crate::config::DEFAULT_MAX_FRAME_SIZE;
use crate::error::{RpcError, Result};

/// Capabilities the engine needs from a protocol's message type.
pub trait Message: Send + Sync + Sized + 'static {
    /// Business payload carried by the message.
    fn body(&self) -> Bytes;

    /// Success reply answering `self`, carrying `body`.
    ///
    /// Fails when the protocol cannot carry `body` unchanged.
    fn reply(&self, body: Bytes) -> Result<Self>;

    /// Error reply answering `self`.
    fn error_reply(&self, err: &RpcError) -> Self;
}

/// Encodes and decodes one protocol's messages and knows its framing rules.
pub trait Codec: Send + Sync + 'static {
    /// The protocol's closed message type.
    type Message: Message;

    /// Protocol identifier, e.g. `"json"`.
    fn name(&self) -> &str;

    /// Largest frame this codec accepts.
    fn max_frame_size(&self) -> usize {
        DEFAULT_MAX_FRAME_SIZE
    }

    /// Total length of the frame starting at `buf[0]`.
    ///
    /// Returns `Ok(None)` while the header is incomplete. The returned length may
    /// exceed `buf.len()`; the reader keeps buffering until it is available.
    fn frame_len(&self, buf: &[u8]) -> Result<Option<usize>>;

    /// Decode one complete frame.
    fn decode(&self, frame: &[u8]) -> Result<Self::Message>;

    /// Encode one message, including its framing, into `dst`.
    ///
    /// Implementations must leave `dst` untouched when they fail.
    fn encode(&self, msg: &Self::Message, dst: &mut BytesMut) -> Result<()>;
}

/// Codec shared across tasks, erased to its message type.
pub type SharedCodec<M> = Arc<dyn Codec<Message = M>>;

/// Length of a frame whose header stores a big-endian `u32` payload length.
///
/// `prefix_offset` is where the length field starts and `header_len` the full
/// header size, so the frame length is `header_len + payload_len`.
#[inline]
pub fn length_prefixed_frame_len(
    buf: &[u8],
    prefix_offset: usize,
    header_len: usize,
) -> Option<usize> {
    if buf.len() < header_len {
        return None;
    }
    let mut len = [0u8; 4];
    len.copy_from_slice(&buf[prefix_offset..prefix_offset + 4]);
    Some(header_len + u32::from_be_bytes(len) as usize)
}

/// Append `header` then a big-endian length and `payload`, checking `max`.
pub(crate) fn put_length_prefixed(
    dst: &mut BytesMut,
    header: &[u8],
    payload: &[u8],
    max: usize,
) -> Result<()> {
    let total = header.len() + 4 + payload.len();
    if total > max || payload.len() > u32::MAX as usize {
        return Err(RpcError::OversizedFrame(total));
    }
    dst.reserve(total);
    dst.put_slice(header);
    dst.put_u32(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}
