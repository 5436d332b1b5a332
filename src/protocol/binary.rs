//! # Binary Protocol
//!
//! Compact packets for integer-coded commands.
//!
//! ## Wire Format
//! ```text
//! [Magic(4) "PRPC"] [Version(1)] [Length(4, big-endian)] [Payload(Length)]
//! ```
//! The payload is a bincode-encoded [`BinaryFrame`]. Requests identify their
//! target with a numeric `cmd`; [`BinarySessionBuilder`] maps it to an rpc name.
//!
//! ## Security
//! - Magic bytes and version are checked before the length is trusted
//! - Frame length is bounded by the codec's maximum before buffering

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::core::codec::{length_prefixed_frame_len, put_length_prefixed, Codec, Message};
use crate::core::session::{SessionBuilder, TraceContext};
use crate::error::{constants, RpcError, Result};

/// Protocol name the binary codec registers under.
pub const BINARY_PROTOCOL: &str = "bin";

/// Magic bytes identifying a packet ("PRPC").
pub const MAGIC_BYTES: [u8; 4] = *b"PRPC";

/// Current packet version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Magic + version + length.
pub const HEADER_SIZE: usize = 9;

/// One binary request or reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BinaryFrame {
    pub seq: u32,
    pub cmd: u32,
    /// `0` on success, otherwise [`RpcError::code`].
    pub status: u16,
    /// `0` means no trace.
    pub trace_id: u64,
    pub body: Vec<u8>,
}

impl BinaryFrame {
    pub fn request(seq: u32, cmd: u32, body: Vec<u8>) -> Self {
        Self {
            seq,
            cmd,
            body,
            ..Self::default()
        }
    }

    pub fn with_trace_id(mut self, trace_id: u64) -> Self {
        self.trace_id = trace_id;
        self
    }
}

impl Message for BinaryFrame {
    fn body(&self) -> Bytes {
        Bytes::copy_from_slice(&self.body)
    }

    fn reply(&self, body: Bytes) -> Result<Self> {
        Ok(Self {
            seq: self.seq,
            cmd: self.cmd,
            status: 0,
            trace_id: self.trace_id,
            body: body.to_vec(),
        })
    }

    // Error text travels in the body.
    fn error_reply(&self, err: &RpcError) -> Self {
        Self {
            seq: self.seq,
            cmd: self.cmd,
            status: err.code(),
            trace_id: self.trace_id,
            body: err.to_string().into_bytes(),
        }
    }
}

/// Codec for [`BinaryFrame`] packets.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl Codec for BinaryCodec {
    type Message = BinaryFrame;

    fn name(&self) -> &str {
        BINARY_PROTOCOL
    }

    fn frame_len(&self, buf: &[u8]) -> Result<Option<usize>> {
        let check = buf.len().min(MAGIC_BYTES.len());
        if buf[..check] != MAGIC_BYTES[..check] {
            return Err(RpcError::InvalidFrame("Invalid magic bytes".to_string()));
        }
        if buf.len() > 4 && buf[4] != PROTOCOL_VERSION {
            return Err(RpcError::UnsupportedVersion(buf[4]));
        }
        Ok(length_prefixed_frame_len(buf, 5, HEADER_SIZE))
    }

    fn decode(&self, frame: &[u8]) -> Result<BinaryFrame> {
        match self.frame_len(frame)? {
            Some(len) if len == frame.len() => Ok(bincode::deserialize(&frame[HEADER_SIZE..])?),
            _ => Err(RpcError::InvalidFrame(format!(
                "Packet length mismatch ({} bytes)",
                frame.len()
            ))),
        }
    }

    fn encode(&self, msg: &BinaryFrame, dst: &mut BytesMut) -> Result<()> {
        let payload = bincode::serialize(msg)?;
        let mut header = [0u8; 5];
        header[..4].copy_from_slice(&MAGIC_BYTES);
        header[4] = PROTOCOL_VERSION;
        put_length_prefixed(dst, &header, &payload, self.max_frame_size())
    }
}

/// Maps numeric commands to rpc names.
#[derive(Debug, Clone, Default)]
pub struct BinarySessionBuilder {
    commands: HashMap<u32, String>,
}

impl BinarySessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_command<S: Into<String>>(mut self, cmd: u32, rpc_name: S) -> Self {
        self.commands.insert(cmd, rpc_name.into());
        self
    }

    pub fn commands(&self) -> &HashMap<u32, String> {
        &self.commands
    }
}

impl SessionBuilder<BinaryFrame> for BinarySessionBuilder {
    fn rpc_name(&self, request: &BinaryFrame) -> Result<String> {
        self.commands.get(&request.cmd).cloned().ok_or_else(|| {
            RpcError::Unroutable(format!("{}: {}", constants::ERR_UNKNOWN_COMMAND, request.cmd))
        })
    }

    fn trace_context(&self, request: &BinaryFrame) -> TraceContext {
        if request.trace_id == 0 {
            TraceContext::default()
        } else {
            TraceContext::new(format!("{:016x}", request.trace_id))
        }
    }
}
