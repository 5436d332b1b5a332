//! # JSON Protocol
//!
//! Length-prefixed JSON frames:
//!
//! ```text
//! [Length(4, big-endian)] [JSON object (Length bytes)]
//! ```
//!
//! The object carries `seq`, `rpc`, `body`, `code`, `message` and `trace_id`.
//! Requests name their target in `rpc`; replies echo `seq`, `rpc` and `trace_id`
//! and report status in `code` (`0` = success).

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::core::codec::{length_prefixed_frame_len, put_length_prefixed, Codec, Message};
use crate::core::session::{SessionBuilder, TraceContext};
use crate::error::{constants, RpcError, Result};

/// Protocol name the JSON codec registers under.
pub const JSON_PROTOCOL: &str = "json";

const LENGTH_PREFIX: usize = 4;

/// One JSON request or reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct JsonFrame {
    #[serde(default)]
    pub seq: u64,
    #[serde(default)]
    pub rpc: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl JsonFrame {
    pub fn request<R: Into<String>, B: Into<String>>(seq: u64, rpc: R, body: B) -> Self {
        Self {
            seq,
            rpc: rpc.into(),
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn with_trace_id<S: Into<String>>(mut self, trace_id: S) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.code != 0
    }
}

impl Message for JsonFrame {
    fn body(&self) -> Bytes {
        Bytes::copy_from_slice(self.body.as_bytes())
    }

    // `body` is a JSON string, so only UTF-8 payloads survive the trip.
    fn reply(&self, body: Bytes) -> Result<Self> {
        let body = String::from_utf8(body.to_vec())
            .map_err(|_| RpcError::Handler(constants::ERR_BODY_NOT_UTF8.to_string()))?;
        Ok(Self {
            seq: self.seq,
            rpc: self.rpc.clone(),
            body,
            code: 0,
            message: None,
            trace_id: self.trace_id.clone(),
        })
    }

    fn error_reply(&self, err: &RpcError) -> Self {
        Self {
            seq: self.seq,
            rpc: self.rpc.clone(),
            body: String::new(),
            code: err.code(),
            message: Some(err.to_string()),
            trace_id: self.trace_id.clone(),
        }
    }
}

/// Codec for [`JsonFrame`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    type Message = JsonFrame;

    fn name(&self) -> &str {
        JSON_PROTOCOL
    }

    fn frame_len(&self, buf: &[u8]) -> Result<Option<usize>> {
        Ok(length_prefixed_frame_len(buf, 0, LENGTH_PREFIX))
    }

    fn decode(&self, frame: &[u8]) -> Result<JsonFrame> {
        match self.frame_len(frame)? {
            Some(len) if len == frame.len() => Ok(serde_json::from_slice(&frame[LENGTH_PREFIX..])?),
            _ => Err(RpcError::InvalidFrame(format!(
                "JSON frame length mismatch ({} bytes)",
                frame.len()
            ))),
        }
    }

    fn encode(&self, msg: &JsonFrame, dst: &mut BytesMut) -> Result<()> {
        let payload = serde_json::to_vec(msg)?;
        put_length_prefixed(dst, &[], &payload, self.max_frame_size())
    }
}

/// Takes the rpc name from the `rpc` field and tracing from `trace_id`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSessionBuilder;

impl SessionBuilder<JsonFrame> for JsonSessionBuilder {
    fn rpc_name(&self, request: &JsonFrame) -> Result<String> {
        if request.rpc.is_empty() {
            return Err(RpcError::Unroutable(constants::ERR_EMPTY_RPC_NAME.to_string()));
        }
        Ok(request.rpc.clone())
    }

    fn trace_context(&self, request: &JsonFrame) -> TraceContext {
        TraceContext::from(request.trace_id.clone())
    }
}
