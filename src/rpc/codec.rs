//! Frame codec.
//!
//! ```text
//! [len: u32 BE][bincode body of len bytes]
//! ```
//!
//! A frame whose declared length exceeds the codec limit is invalid before
//! any of its body is buffered.

use super::message::{Command, Reply};
use super::DecodeResult;
use crate::core::error::{CabinetError, CabinetResult};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

/// Length prefix size.
pub const HEADER_LEN: usize = 4;

/// Trait for protocol codecs.
pub trait ProtocolCodec: Send + Sync {
    /// The message type decoded from the wire.
    type Inbound;

    /// The message type encoded to the wire.
    type Outbound;

    /// Attempt to decode a message from the buffer.
    ///
    /// On `Complete`, the decoded bytes are consumed from the buffer. On
    /// `Incomplete` the buffer is left untouched.
    fn decode(&self, buffer: &mut BytesMut) -> DecodeResult<Self::Inbound>;

    /// Encode a message to one frame.
    fn encode(&self, message: &Self::Outbound) -> CabinetResult<Bytes>;

    /// Get the protocol name.
    fn protocol_name(&self) -> &'static str;
}

/// Length-prefixed bincode codec reading `In` and writing `Out`.
pub struct FrameCodec<In, Out> {
    max_frame_bytes: usize,
    _messages: PhantomData<fn(Out) -> In>,
}

/// Server side: reads commands, writes replies.
pub type ServerCodec = FrameCodec<Command, Reply>;

/// Client side: reads replies, writes commands.
pub type ClientCodec = FrameCodec<Reply, Command>;

impl<In, Out> FrameCodec<In, Out> {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            _messages: PhantomData,
        }
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }
}

impl<In, Out> ProtocolCodec for FrameCodec<In, Out>
where
    In: DeserializeOwned,
    Out: Serialize,
{
    type Inbound = In;
    type Outbound = Out;

    fn decode(&self, buffer: &mut BytesMut) -> DecodeResult<In> {
        if buffer.len() < HEADER_LEN {
            return DecodeResult::Incomplete;
        }

        let len = u32::from_be_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]) as usize;
        if len > self.max_frame_bytes {
            return DecodeResult::Invalid(format!(
                "frame of {} bytes exceeds limit of {}",
                len, self.max_frame_bytes
            ));
        }
        if buffer.len() < HEADER_LEN + len {
            return DecodeResult::Incomplete;
        }

        buffer.advance(HEADER_LEN);
        let body = buffer.split_to(len);
        match bincode::deserialize(&body) {
            Ok(message) => DecodeResult::Complete(message),
            Err(e) => DecodeResult::Invalid(format!("undecodable frame: {}", e)),
        }
    }

    fn encode(&self, message: &Out) -> CabinetResult<Bytes> {
        let body = bincode::serialize(message)?;
        if body.len() > self.max_frame_bytes {
            return Err(CabinetError::protocol(format!(
                "outgoing frame of {} bytes exceeds limit of {}",
                body.len(),
                self.max_frame_bytes
            )));
        }
        let mut frame = BytesMut::with_capacity(HEADER_LEN + body.len());
        frame.put_u32(body.len() as u32);
        frame.extend_from_slice(&body);
        Ok(frame.freeze())
    }

    fn protocol_name(&self) -> &'static str {
        "cabinet"
    }
}
