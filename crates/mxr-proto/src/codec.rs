//! Length-prefixed stream framing for tokio transports.
//!
//! [`MessageCodec`] splits a byte stream into whole frames using the
//! protocol's leading length field, then hands each frame to
//! [`Message::parse`]. Wrap a `TcpStream` (or any tunneled stream) in
//! `tokio_util::codec::Framed` with this codec to read and write
//! [`Message`] values directly.

use crate::message::{Message, MessageError, HEADER_LEN};
use bytes::{BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Default upper bound on a single frame, header included.
pub const DEFAULT_MAX_FRAME: usize = 1024 * 1024;

/// Errors raised by the framing layer.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A frame's declared length exceeds the configured maximum.
    #[error("frame of {0} bytes exceeds maximum of {1}")]
    Oversize(usize, usize),
    /// The framed bytes failed structural validation.
    #[error(transparent)]
    Malformed(#[from] MessageError),
    /// Transport-level failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Frames [`Message`] values over a byte stream.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    max_frame: usize,
}

impl MessageCodec {
    /// Creates a codec with the given maximum frame size.
    #[must_use]
    pub const fn new(max_frame: usize) -> Self {
        Self { max_frame }
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME)
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Message>, CodecError> {
        if buf.len() < 4 {
            return Ok(None);
        }
        let declared = u32::from_be_bytes(buf[..4].try_into().expect("4-byte slice")) as usize;
        if declared < HEADER_LEN {
            return Err(MessageError::TooShort {
                expected: HEADER_LEN,
                actual: declared,
            }
            .into());
        }
        if declared > self.max_frame {
            return Err(CodecError::Oversize(declared, self.max_frame));
        }
        if buf.len() < declared {
            buf.reserve(declared - buf.len());
            return Ok(None);
        }
        let frame = buf.split_to(declared);
        Ok(Some(Message::parse(&frame)?))
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = CodecError;

    fn encode(&mut self, msg: Message, buf: &mut BytesMut) -> Result<(), CodecError> {
        let bytes = msg.serialize();
        if bytes.len() > self.max_frame {
            return Err(CodecError::Oversize(bytes.len(), self.max_frame));
        }
        buf.reserve(bytes.len());
        buf.put_slice(&bytes);
        Ok(())
    }
}
