//! Multi-frame transport codec for halremote channels.
//!
//! Both channels exchange frame sequences, delimited with 4-byte
//! big-endian length prefixes for reliable message boundaries over stream
//! sockets:
//!
//! ```text
//! +----------------+----------------+------------------+-----
//! |  4 bytes       |  4 bytes       |  N bytes         | ...
//! |  (frame count) |  (length BE)   |  (frame payload) |
//! +----------------+----------------+------------------+-----
//! ```
//!
//! Frame conventions per channel:
//!
//! - command (halrcmd): a 2-frame `[GREETING_OP, identity]` greeting on
//!   connect, then single-frame JSON [`Container`] payloads both ways
//! - update (halrcomp): client sends 2-frame `[SUBSCRIBE_OP |
//!   UNSUBSCRIBE_OP, topic]` control messages; the server publishes
//!   2-frame `[topic, JSON Container]` messages

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::message::Container;

/// Maximum size of a single frame (16 MiB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Maximum frames per message
pub const MAX_FRAMES: usize = 16;

/// Length prefix size in bytes
const LENGTH_PREFIX_SIZE: usize = 4;

/// First-frame op byte of a subscribe control message
pub const SUBSCRIBE_OP: u8 = 0x01;

/// First-frame op byte of an unsubscribe control message
pub const UNSUBSCRIBE_OP: u8 = 0x00;

/// First-frame op byte of the dealer identity greeting
pub const GREETING_OP: u8 = 0x02;

/// Codec for length-prefixed frame sequences
#[derive(Debug, Default)]
pub struct FrameCodec {
    frames_expected: Option<usize>,
    frames: Vec<Bytes>,
    current_length: Option<usize>,
}

impl FrameCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for FrameCodec {
    type Item = Vec<Bytes>;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.frames_expected.is_none() {
            if src.len() < LENGTH_PREFIX_SIZE {
                return Ok(None);
            }

            let count = src.get_u32() as usize;
            if count == 0 || count > MAX_FRAMES {
                return Err(CodecError::BadFrameCount(count));
            }

            self.frames_expected = Some(count);
            self.frames = Vec::with_capacity(count);
        }

        let Some(expected) = self.frames_expected else {
            return Ok(None);
        };

        while self.frames.len() < expected {
            if self.current_length.is_none() {
                if src.len() < LENGTH_PREFIX_SIZE {
                    return Ok(None);
                }

                let len = src.get_u32() as usize;
                if len > MAX_FRAME_SIZE {
                    return Err(CodecError::FrameTooLarge(len));
                }

                self.current_length = Some(len);
            }

            let Some(length) = self.current_length else {
                return Ok(None);
            };

            if src.len() < length {
                src.reserve(length - src.len());
                return Ok(None);
            }

            self.frames.push(src.split_to(length).freeze());
            self.current_length = None;
        }

        self.frames_expected = None;
        Ok(Some(std::mem::take(&mut self.frames)))
    }
}

impl Encoder<Vec<Bytes>> for FrameCodec {
    type Error = CodecError;

    // Frame sizes are checked against MAX_FRAME_SIZE (fits in u32)
    #[allow(clippy::cast_possible_truncation)]
    fn encode(&mut self, frames: Vec<Bytes>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if frames.is_empty() || frames.len() > MAX_FRAMES {
            return Err(CodecError::BadFrameCount(frames.len()));
        }

        let payload: usize = frames.iter().map(Bytes::len).sum();
        dst.reserve(LENGTH_PREFIX_SIZE * (frames.len() + 1) + payload);

        dst.put_u32(frames.len() as u32);
        for frame in frames {
            if frame.len() > MAX_FRAME_SIZE {
                return Err(CodecError::FrameTooLarge(frame.len()));
            }
            dst.put_u32(frame.len() as u32);
            dst.put_slice(&frame);
        }

        Ok(())
    }
}

/// Serialize a [`Container`] into its JSON payload frame.
pub fn container_frame(container: &Container) -> Result<Bytes, CodecError> {
    Ok(Bytes::from(serde_json::to_vec(container)?))
}

/// Parse a payload frame back into a [`Container`].
pub fn parse_container(frame: &[u8]) -> Result<Container, CodecError> {
    Ok(serde_json::from_slice(frame)?)
}

/// The single-frame message shape of the command channel.
pub fn command_frames(container: &Container) -> Result<Vec<Bytes>, CodecError> {
    Ok(vec![container_frame(container)?])
}

/// The `[topic, payload]` message shape published on the update channel.
pub fn update_frames(topic: &str, container: &Container) -> Result<Vec<Bytes>, CodecError> {
    Ok(vec![
        Bytes::copy_from_slice(topic.as_bytes()),
        container_frame(container)?,
    ])
}

/// A `[op, topic]` subscription control message.
#[must_use]
pub fn subscription_frames(op: u8, topic: &str) -> Vec<Bytes> {
    vec![
        Bytes::copy_from_slice(&[op]),
        Bytes::copy_from_slice(topic.as_bytes()),
    ]
}

/// The `[GREETING_OP, identity]` dealer greeting.
#[must_use]
pub fn greeting_frames(identity: &str) -> Vec<Bytes> {
    vec![
        Bytes::copy_from_slice(&[GREETING_OP]),
        Bytes::copy_from_slice(identity.as_bytes()),
    ]
}

/// Errors that can occur during codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("Frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("Bad frame count: {0} (max: {MAX_FRAMES})")]
    BadFrameCount(usize),
}
