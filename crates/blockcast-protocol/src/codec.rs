//! Codec for encoding and decoding collaboration messages.
//!
//! One WebSocket message carries exactly one [`Message`], so no length
//! prefix is needed: JSON travels in text frames, MessagePack in binary
//! frames.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::envelope::Message;

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds the configured maximum size.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Invalid message data.
    #[error("Invalid message: {0}")]
    Invalid(String),
}

/// Wire encoding used for frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// UTF-8 JSON, sent as text frames.
    #[default]
    Json,
    /// Named-field MessagePack, sent as binary frames.
    #[serde(rename = "msgpack")]
    MessagePack,
}

impl Encoding {
    /// Whether frames in this encoding go out as binary frames.
    #[must_use]
    pub fn is_binary(self) -> bool {
        matches!(self, Encoding::MessagePack)
    }
}

/// Encode a message with the default frame limit.
///
/// # Errors
///
/// Returns an error if the message is too large or encoding fails.
pub fn encode(message: &Message, encoding: Encoding) -> Result<Bytes, ProtocolError> {
    FrameCodec::new(encoding).encode(message)
}

/// Decode a message with the default frame limit.
///
/// # Errors
///
/// Returns an error if the data is too large or not a valid message.
pub fn decode(data: &[u8], encoding: Encoding) -> Result<Message, ProtocolError> {
    FrameCodec::new(encoding).decode(data)
}

/// Codec bound to one encoding and frame limit.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    encoding: Encoding,
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(Encoding::default())
    }
}

impl FrameCodec {
    /// Create a new codec instance.
    #[must_use]
    pub fn new(encoding: Encoding) -> Self {
        Self {
            encoding,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Override the maximum frame size.
    #[must_use]
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// The wire encoding.
    #[must_use]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// The maximum frame size in bytes.
    #[must_use]
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Encode a message to bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the encoded frame is too large or encoding fails.
    pub fn encode(&self, message: &Message) -> Result<Bytes, ProtocolError> {
        let payload = match self.encoding {
            Encoding::Json => serde_json::to_vec(message)?,
            Encoding::MessagePack => rmp_serde::to_vec_named(message)?,
        };

        self.check_size(payload.len())?;
        Ok(Bytes::from(payload))
    }

    /// Decode a message from bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is too large, malformed, or has an
    /// empty `type`.
    pub fn decode(&self, data: &[u8]) -> Result<Message, ProtocolError> {
        self.check_size(data.len())?;

        let message: Message = match self.encoding {
            Encoding::Json => serde_json::from_slice(data)?,
            Encoding::MessagePack => rmp_serde::from_slice(data)?,
        };

        if message.kind.is_empty() {
            return Err(ProtocolError::Invalid("empty message type".into()));
        }
        Ok(message)
    }

    fn check_size(&self, size: usize) -> Result<(), ProtocolError> {
        if size > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            });
        }
        Ok(())
    }
}
