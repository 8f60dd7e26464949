//! Frame Protocol
//!
//! The wayvnc control socket carries concatenated JSON values with no length
//! prefix and no delimiter: a message ends where its JSON value ends.
//!
//! ```text
//! {"method":"attach","id":0,"params":{"display":"wayland-1"}}{"id":0,"code":0}
//! └──────────────────────── message ────────────────────────┘└─── message ───┘
//! ```
//!
//! Whitespace (including newlines) between values is allowed and ignored.
//!
//! # Security
//!
//! - Buffered bytes that never resolve into a value are capped at
//!   [`MAX_MESSAGE_SIZE`] to prevent memory exhaustion
//! - Bytes that can never become valid JSON are rejected immediately

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::ControlError;

/// Maximum size of a single buffered message (10 MB)
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Size of each read from the connection
pub const READ_CHUNK_SIZE: usize = 4096;

/// Encode a message as compact JSON
///
/// # Errors
///
/// Returns `ControlError::Serialization` if serialization fails or the
/// result exceeds `MAX_MESSAGE_SIZE`.
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, ControlError> {
    let json = serde_json::to_vec(msg).map_err(|e| ControlError::Serialization(e.to_string()))?;

    if json.len() > MAX_MESSAGE_SIZE {
        return Err(ControlError::Serialization(format!(
            "Message too large: {} bytes (max: {})",
            json.len(),
            MAX_MESSAGE_SIZE
        )));
    }

    Ok(json)
}

/// Decoder state machine for streaming JSON values
///
/// Buffers incoming bytes and yields complete values. Bytes are kept raw
/// until a whole value is present, so a UTF-8 sequence split across two
/// reads is handled like any other partial read.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    /// Create a new decoder with default buffer capacity
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(READ_CHUNK_SIZE),
        }
    }

    /// Append bytes to the buffer
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Get the number of bytes buffered but not yet decoded
    #[must_use]
    pub fn available(&self) -> usize {
        self.buffer.len()
    }

    /// Try to decode the next value
    ///
    /// Returns:
    /// - `Ok(Some(value))` if a complete value was at the front of the buffer
    /// - `Ok(None)` if more data is needed
    /// - `Err(ControlError::Framing)` if the buffer can never become valid
    pub fn decode(&mut self) -> Result<Option<Value>, ControlError> {
        let (result, consumed) = {
            let mut stream =
                serde_json::Deserializer::from_slice(&self.buffer).into_iter::<Value>();
            let result = stream.next();
            (result, stream.byte_offset())
        };

        match result {
            // Nothing but whitespace
            None => {
                self.buffer.clear();
                Ok(None)
            }
            Some(Ok(value)) => {
                self.buffer.drain(..consumed);
                let whitespace = self
                    .buffer
                    .iter()
                    .take_while(|b| matches!(b, b' ' | b'\t' | b'\n' | b'\r'))
                    .count();
                self.buffer.drain(..whitespace);
                Ok(Some(value))
            }
            Some(Err(e)) if e.is_eof() => {
                if self.buffer.len() > MAX_MESSAGE_SIZE {
                    return Err(ControlError::Framing(format!(
                        "Message exceeds maximum {MAX_MESSAGE_SIZE} bytes"
                    )));
                }
                Ok(None)
            }
            Some(Err(e)) => Err(ControlError::Framing(e.to_string())),
        }
    }
}

/// Reads whole messages off the read half of a connection
///
/// Owns both the read half and the [`FrameDecoder`], so there is exactly one
/// reader of the stream.
pub struct FrameReader<R> {
    reader: R,
    decoder: FrameDecoder,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a readable stream
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            decoder: FrameDecoder::new(),
        }
    }

    /// Wait for the next complete message
    ///
    /// # Errors
    ///
    /// - `ControlError::ConnectionLost` if the stream reaches EOF
    /// - `ControlError::Framing` if the stream carries invalid JSON
    /// - `ControlError::Io` if the read fails
    pub async fn read_message(&mut self) -> Result<Value, ControlError> {
        let mut buf = [0u8; READ_CHUNK_SIZE];

        loop {
            if let Some(value) = self.decoder.decode()? {
                return Ok(value);
            }

            let n = self.reader.read(&mut buf).await?;
            if n == 0 {
                if self.decoder.available() > 0 {
                    tracing::debug!(
                        pending_bytes = self.decoder.available(),
                        "Connection closed mid-message"
                    );
                }
                return Err(ControlError::ConnectionLost);
            }
            self.decoder.push(&buf[..n]);
        }
    }
}
