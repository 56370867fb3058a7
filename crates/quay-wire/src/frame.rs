//! JSONL framing: one message per newline-terminated line.
//!
//! The framing layer owns the maximum-message-size bound. Once a stream
//! has exceeded the bound without producing a newline there is no way to
//! resynchronise, so [`FrameBuffer`] reports that as an error the
//! connection owner is expected to treat as fatal for the peer.

use crate::error::WireError;
use crate::message::Message;

/// Hard upper bound on a single framed message, delimiter included.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Serializes a message into a newline-terminated frame.
pub fn encode(message: &Message) -> Result<Vec<u8>, WireError> {
    let mut line = serde_json::to_vec(message).map_err(WireError::Serialize)?;
    line.push(b'\n');
    Ok(line)
}

/// Parses one frame (with or without its trailing delimiter).
pub fn decode(line: &[u8]) -> Result<Message, WireError> {
    let trimmed = trim_trailing_whitespace(line);
    if trimmed.is_empty() {
        return Err(WireError::malformed("empty message line"));
    }
    serde_json::from_slice(trimmed).map_err(WireError::from_json_error)
}

/// Accumulates stream bytes and yields complete frames.
///
/// Bytes left over after the last newline stay buffered until the next
/// [`FrameBuffer::push`].
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buffer: Vec<u8>,
}

impl FrameBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes read from the stream.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::FrameTooLarge`] when the unterminated tail of
    /// the buffer exceeds [`MAX_FRAME_BYTES`].
    pub fn push(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        self.buffer.extend_from_slice(bytes);
        let tail_start = self
            .buffer
            .iter()
            .rposition(|byte| *byte == b'\n')
            .map_or(0, |pos| pos + 1);
        let tail_len = self.buffer.len() - tail_start;
        if tail_len > MAX_FRAME_BYTES {
            return Err(WireError::frame_too_large(tail_len, MAX_FRAME_BYTES));
        }
        Ok(())
    }

    /// Pops the next complete frame, without its delimiter.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::FrameTooLarge`] when a complete frame exceeds
    /// [`MAX_FRAME_BYTES`].
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, WireError> {
        let Some(pos) = self.buffer.iter().position(|byte| *byte == b'\n') else {
            return Ok(None);
        };
        let mut frame: Vec<u8> = self.buffer.drain(..=pos).collect();
        frame.pop();
        if frame.len() > MAX_FRAME_BYTES {
            return Err(WireError::frame_too_large(frame.len(), MAX_FRAME_BYTES));
        }
        Ok(Some(frame))
    }

    /// Number of bytes currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// True when nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

fn trim_trailing_whitespace(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|byte| !byte.is_ascii_whitespace())
        .map_or(0, |pos| pos + 1);
    &bytes[..end]
}
