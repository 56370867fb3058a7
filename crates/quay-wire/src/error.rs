//! Error types for wire framing and message validation.

use thiserror::Error;

/// Errors surfaced while framing or parsing bus messages.
#[derive(Debug, Error)]
pub enum WireError {
    /// Line could not be parsed as a valid bus message.
    #[error("malformed message: {message}")]
    Malformed {
        /// Human-readable parse failure description.
        message: String,
        /// Underlying JSON error, when one exists.
        #[source]
        source: Option<serde_json::Error>,
    },

    /// A frame exceeded the maximum permitted size.
    #[error("frame too large: {size} bytes exceeds {max_size} byte limit")]
    FrameTooLarge {
        /// Observed frame (or unterminated tail) size.
        size: usize,
        /// Permitted maximum.
        max_size: usize,
    },

    /// Serializing an outbound message failed.
    #[error("failed to serialize message: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl WireError {
    /// Builds a malformed-message error from a serde failure.
    #[must_use]
    pub fn from_json_error(source: serde_json::Error) -> Self {
        Self::Malformed {
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Builds a malformed-message error with a custom description.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
            source: None,
        }
    }

    /// Builds a frame-size violation error.
    #[must_use]
    pub fn frame_too_large(size: usize, max_size: usize) -> Self {
        Self::FrameTooLarge { size, max_size }
    }
}
