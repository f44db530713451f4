//! Codec error types.

use thiserror::Error;

/// A frame could not be turned into a [`crate::Message`].
///
/// Every variant is fatal for the connection: the stream offers no way to
/// resynchronise on a frame the peer considers valid.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame is not a well-formed message of a known kind.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The peer sent more than the allowed bytes without a delimiter.
    #[error("frame exceeds {max} bytes without a delimiter ({len} buffered)")]
    FrameTooLarge {
        /// Bytes buffered so far
        len: usize,
        /// Configured limit
        max: usize,
    },

    /// The stream ended in the middle of a frame.
    #[error("stream closed inside a frame ({len} bytes buffered)")]
    Truncated {
        /// Bytes of the incomplete frame
        len: usize,
    },
}

/// A message could not be serialized.
#[derive(Debug, Error)]
#[error("failed to encode {kind} message: {source}")]
pub struct EncodeError {
    /// Wire tag of the message being encoded
    pub kind: &'static str,
    /// Underlying serializer error
    #[source]
    pub source: serde_json::Error,
}
