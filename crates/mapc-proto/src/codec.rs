//! NUL-delimited JSON framing.
//!
//! A frame is the UTF-8 JSON encoding of one [`Message`] followed by a single
//! `0x00` byte. JSON escapes control characters inside strings, so the
//! delimiter can never appear inside an encoded message.

use bytes::{Bytes, BytesMut};

use crate::{
    errors::{DecodeError, EncodeError},
    message::Message,
};

/// Byte terminating every frame.
pub const FRAME_DELIMITER: u8 = 0;

/// Largest frame accepted by default (16 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Encode a message into one complete frame, delimiter included.
pub fn encode(message: &Message) -> Result<Vec<u8>, EncodeError> {
    let mut frame = serde_json::to_vec(message)
        .map_err(|source| EncodeError { kind: message.kind(), source })?;
    frame.push(FRAME_DELIMITER);
    Ok(frame)
}

/// Decode the body of one frame (delimiter already stripped).
pub fn decode(frame: &[u8]) -> Result<Message, DecodeError> {
    Ok(serde_json::from_slice(frame)?)
}

/// Reassembles frames from arbitrarily chunked stream reads.
///
/// Bytes go in through [`FrameBuffer::extend`] (or directly into
/// [`FrameBuffer::buffer_mut`] for `read_buf`); complete frames come out in
/// arrival order. Incomplete trailing data stays buffered and is never
/// exposed.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: BytesMut,
    /// Prefix of `buf` already known to contain no delimiter
    scanned: usize,
    max_frame_len: usize,
}

impl FrameBuffer {
    /// Create a buffer that rejects frames longer than `max_frame_len`.
    pub fn new(max_frame_len: usize) -> Self {
        Self { buf: BytesMut::with_capacity(4096), scanned: 0, max_frame_len }
    }

    /// Append raw bytes received from the stream.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Underlying buffer, for reading straight from an `AsyncRead`.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Number of buffered bytes not yet returned as a frame.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether no partial frame is buffered.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Take the next complete frame body, if one is buffered.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, DecodeError> {
        let unscanned = &self.buf[self.scanned..];
        match unscanned.iter().position(|byte| *byte == FRAME_DELIMITER) {
            Some(offset) => {
                let end = self.scanned + offset;
                if end > self.max_frame_len {
                    return Err(DecodeError::FrameTooLarge { len: end, max: self.max_frame_len });
                }
                let mut frame = self.buf.split_to(end + 1);
                frame.truncate(end);
                self.scanned = 0;
                Ok(Some(frame.freeze()))
            },
            None => {
                self.scanned = self.buf.len();
                if self.buf.len() > self.max_frame_len {
                    return Err(DecodeError::FrameTooLarge {
                        len: self.buf.len(),
                        max: self.max_frame_len,
                    });
                }
                Ok(None)
            },
        }
    }

    /// Take and decode the next complete frame, if one is buffered.
    pub fn next_message(&mut self) -> Result<Option<Message>, DecodeError> {
        match self.next_frame()? {
            Some(frame) => decode(&frame).map(Some),
            None => Ok(None),
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}
