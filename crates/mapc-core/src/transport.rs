//! Transport abstraction and frame-level stream I/O.
//!
//! The simulation server speaks over one persistent duplex byte stream.
//! Production connects over TCP, tests use Turmoil's simulated TCP; both
//! only have to hand back an `AsyncRead + AsyncWrite` stream.

use std::io;

use async_trait::async_trait;
use mapc_proto::{FrameBuffer, Message, codec};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tracing::trace;

use crate::error::TransportError;

/// Connects to a simulation server.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Duplex byte stream to the server.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Open a stream to `host:port`.
    async fn connect(&self, host: &str, port: u16) -> io::Result<Self::Stream>;
}

/// Receiving half of a framed stream.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    buffer: FrameBuffer,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a byte stream, rejecting frames longer than `max_frame_len`.
    pub fn new(inner: R, max_frame_len: usize) -> Self {
        Self { inner, buffer: FrameBuffer::new(max_frame_len) }
    }

    /// Wait for the next complete message.
    ///
    /// Cancel-safe: bytes read before a cancellation stay buffered for the
    /// next call.
    ///
    /// # Errors
    ///
    /// - `Decode` if the frame is malformed or the stream ends mid-frame
    /// - `Eof` if the peer closed the stream between frames
    /// - `Io` if the stream failed
    pub async fn receive(&mut self) -> Result<Message, TransportError> {
        loop {
            if let Some(message) = self.buffer.next_message()? {
                return Ok(message);
            }

            let read = self.inner.read_buf(self.buffer.buffer_mut()).await?;
            trace!(read, buffered = self.buffer.len(), "read from transport");
            if read == 0 {
                if self.buffer.is_empty() {
                    return Err(TransportError::Eof);
                }
                return Err(mapc_proto::DecodeError::Truncated { len: self.buffer.len() }.into());
            }
        }
    }
}

/// Sending half of a framed stream.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wrap a byte stream.
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write one message as a complete frame and flush it.
    pub async fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        let frame = codec::encode(message)?;
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Close the write direction of the stream.
    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// Split a duplex stream into framed halves.
pub fn split<S>(stream: S, max_frame_len: usize) -> (FrameReader<ReadHalf<S>>, FrameWriter<WriteHalf<S>>)
where
    S: AsyncRead + AsyncWrite,
{
    let (read, write) = tokio::io::split(stream);
    (FrameReader::new(read, max_frame_len), FrameWriter::new(write))
}
