//! Production TCP transport.

use std::io;

use async_trait::async_trait;
use mapc_core::Transport;
use tokio::net::TcpStream;
use tracing::debug;

/// Connects over TCP with `TCP_NODELAY` set.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

#[async_trait]
impl Transport for TcpTransport {
    type Stream = TcpStream;

    async fn connect(&self, host: &str, port: u16) -> io::Result<TcpStream> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        debug!(host, port, "tcp connected");
        Ok(stream)
    }
}
