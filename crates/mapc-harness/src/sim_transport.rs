//! Turmoil network transport.

use std::io;

use async_trait::async_trait;
use mapc_core::Transport;
use turmoil::net::TcpStream;

/// Connects over Turmoil's simulated TCP.
///
/// Host names resolve through the simulation, so `host` is the name a server
/// was registered under with `Sim::host`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimTransport;

#[async_trait]
impl Transport for SimTransport {
    type Stream = TcpStream;

    async fn connect(&self, host: &str, port: u16) -> io::Result<TcpStream> {
        TcpStream::connect((host, port)).await
    }
}
