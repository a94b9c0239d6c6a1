// Socket seam between the link engine and the OS.
pub mod udp;

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;

/// A bound datagram socket. Dropping it closes it.
#[async_trait]
pub trait LinkSocket: Send + Sync {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
}

/// Opens sockets on a local port.
#[async_trait]
pub trait Binder: Send + Sync {
    type Socket: LinkSocket + 'static;

    async fn bind(&self, port: u16) -> io::Result<Self::Socket>;
}
