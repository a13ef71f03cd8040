use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::trace;

/// This is an abstraction for sending a datagram on a UDP socket, introduced
///  to facilitate mocking the I/O part away for testing.
///
/// Send errors are returned rather than swallowed: the session treats them as
///  fatal and surfaces them through its error handling.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SendSocket: Send + Sync + 'static {
    async fn send_datagram(&self, to: SocketAddr, datagram: &[u8]) -> io::Result<usize>;
}

#[async_trait]
impl SendSocket for Arc<UdpSocket> {
    async fn send_datagram(&self, to: SocketAddr, datagram: &[u8]) -> io::Result<usize> {
        trace!("UDP socket: sending {} byte datagram to {:?}", datagram.len(), to);
        self.send_to(datagram, to).await
    }
}
