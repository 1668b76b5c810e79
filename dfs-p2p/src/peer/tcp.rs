//! Peer abstraction and its TCP implementation.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;

use crate::peer::{ConnectionDirection, PeerId, PeerInfo};

/// A remote node reachable over one established connection.
///
/// Peers are byte streams so handshakes can talk to them directly.
#[async_trait]
pub trait Peer: AsyncRead + AsyncWrite + Send + Unpin {
    /// Metadata for this connection.
    fn info(&self) -> &PeerInfo;

    /// Remote address of the connection.
    fn remote_addr(&self) -> SocketAddr {
        self.info().addr
    }

    /// Whether we dialed this peer.
    fn is_outbound(&self) -> bool {
        self.info().is_outbound()
    }

    /// Close the connection.
    async fn close(&mut self) -> io::Result<()>;
}

/// Remote node over an established TCP connection.
#[derive(Debug)]
pub struct TcpPeer {
    stream: TcpStream,
    info: PeerInfo,
}

impl TcpPeer {
    /// Wrap a connected stream.
    ///
    /// Accepted connections are [`ConnectionDirection::Inbound`], dialed ones
    /// [`ConnectionDirection::Outbound`].
    pub fn new(
        id: PeerId,
        stream: TcpStream,
        addr: SocketAddr,
        direction: ConnectionDirection,
    ) -> Self {
        Self {
            stream,
            info: PeerInfo::new(id, addr, direction),
        }
    }
}

#[async_trait]
impl Peer for TcpPeer {
    fn info(&self) -> &PeerInfo {
        &self.info
    }

    async fn close(&mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }
}

impl AsyncRead for TcpPeer {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for TcpPeer {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_peer_io_and_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (stream, addr) = listener.accept().await.unwrap();

        let mut peer = TcpPeer::new(PeerId::new(7), stream, addr, ConnectionDirection::Inbound);
        assert_eq!(peer.remote_addr(), client.local_addr().unwrap());
        assert!(!peer.is_outbound());

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        peer.write_all(b"pong").await.unwrap();
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        peer.close().await.unwrap();
        let read = client.read(&mut buf).await.unwrap();
        assert_eq!(read, 0);
    }
}
