//! Handshake strategies run before a connection is read from.

use async_trait::async_trait;

use crate::error::HandshakeError;
use crate::peer::{Peer, PeerInfo};

/// Strategy that vets a freshly established peer.
///
/// Called exactly once per peer, before any decoding. Returning an error
/// closes the connection without reading from it.
#[async_trait]
pub trait Handshake: Send + Sync + 'static {
    /// Perform the handshake on `peer`.
    async fn handshake(&self, peer: &mut dyn Peer) -> Result<(), HandshakeError>;
}

/// Handshake that accepts every peer without exchanging anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopHandshake;

#[async_trait]
impl Handshake for NopHandshake {
    async fn handshake(&self, _peer: &mut dyn Peer) -> Result<(), HandshakeError> {
        Ok(())
    }
}

/// Handshake backed by a synchronous check on the peer's metadata.
///
/// Created with [`handshake_fn`].
#[derive(Clone)]
pub struct FnHandshake<F> {
    check: F,
}

/// Build a handshake from a closure, e.g. an address allow-list.
///
/// ```
/// use dfs_p2p::protocol::handshake_fn;
/// use dfs_p2p::HandshakeError;
///
/// let loopback_only = handshake_fn(|info| {
///     if info.addr.ip().is_loopback() {
///         Ok(())
///     } else {
///         Err(HandshakeError::Rejected(format!("{} is not local", info.addr)))
///     }
/// });
/// # let _ = loopback_only;
/// ```
pub fn handshake_fn<F>(check: F) -> FnHandshake<F>
where
    F: Fn(&PeerInfo) -> Result<(), HandshakeError> + Send + Sync + 'static,
{
    FnHandshake { check }
}

#[async_trait]
impl<F> Handshake for FnHandshake<F>
where
    F: Fn(&PeerInfo) -> Result<(), HandshakeError> + Send + Sync + 'static,
{
    async fn handshake(&self, peer: &mut dyn Peer) -> Result<(), HandshakeError> {
        (self.check)(peer.info())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::{ConnectionDirection, PeerId, TcpPeer};
    use tokio::net::{TcpListener, TcpStream};

    async fn connected_peer() -> (TcpPeer, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (stream, addr) = listener.accept().await.unwrap();
        let peer = TcpPeer::new(PeerId::new(1), stream, addr, ConnectionDirection::Inbound);
        (peer, client)
    }

    #[tokio::test]
    async fn test_nop_handshake_accepts() {
        let (mut peer, _client) = connected_peer().await;
        assert!(NopHandshake.handshake(&mut peer).await.is_ok());
    }

    #[tokio::test]
    async fn test_fn_handshake_sees_peer_info() {
        let (mut peer, _client) = connected_peer().await;

        let accept_inbound = handshake_fn(|info| {
            if info.is_inbound() {
                Ok(())
            } else {
                Err(HandshakeError::Rejected("outbound".to_string()))
            }
        });
        assert!(accept_inbound.handshake(&mut peer).await.is_ok());

        let reject_all = handshake_fn(|_| Err(HandshakeError::Rejected("denied".to_string())));
        let err = reject_all.handshake(&mut peer).await.unwrap_err();
        assert!(matches!(err, HandshakeError::Rejected(_)));
    }
}
