//! Registry of live peers.
//!
//! Maps each remote address to the peer currently connected from it. The
//! lock is only ever held for the map operation itself.

use std::collections::HashMap;
use std::net::SocketAddr;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::{TransportError, TransportResult};
use crate::peer::{PeerId, PeerInfo};

/// A registered peer and the token that stops its task.
#[derive(Debug)]
struct PeerEntry {
    info: PeerInfo,
    cancel: CancellationToken,
}

/// Tracks the live peers of one transport.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<SocketAddr, PeerEntry>>,
}

impl PeerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer. Fails if another live peer holds the same address.
    ///
    /// Cancelling `cancel` closes the peer.
    pub async fn register(&self, info: PeerInfo, cancel: CancellationToken) -> TransportResult<()> {
        let mut peers = self.peers.write().await;
        if peers.contains_key(&info.addr) {
            return Err(TransportError::AlreadyConnected { addr: info.addr });
        }
        peers.insert(info.addr, PeerEntry { info, cancel });
        Ok(())
    }

    /// Remove the peer registered at `addr`, provided it is still `id`.
    pub async fn remove(&self, addr: &SocketAddr, id: PeerId) -> Option<PeerInfo> {
        let mut peers = self.peers.write().await;
        if !peers.get(addr).is_some_and(|entry| entry.info.id == id) {
            return None;
        }
        peers.remove(addr).map(|entry| entry.info)
    }

    /// Ask the peer at `addr` to disconnect. Returns false if unknown.
    pub async fn disconnect(&self, addr: &SocketAddr) -> bool {
        let peers = self.peers.read().await;
        match peers.get(addr) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Ask every registered peer to disconnect. Returns how many were signalled.
    pub async fn close_all(&self) -> usize {
        let peers = self.peers.read().await;
        for entry in peers.values() {
            entry.cancel.cancel();
        }
        peers.len()
    }

    /// Check if a peer is registered at `addr`.
    pub async fn contains(&self, addr: &SocketAddr) -> bool {
        self.peers.read().await.contains_key(addr)
    }

    /// Get the peer registered at `addr`.
    pub async fn get(&self, addr: &SocketAddr) -> Option<PeerInfo> {
        self.peers.read().await.get(addr).map(|entry| entry.info.clone())
    }

    /// Snapshot of all registered peers.
    pub async fn snapshot(&self) -> Vec<PeerInfo> {
        let mut peers: Vec<_> = self
            .peers
            .read()
            .await
            .values()
            .map(|entry| entry.info.clone())
            .collect();
        peers.sort_by_key(|info| info.id);
        peers
    }

    /// Number of registered peers.
    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Whether no peers are registered.
    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::ConnectionDirection;

    fn make_peer(id: u64, addr: &str) -> PeerInfo {
        PeerInfo::new(PeerId::new(id), addr.parse().unwrap(), ConnectionDirection::Inbound)
    }

    #[tokio::test]
    async fn test_register_and_remove() {
        let registry = PeerRegistry::new();
        let peer = make_peer(1, "127.0.0.1:4000");
        let addr = peer.addr;

        registry.register(peer, CancellationToken::new()).await.unwrap();
        assert!(registry.contains(&addr).await);
        assert_eq!(registry.len().await, 1);

        let removed = registry.remove(&addr, PeerId::new(1)).await;
        assert!(removed.is_some());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_duplicate_address_rejected() {
        let registry = PeerRegistry::new();
        registry
            .register(make_peer(1, "127.0.0.1:4000"), CancellationToken::new())
            .await
            .unwrap();

        let err = registry
            .register(make_peer(2, "127.0.0.1:4000"), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::AlreadyConnected { .. }));
        assert_eq!(registry.get(&"127.0.0.1:4000".parse().unwrap()).await.unwrap().id, PeerId::new(1));
    }

    #[tokio::test]
    async fn test_remove_ignores_stale_id() {
        let registry = PeerRegistry::new();
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        registry
            .register(make_peer(2, "127.0.0.1:4000"), CancellationToken::new())
            .await
            .unwrap();

        assert!(registry.remove(&addr, PeerId::new(1)).await.is_none());
        assert!(registry.contains(&addr).await);
    }

    #[tokio::test]
    async fn test_disconnect_and_close_all() {
        let registry = PeerRegistry::new();
        let first = CancellationToken::new();
        let second = CancellationToken::new();
        registry.register(make_peer(1, "127.0.0.1:4000"), first.clone()).await.unwrap();
        registry.register(make_peer(2, "127.0.0.1:4001"), second.clone()).await.unwrap();

        assert!(registry.disconnect(&"127.0.0.1:4000".parse().unwrap()).await);
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert!(!registry.disconnect(&"127.0.0.1:5000".parse().unwrap()).await);

        assert_eq!(registry.close_all().await, 2);
        assert!(second.is_cancelled());
    }

    #[tokio::test]
    async fn test_snapshot_sorted_by_id() {
        let registry = PeerRegistry::new();
        registry.register(make_peer(3, "127.0.0.1:4003"), CancellationToken::new()).await.unwrap();
        registry.register(make_peer(1, "127.0.0.1:4001"), CancellationToken::new()).await.unwrap();

        let ids: Vec<_> = registry.snapshot().await.iter().map(|info| info.id).collect();
        assert_eq!(ids, vec![PeerId::new(1), PeerId::new(3)]);
    }
}
