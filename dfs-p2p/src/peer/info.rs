//! Peer information and identification.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Unique identifier for a peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

impl PeerId {
    /// Create a new peer ID from a counter value.
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Direction of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionDirection {
    /// We initiated the connection.
    Outbound,
    /// Peer connected to us.
    Inbound,
}

impl fmt::Display for ConnectionDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionDirection::Outbound => write!(f, "outbound"),
            ConnectionDirection::Inbound => write!(f, "inbound"),
        }
    }
}

/// Traffic counters shared between a peer's task and registry snapshots.
#[derive(Debug, Default)]
pub struct PeerStats {
    bytes_recv: AtomicU64,
    messages_recv: AtomicU64,
    decode_errors: AtomicU64,
}

impl PeerStats {
    /// Record a decoded message of `bytes` payload bytes.
    pub fn record_recv(&self, bytes: usize) {
        self.bytes_recv.fetch_add(bytes as u64, Ordering::Relaxed);
        self.messages_recv.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a frame that failed to decode.
    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Payload bytes received.
    pub fn bytes_recv(&self) -> u64 {
        self.bytes_recv.load(Ordering::Relaxed)
    }

    /// Messages received.
    pub fn messages_recv(&self) -> u64 {
        self.messages_recv.load(Ordering::Relaxed)
    }

    /// Frames that failed to decode.
    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }
}

/// Information about a connected peer.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    /// Unique peer identifier for this session.
    pub id: PeerId,
    /// Socket address of the peer.
    pub addr: SocketAddr,
    /// Direction of the connection.
    pub direction: ConnectionDirection,
    /// When the connection was established.
    pub connected_at: Instant,
    /// Live traffic counters.
    pub stats: Arc<PeerStats>,
}

impl PeerInfo {
    /// Create info for a new peer connection.
    pub fn new(id: PeerId, addr: SocketAddr, direction: ConnectionDirection) -> Self {
        Self {
            id,
            addr,
            direction,
            connected_at: Instant::now(),
            stats: Arc::new(PeerStats::default()),
        }
    }

    /// Check if this is an outbound connection.
    pub fn is_outbound(&self) -> bool {
        self.direction == ConnectionDirection::Outbound
    }

    /// Check if this is an inbound connection.
    pub fn is_inbound(&self) -> bool {
        self.direction == ConnectionDirection::Inbound
    }

    /// Get the connection duration.
    pub fn connection_duration(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl fmt::Display for PeerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {}, msgs={})",
            self.id,
            self.addr,
            self.direction,
            self.stats.messages_recv()
        )
    }
}
