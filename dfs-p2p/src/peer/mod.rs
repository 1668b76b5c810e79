//! Peer connection management.
//!
//! This module provides:
//! - Peer identification and metadata
//! - The [`Peer`] abstraction and its TCP implementation
//! - The registry of live peers

pub mod info;
pub mod registry;
pub mod tcp;

// Re-export main types
pub use info::{ConnectionDirection, PeerId, PeerInfo, PeerStats};
pub use registry::PeerRegistry;
pub use tcp::{Peer, TcpPeer};
