//! Transport layer for distributed file storage peers.
//!
//! This crate accepts inbound peer connections and turns the bytes they send
//! into messages for the rest of the node:
//!
//! - A [`Transport`] contract (`listen_and_accept`, `consume`, `close`)
//! - A TCP implementation with one task per connection
//! - Pluggable [`Decoder`] and [`Handshake`] strategies
//! - A registry of live peers, pruned as connections end
//!
//! # Architecture
//!
//! Every accepted connection runs in its own tokio task: handshake first,
//! then a read loop that decodes frames and pushes them onto one shared
//! channel. The application drains that channel through a [`Consumer`].
//!
//! # Usage
//!
//! ```ignore
//! use dfs_p2p::{LengthPrefixedDecoder, NopHandshake, TcpTransport, TcpTransportOpts, Transport};
//!
//! let opts = TcpTransportOpts::new(":3000")
//!     .with_decoder(LengthPrefixedDecoder::default())
//!     .with_handshake(NopHandshake);
//! let transport = TcpTransport::new(opts)?;
//!
//! let consumer = transport.consume();
//! tokio::spawn(async move {
//!     while let Some(rpc) = consumer.recv().await {
//!         println!("{rpc}");
//!     }
//! });
//!
//! transport.listen_and_accept().await?;
//! ```

pub mod config;
pub mod error;

pub mod peer;
pub mod protocol;
pub mod transport;

// Re-export main types
pub use config::{TcpTransportOpts, MAX_FRAME_SIZE, NETWORK_MAGIC, PROTOCOL_VERSION};
pub use error::{DecodeError, HandshakeError, TransportError, TransportResult};
pub use peer::{ConnectionDirection, Peer, PeerId, PeerInfo, TcpPeer};
pub use protocol::{
    encode_frame, handshake_fn, write_frame, Decoder, Handshake, LengthPrefixedDecoder,
    NopHandshake, Rpc, StreamDecoder, VersionHandshake,
};
pub use transport::{Consumer, TcpTransport, Transport};
