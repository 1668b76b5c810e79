//! Transport error types.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors surfaced by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The listen address could not be bound (in use or invalid).
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// A single accept attempt failed.
    #[error("Accept error: {0}")]
    Accept(#[source] io::Error),

    /// A peer failed the handshake.
    #[error("Handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// A frame could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// A live peer is already registered for this address.
    #[error("Already connected to peer: {addr}")]
    AlreadyConnected { addr: SocketAddr },

    /// `listen_and_accept` was called on a transport that is already listening.
    #[error("Transport is already listening on {addr}")]
    AlreadyListening { addr: SocketAddr },

    /// The transport has been closed.
    #[error("Transport closed")]
    Closed,

    /// No decoder was configured.
    #[error("Transport configuration is missing a decoder")]
    MissingDecoder,

    /// No handshake was configured.
    #[error("Transport configuration is missing a handshake")]
    MissingHandshake,

    /// I/O error outside of bind/accept.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors produced by a [`Decoder`](crate::protocol::Decoder).
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The remote side closed the connection on a frame boundary.
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// The connection failed while reading a frame.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A frame exceeded the size limit. Its payload has been skipped.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// A single frame was malformed but the stream is still aligned.
    #[error("Malformed frame: {0}")]
    Malformed(String),
}

impl DecodeError {
    /// Whether the connection can no longer be read from.
    ///
    /// Fatal errors end the connection; the rest are retried in place.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DecodeError::ConnectionClosed | DecodeError::Io(_))
    }
}

/// Errors produced by a [`Handshake`](crate::protocol::Handshake).
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The peer was rejected.
    #[error("Peer rejected: {0}")]
    Rejected(String),

    /// The handshake did not complete in time.
    #[error("Handshake timeout")]
    Timeout,

    /// Invalid network magic bytes.
    #[error("Invalid network magic: expected {expected:?}, got {actual:?}")]
    InvalidMagic { expected: [u8; 4], actual: [u8; 4] },

    /// Protocol version incompatible.
    #[error("Incompatible protocol version: {peer_version} (our version: {our_version})")]
    IncompatibleVersion { peer_version: u32, our_version: u32 },

    /// The transport shut down during the handshake.
    #[error("Transport shutting down")]
    Shutdown,

    /// I/O error during the exchange.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
