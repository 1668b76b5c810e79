//! Version handshake.
//!
//! Both sides write their header and then read the other side's:
//! - 4 bytes: network magic
//! - 4 bytes: big-endian protocol version
//!
//! The connection is accepted when the magic and version both match ours.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::{NETWORK_MAGIC, PROTOCOL_VERSION};
use crate::error::HandshakeError;
use crate::peer::Peer;
use crate::protocol::Handshake;

/// Size of the version header.
pub const VERSION_HEADER_SIZE: usize = 8;

/// Magic + protocol version exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionHandshake {
    magic: [u8; 4],
    version: u32,
}

impl Default for VersionHandshake {
    fn default() -> Self {
        Self::new(NETWORK_MAGIC, PROTOCOL_VERSION)
    }
}

impl VersionHandshake {
    /// Create a handshake advertising the given magic and version.
    pub fn new(magic: [u8; 4], version: u32) -> Self {
        Self { magic, version }
    }

    /// Our header as sent on the wire.
    pub fn header(&self) -> [u8; VERSION_HEADER_SIZE] {
        let mut header = [0u8; VERSION_HEADER_SIZE];
        header[..4].copy_from_slice(&self.magic);
        header[4..].copy_from_slice(&self.version.to_be_bytes());
        header
    }

    /// Validate the header received from the remote side.
    pub fn validate(&self, received: [u8; VERSION_HEADER_SIZE]) -> Result<(), HandshakeError> {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&received[..4]);
        if magic != self.magic {
            return Err(HandshakeError::InvalidMagic {
                expected: self.magic,
                actual: magic,
            });
        }

        let mut version = [0u8; 4];
        version.copy_from_slice(&received[4..]);
        let peer_version = u32::from_be_bytes(version);
        // For now, require exact match
        if peer_version != self.version {
            return Err(HandshakeError::IncompatibleVersion {
                peer_version,
                our_version: self.version,
            });
        }

        Ok(())
    }

    /// Run the exchange over any stream.
    ///
    /// Used by the transport for accepted peers, and by clients to complete
    /// the same handshake from their side.
    pub async fn perform<S>(&self, stream: &mut S) -> Result<(), HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + ?Sized,
    {
        stream.write_all(&self.header()).await?;
        stream.flush().await?;

        let mut received = [0u8; VERSION_HEADER_SIZE];
        stream.read_exact(&mut received).await?;
        self.validate(received)
    }
}

#[async_trait]
impl Handshake for VersionHandshake {
    async fn handshake(&self, peer: &mut dyn Peer) -> Result<(), HandshakeError> {
        self.perform(&mut *peer).await?;
        tracing::debug!(addr = %peer.remote_addr(), version = self.version, "Version handshake complete");
        Ok(())
    }
}
