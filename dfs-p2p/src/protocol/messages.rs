//! Messages delivered to the transport consumer.

use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;

/// One decoded message together with the address of the peer that sent it.
///
/// Produced once per successful decode and handed to the consumer through
/// the transport's shared channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rpc {
    /// Remote address of the sending peer.
    pub from: SocketAddr,
    /// Frame payload as produced by the decoder.
    pub payload: Bytes,
}

impl Rpc {
    /// Create a message from a peer address and payload.
    pub fn new(from: SocketAddr, payload: impl Into<Bytes>) -> Self {
        Self {
            from,
            payload: payload.into(),
        }
    }

    /// An empty message from `from`, ready to be filled by a decoder.
    pub fn empty(from: SocketAddr) -> Self {
        Self {
            from,
            payload: Bytes::new(),
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl fmt::Display for Rpc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rpc from {} ({} bytes)", self.from, self.payload.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_display() {
        let rpc = Rpc::new("127.0.0.1:4000".parse().unwrap(), &b"hello"[..]);
        assert_eq!(rpc.to_string(), "rpc from 127.0.0.1:4000 (5 bytes)");
        assert_eq!(rpc.len(), 5);
    }

    #[test]
    fn test_empty_rpc() {
        let rpc = Rpc::empty("127.0.0.1:4000".parse().unwrap());
        assert!(rpc.is_empty());
    }
}
