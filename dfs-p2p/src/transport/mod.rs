//! Transport contract and implementations.

pub mod consumer;
pub mod tcp;

use async_trait::async_trait;

use crate::error::TransportResult;

pub use consumer::Consumer;
pub use tcp::TcpTransport;

/// A way for the node to receive messages from remote peers.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Bind the configured address and start accepting in the background.
    ///
    /// Returns once the listener is bound; bind failures are returned here.
    async fn listen_and_accept(&self) -> TransportResult<()>;

    /// Handle on the stream of messages decoded from all peers.
    fn consume(&self) -> Consumer;

    /// Stop accepting, close every peer, and wait for their tasks. Idempotent.
    async fn close(&self) -> TransportResult<()>;
}
