//! Node orchestrator: owns the transport and drains its messages.

use std::future::Future;

use anyhow::Context;

use dfs_p2p::{Consumer, TcpTransport, Transport};

use crate::config::NodeConfig;
use crate::shutdown::wait_for_shutdown_signal;

/// A running storage node.
pub struct Node {
    config: NodeConfig,
    transport: TcpTransport,
}

impl Node {
    /// Create a node from configuration.
    pub fn new(config: NodeConfig) -> anyhow::Result<Self> {
        let transport =
            TcpTransport::new(config.transport_opts()).context("invalid transport configuration")?;
        Ok(Self { config, transport })
    }

    /// The node's transport.
    pub fn transport(&self) -> &TcpTransport {
        &self.transport
    }

    /// Run until SIGINT/SIGTERM.
    pub async fn run(self) -> anyhow::Result<()> {
        self.run_until(async {
            if let Err(e) = wait_for_shutdown_signal().await {
                tracing::error!(error = %e, "Failed to install signal handlers, shutting down");
            }
        })
        .await?;
        Ok(())
    }

    /// Run until `shutdown` resolves. Returns the number of messages consumed.
    pub async fn run_until<F>(self, shutdown: F) -> anyhow::Result<u64>
    where
        F: Future<Output = ()>,
    {
        let consumer = tokio::spawn(consume_messages(self.transport.consume()));

        if let Err(e) = self.transport.listen_and_accept().await {
            consumer.abort();
            return Err(e).with_context(|| format!("failed to listen on {}", self.config.listen_addr));
        }

        if let Some(addr) = self.transport.local_addr().await {
            tracing::info!(
                addr = %addr,
                decoder = ?self.config.decoder,
                handshake = ?self.config.handshake,
                "Node started"
            );
        }

        shutdown.await;

        self.transport.close().await?;
        let consumed = consumer.await.context("consumer task failed")?;
        tracing::info!(messages = consumed, "Node stopped");

        Ok(consumed)
    }
}

/// Log every message until the transport closes.
async fn consume_messages(consumer: Consumer) -> u64 {
    let mut count = 0u64;
    while let Some(rpc) = consumer.recv().await {
        count += 1;
        tracing::info!(from = %rpc.from, bytes = rpc.payload.len(), "Received message");
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot;

    fn test_config() -> NodeConfig {
        NodeConfig {
            listen_addr: "127.0.0.1:0".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_node_consumes_until_shutdown() {
        let node = Node::new(test_config()).unwrap();
        let transport = node.transport().clone();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(node.run_until(async {
            let _ = stop_rx.await;
        }));

        let mut addr = None;
        for _ in 0..100 {
            addr = transport.local_addr().await;
            if addr.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let addr = addr.expect("node should be listening");

        let mut client = TcpStream::connect(addr).await.unwrap();
        dfs_p2p::write_frame(&mut client, b"stored chunk").await.unwrap();

        let mut delivered = false;
        for _ in 0..100 {
            let peers = transport.peers().await;
            if peers.first().is_some_and(|p| p.stats.messages_recv() == 1) {
                delivered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(delivered);

        stop_tx.send(()).unwrap();
        let consumed = handle.await.unwrap().unwrap();
        assert_eq!(consumed, 1);
    }

    #[tokio::test]
    async fn test_node_surfaces_bind_failure() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = NodeConfig {
            listen_addr: occupied.local_addr().unwrap().to_string(),
            ..Default::default()
        };

        let node = Node::new(config).unwrap();
        let result = node.run_until(async {}).await;
        assert!(result.is_err());
    }
}
