//! Consumer side of the fan-in channel.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::protocol::Rpc;

/// Handle on a transport's single outbound stream of messages.
///
/// Clones share the same channel; concurrent readers each take the next
/// available message. [`recv`](Consumer::recv) yields `None` once the
/// transport is closed and every connection task has exited.
#[derive(Debug, Clone)]
pub struct Consumer {
    rx: Arc<Mutex<mpsc::Receiver<Rpc>>>,
}

impl Consumer {
    pub(crate) fn new(rx: mpsc::Receiver<Rpc>) -> Self {
        Self {
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Wait for the next message.
    pub async fn recv(&self) -> Option<Rpc> {
        self.rx.lock().await.recv().await
    }

    /// Take a message if one is ready and no other reader is waiting.
    pub fn try_recv(&self) -> Option<Rpc> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }
}
