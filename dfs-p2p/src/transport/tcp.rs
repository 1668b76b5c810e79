//! TCP transport.
//!
//! One task accepts connections; every accepted connection gets its own task
//! running the handshake and then the read loop:
//!
//! ```text
//! TcpTransport::listen_and_accept()
//! ├── Accept Task (accept loop)
//! ├── Peer Task 1 (handshake, then decode → channel)
//! ├── Peer Task 2 (handshake, then decode → channel)
//! └── ...
//!                   all peers ──► mpsc::Sender<Rpc> ──► Consumer
//! ```
//!
//! Shutdown is driven by a root [`CancellationToken`]; each peer task watches
//! a child token, so both `close()` and per-peer disconnects unblock any
//! pending accept, handshake, decode or channel send.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::TcpTransportOpts;
use crate::error::{HandshakeError, TransportError, TransportResult};
use crate::peer::{ConnectionDirection, Peer, PeerId, PeerInfo, PeerRegistry, TcpPeer};
use crate::protocol::{Decoder, Handshake, Rpc};
use crate::transport::{Consumer, Transport};

/// First backoff after a transient accept error.
const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(5);

/// Backoff ceiling for repeated accept errors.
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// System-wide file table full.
#[cfg(unix)]
const ENFILE: i32 = 23;

/// Per-process descriptor limit reached.
#[cfg(unix)]
const EMFILE: i32 = 24;

/// Lifecycle of the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListenState {
    /// Never listened.
    Idle,
    /// Accept loop running.
    Listening { local_addr: SocketAddr },
    /// Accept loop exited on a fatal error; may listen again.
    Stopped,
    /// `close()` was called; terminal.
    Closed,
}

/// Why a peer task ended.
#[derive(Debug)]
enum Disconnect {
    /// Handshake failure or fatal decode error.
    Error(TransportError),
    Misbehaving { errors: usize },
    ConsumerGone,
    Shutdown,
}

impl fmt::Display for Disconnect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disconnect::Error(e) => write!(f, "{e}"),
            Disconnect::Misbehaving { errors } => {
                write!(f, "{errors} consecutive malformed frames")
            }
            Disconnect::ConsumerGone => write!(f, "consumer channel closed"),
            Disconnect::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// State shared with the accept and peer tasks.
struct Shared {
    opts: TcpTransportOpts,
    decoder: Arc<dyn Decoder>,
    handshake: Arc<dyn Handshake>,
    peers: PeerRegistry,
    state: Mutex<ListenState>,
    next_peer_id: AtomicU64,
}

impl Shared {
    fn next_peer_id(&self) -> PeerId {
        PeerId::new(self.next_peer_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// State owned by the transport handles. Dropping the last handle stops all tasks.
struct Inner {
    shared: Arc<Shared>,
    rpc_tx: Mutex<Option<mpsc::Sender<Rpc>>>,
    consumer: Consumer,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Transport accepting peers over TCP.
///
/// Cheap to clone; clones control the same listener, registry and channel.
#[derive(Clone)]
pub struct TcpTransport {
    inner: Arc<Inner>,
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransport")
            .field("opts", &self.inner.shared.opts)
            .finish_non_exhaustive()
    }
}

impl TcpTransport {
    /// Create a transport. Fails if the decoder or handshake is missing.
    pub fn new(opts: TcpTransportOpts) -> TransportResult<Self> {
        let (decoder, handshake) = opts.strategies()?;
        let (rpc_tx, rpc_rx) = mpsc::channel(opts.rpc_buffer.max(1));

        let shared = Arc::new(Shared {
            opts,
            decoder,
            handshake,
            peers: PeerRegistry::new(),
            state: Mutex::new(ListenState::Idle),
            next_peer_id: AtomicU64::new(1),
        });

        Ok(Self {
            inner: Arc::new(Inner {
                shared,
                rpc_tx: Mutex::new(Some(rpc_tx)),
                consumer: Consumer::new(rpc_rx),
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        })
    }

    /// Address the listener is bound to, while listening.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        match *self.inner.shared.state.lock().await {
            ListenState::Listening { local_addr } => Some(local_addr),
            _ => None,
        }
    }

    /// Whether the accept loop is running.
    pub async fn is_listening(&self) -> bool {
        self.local_addr().await.is_some()
    }

    /// Number of registered peers.
    pub async fn peer_count(&self) -> usize {
        self.inner.shared.peers.len().await
    }

    /// Snapshot of registered peers, ordered by peer ID.
    pub async fn peers(&self) -> Vec<PeerInfo> {
        self.inner.shared.peers.snapshot().await
    }

    /// Disconnect the peer at `addr`. Returns false if no such peer is registered.
    pub async fn disconnect(&self, addr: &SocketAddr) -> bool {
        self.inner.shared.peers.disconnect(addr).await
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn listen_and_accept(&self) -> TransportResult<()> {
        let shared = &self.inner.shared;
        let mut state = shared.state.lock().await;
        match *state {
            ListenState::Closed => return Err(TransportError::Closed),
            ListenState::Listening { local_addr } => {
                return Err(TransportError::AlreadyListening { addr: local_addr })
            }
            ListenState::Idle | ListenState::Stopped => {}
        }

        let rpc_tx = self
            .inner
            .rpc_tx
            .lock()
            .await
            .clone()
            .ok_or(TransportError::Closed)?;

        let bind_addr = shared.opts.bind_addr();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: bind_addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        *state = ListenState::Listening { local_addr };
        drop(state);

        tracing::info!(addr = %local_addr, "Listening for inbound connections");

        self.inner.tracker.spawn(accept_loop(
            shared.clone(),
            listener,
            rpc_tx,
            self.inner.shutdown.clone(),
            self.inner.tracker.clone(),
        ));

        Ok(())
    }

    fn consume(&self) -> Consumer {
        self.inner.consumer.clone()
    }

    async fn close(&self) -> TransportResult<()> {
        {
            let mut state = self.inner.shared.state.lock().await;
            if *state == ListenState::Closed {
                return Ok(());
            }
            *state = ListenState::Closed;
        }

        // Tasks hold the remaining senders; the consumer sees `None` once they exit
        self.inner.rpc_tx.lock().await.take();

        self.inner.shutdown.cancel();
        let signalled = self.inner.shared.peers.close_all().await;
        tracing::info!(peers = signalled, "Transport closing");

        self.inner.tracker.close();
        let wait = timeout(self.inner.shared.opts.shutdown_timeout, self.inner.tracker.wait());
        if wait.await.is_err() {
            tracing::warn!(
                remaining = self.inner.tracker.len(),
                "Timed out waiting for connection tasks"
            );
        }

        Ok(())
    }
}

/// Accept connections until shutdown or a fatal listener error.
async fn accept_loop(
    shared: Arc<Shared>,
    listener: TcpListener,
    rpc_tx: mpsc::Sender<Rpc>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
) {
    let mut backoff = ACCEPT_BACKOFF_MIN;

    loop {
        let result = tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::debug!("Accept loop shutting down");
                break;
            }
            result = listener.accept() => result,
        };

        match result {
            Ok((stream, addr)) => {
                backoff = ACCEPT_BACKOFF_MIN;
                let peer_id = shared.next_peer_id();
                tracing::debug!(addr = %addr, peer = %peer_id, "Accepted inbound connection");

                tracker.spawn(handle_conn(
                    shared.clone(),
                    stream,
                    addr,
                    peer_id,
                    rpc_tx.clone(),
                    shutdown.child_token(),
                ));
            }
            Err(e) => match on_accept_error(&e, &mut backoff) {
                ControlFlow::Continue(delay) => {
                    let err = TransportError::Accept(e);
                    tracing::warn!(error = %err, backoff = ?delay, "Error accepting connection");

                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = sleep(delay) => {}
                    }
                }
                ControlFlow::Break(()) => {
                    tracing::error!(error = %e, "Listener failed, accept loop stopped");
                    mark_stopped(&shared).await;
                    break;
                }
            },
        }
    }
}

/// Decide whether the accept loop survives `e`.
///
/// Transient errors continue after the returned delay and double `backoff`
/// up to [`ACCEPT_BACKOFF_MAX`]. Anything else stops the loop.
fn on_accept_error(e: &io::Error, backoff: &mut Duration) -> ControlFlow<(), Duration> {
    if !is_transient_accept_error(e) {
        return ControlFlow::Break(());
    }
    let delay = *backoff;
    *backoff = (delay * 2).min(ACCEPT_BACKOFF_MAX);
    ControlFlow::Continue(delay)
}

/// The accept loop exited on its own; `listen_and_accept` may be called again.
async fn mark_stopped(shared: &Shared) {
    let mut state = shared.state.lock().await;
    if matches!(*state, ListenState::Listening { .. }) {
        *state = ListenState::Stopped;
    }
}

/// Errors after which the listener is still usable.
fn is_transient_accept_error(e: &io::Error) -> bool {
    if matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    ) {
        return true;
    }

    // Clears as connections close
    #[cfg(unix)]
    if matches!(e.raw_os_error(), Some(ENFILE) | Some(EMFILE)) {
        return true;
    }

    false
}

/// Drive one accepted connection from registration to removal.
async fn handle_conn(
    shared: Arc<Shared>,
    stream: TcpStream,
    addr: SocketAddr,
    peer_id: PeerId,
    rpc_tx: mpsc::Sender<Rpc>,
    cancel: CancellationToken,
) {
    if shared.opts.nodelay {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(addr = %addr, error = %e, "Failed to set TCP_NODELAY");
        }
    }

    let mut peer = TcpPeer::new(peer_id, stream, addr, ConnectionDirection::Inbound);

    if let Err(e) = shared.peers.register(peer.info().clone(), cancel.clone()).await {
        tracing::warn!(peer = %peer_id, addr = %addr, error = %e, "Refusing connection");
        close_peer(&mut peer).await;
        return;
    }

    let reason = run_peer(&shared, &mut peer, &cancel, &rpc_tx).await;

    close_peer(&mut peer).await;
    shared.peers.remove(&addr, peer_id).await;

    tracing::debug!(
        peer = %peer_id,
        addr = %addr,
        reason = %reason,
        messages = peer.info().stats.messages_recv(),
        connected_for = ?peer.info().connection_duration(),
        "Peer disconnected"
    );
}

/// Handshake, then decode frames into the channel until something ends the connection.
async fn run_peer(
    shared: &Shared,
    peer: &mut TcpPeer,
    cancel: &CancellationToken,
    rpc_tx: &mpsc::Sender<Rpc>,
) -> Disconnect {
    let peer_id = peer.info().id;
    let addr = peer.remote_addr();

    let handshake = tokio::select! {
        _ = cancel.cancelled() => Err(HandshakeError::Shutdown),
        result = timeout(shared.opts.handshake_timeout, shared.handshake.handshake(&mut *peer)) => {
            result.unwrap_or(Err(HandshakeError::Timeout))
        }
    };
    if let Err(e) = handshake {
        tracing::warn!(peer = %peer_id, addr = %addr, error = %e, "Handshake failed");
        return Disconnect::Error(e.into());
    }
    tracing::debug!(peer = %peer_id, addr = %addr, "Handshake complete");

    let mut malformed = 0usize;

    loop {
        let mut rpc = Rpc::empty(addr);
        let decoded = tokio::select! {
            _ = cancel.cancelled() => return Disconnect::Shutdown,
            result = shared.decoder.decode(&mut *peer, &mut rpc) => result,
        };

        match decoded {
            Ok(()) => {
                malformed = 0;
                rpc.from = addr;
                let len = rpc.payload.len();

                tokio::select! {
                    _ = cancel.cancelled() => return Disconnect::Shutdown,
                    sent = rpc_tx.send(rpc) => {
                        if sent.is_err() {
                            return Disconnect::ConsumerGone;
                        }
                    }
                }
                peer.info().stats.record_recv(len);
            }
            Err(e) if e.is_fatal() => return Disconnect::Error(e.into()),
            Err(e) => {
                malformed += 1;
                peer.info().stats.record_decode_error();
                tracing::warn!(peer = %peer_id, addr = %addr, error = %e, "Dropping malformed frame");

                if malformed > shared.opts.max_transient_decode_errors {
                    return Disconnect::Misbehaving { errors: malformed };
                }
            }
        }
    }
}

async fn close_peer(peer: &mut TcpPeer) {
    if let Err(e) = peer.close().await {
        // Usually the remote side is already gone
        tracing::trace!(addr = %peer.remote_addr(), error = %e, "Error closing connection");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;
    use crate::protocol::{LengthPrefixedDecoder, NopHandshake};

    fn test_opts() -> TcpTransportOpts {
        TcpTransportOpts::new("127.0.0.1:0")
            .with_decoder(LengthPrefixedDecoder::default())
            .with_handshake(NopHandshake)
    }

    #[test]
    fn test_transient_accept_errors() {
        assert!(is_transient_accept_error(&io::Error::from(io::ErrorKind::ConnectionAborted)));
        assert!(is_transient_accept_error(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(!is_transient_accept_error(&io::Error::from(io::ErrorKind::InvalidInput)));

        #[cfg(unix)]
        {
            assert!(is_transient_accept_error(&io::Error::from_raw_os_error(EMFILE)));
            assert!(is_transient_accept_error(&io::Error::from_raw_os_error(ENFILE)));
        }
    }

    #[test]
    fn test_accept_backoff_doubles_and_caps() {
        let aborted = io::Error::from(io::ErrorKind::ConnectionAborted);
        let mut backoff = ACCEPT_BACKOFF_MIN;

        assert_eq!(
            on_accept_error(&aborted, &mut backoff),
            ControlFlow::Continue(ACCEPT_BACKOFF_MIN)
        );
        assert_eq!(backoff, ACCEPT_BACKOFF_MIN * 2);

        assert_eq!(
            on_accept_error(&aborted, &mut backoff),
            ControlFlow::Continue(ACCEPT_BACKOFF_MIN * 2)
        );
        assert_eq!(backoff, ACCEPT_BACKOFF_MIN * 4);

        for _ in 0..16 {
            assert!(on_accept_error(&aborted, &mut backoff).is_continue());
        }
        assert_eq!(backoff, ACCEPT_BACKOFF_MAX);
        assert_eq!(
            on_accept_error(&aborted, &mut backoff),
            ControlFlow::Continue(ACCEPT_BACKOFF_MAX)
        );
        assert_eq!(backoff, ACCEPT_BACKOFF_MAX);
    }

    #[test]
    fn test_fatal_accept_error_stops_loop() {
        let fatal = io::Error::from(io::ErrorKind::InvalidInput);
        let mut backoff = ACCEPT_BACKOFF_MIN * 8;

        assert_eq!(on_accept_error(&fatal, &mut backoff), ControlFlow::Break(()));
        assert_eq!(backoff, ACCEPT_BACKOFF_MIN * 8);
    }

    #[tokio::test]
    async fn test_listen_again_after_listener_failure() {
        let transport = TcpTransport::new(test_opts()).unwrap();
        transport.listen_and_accept().await.unwrap();
        assert!(transport.is_listening().await);

        mark_stopped(&transport.inner.shared).await;
        assert!(!transport.is_listening().await);
        assert_eq!(*transport.inner.shared.state.lock().await, ListenState::Stopped);

        transport.listen_and_accept().await.unwrap();
        let addr = transport.local_addr().await.expect("listening again");

        let consumer = transport.consume();
        let mut client = TcpStream::connect(addr).await.unwrap();
        crate::protocol::write_frame(&mut client, b"after restart").await.unwrap();
        let rpc = timeout(Duration::from_secs(5), consumer.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&rpc.payload[..], b"after restart");

        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_listener_failure_after_close_stays_closed() {
        let transport = TcpTransport::new(test_opts()).unwrap();
        transport.listen_and_accept().await.unwrap();
        transport.close().await.unwrap();

        mark_stopped(&transport.inner.shared).await;
        assert_eq!(*transport.inner.shared.state.lock().await, ListenState::Closed);
        assert!(matches!(transport.listen_and_accept().await, Err(TransportError::Closed)));
    }

    #[test]
    fn test_new_requires_strategies() {
        let opts = TcpTransportOpts::new("127.0.0.1:0").with_handshake(NopHandshake);
        assert!(matches!(TcpTransport::new(opts), Err(TransportError::MissingDecoder)));

        let opts = TcpTransportOpts::new("127.0.0.1:0").with_decoder(LengthPrefixedDecoder::default());
        assert!(matches!(TcpTransport::new(opts), Err(TransportError::MissingHandshake)));
    }

    #[tokio::test]
    async fn test_listen_state_transitions() {
        let transport = TcpTransport::new(test_opts()).unwrap();
        assert!(transport.local_addr().await.is_none());

        transport.listen_and_accept().await.unwrap();
        let addr = transport.local_addr().await.unwrap();
        assert_ne!(addr.port(), 0);

        let err = transport.listen_and_accept().await.unwrap_err();
        assert!(matches!(err, TransportError::AlreadyListening { addr: a } if a == addr));

        transport.close().await.unwrap();
        assert!(!transport.is_listening().await);
        assert!(matches!(transport.listen_and_accept().await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let transport = TcpTransport::new(test_opts()).unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert!(transport.consume().recv().await.is_none());
    }

    #[test]
    fn test_disconnect_display() {
        let reason = Disconnect::Misbehaving { errors: 3 };
        assert_eq!(reason.to_string(), "3 consecutive malformed frames");
        assert_eq!(
            Disconnect::Error(DecodeError::ConnectionClosed.into()).to_string(),
            "Decode error: Connection closed by peer"
        );
    }
}
