//! Transport configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{TransportError, TransportResult};
use crate::protocol::{Decoder, Handshake};

/// Network magic bytes exchanged by the version handshake.
pub const NETWORK_MAGIC: [u8; 4] = [0x44, 0x46, 0x53, 0x31]; // "DFS1"

/// Current protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum frame payload accepted by the length-prefixed decoder (1 MB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Default listen address.
pub const DEFAULT_LISTEN_ADDR: &str = ":3000";

/// Default handshake timeout.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default capacity of the shared RPC channel.
pub const DEFAULT_RPC_BUFFER: usize = 64;

/// Consecutive transient decode errors tolerated before a peer is dropped.
pub const DEFAULT_MAX_TRANSIENT_DECODE_ERRORS: usize = 16;

/// Default time `close()` waits for connection tasks to finish.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Construction-time options for a [`TcpTransport`](crate::TcpTransport).
#[derive(Clone)]
pub struct TcpTransportOpts {
    /// Address to listen on. A leading `:` (e.g. `":3000"`) means all interfaces.
    pub listen_addr: String,

    /// Strategy that frames messages off each connection.
    pub decoder: Option<Arc<dyn Decoder>>,

    /// Strategy run once per connection before decoding starts.
    pub handshake: Option<Arc<dyn Handshake>>,

    /// Timeout for completing the handshake.
    pub handshake_timeout: Duration,

    /// Capacity of the shared RPC channel.
    pub rpc_buffer: usize,

    /// Consecutive transient decode errors before the peer is disconnected.
    pub max_transient_decode_errors: usize,

    /// Upper bound on how long `close()` waits for connection tasks.
    pub shutdown_timeout: Duration,

    /// Set `TCP_NODELAY` on accepted connections.
    pub nodelay: bool,
}

impl Default for TcpTransportOpts {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            decoder: None,
            handshake: None,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            rpc_buffer: DEFAULT_RPC_BUFFER,
            max_transient_decode_errors: DEFAULT_MAX_TRANSIENT_DECODE_ERRORS,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            nodelay: true,
        }
    }
}

impl fmt::Debug for TcpTransportOpts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransportOpts")
            .field("listen_addr", &self.listen_addr)
            .field("decoder", &self.decoder.is_some())
            .field("handshake", &self.handshake.is_some())
            .field("handshake_timeout", &self.handshake_timeout)
            .field("rpc_buffer", &self.rpc_buffer)
            .field("max_transient_decode_errors", &self.max_transient_decode_errors)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("nodelay", &self.nodelay)
            .finish()
    }
}

impl TcpTransportOpts {
    /// Create options listening on the given address.
    pub fn new(listen_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            ..Default::default()
        }
    }

    /// Set the decoder.
    pub fn with_decoder(mut self, decoder: impl Decoder) -> Self {
        self.decoder = Some(Arc::new(decoder));
        self
    }

    /// Set the handshake.
    pub fn with_handshake(mut self, handshake: impl Handshake) -> Self {
        self.handshake = Some(Arc::new(handshake));
        self
    }

    /// Set the handshake timeout.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the RPC channel capacity (at least 1).
    pub fn with_rpc_buffer(mut self, capacity: usize) -> Self {
        self.rpc_buffer = capacity.max(1);
        self
    }

    /// Set how many consecutive transient decode errors are tolerated.
    pub fn with_max_transient_decode_errors(mut self, count: usize) -> Self {
        self.max_transient_decode_errors = count;
        self
    }

    /// Set the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Enable or disable `TCP_NODELAY`.
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// The address actually handed to the OS.
    ///
    /// `":3000"` becomes `"0.0.0.0:3000"`; anything else is passed through.
    pub fn bind_addr(&self) -> String {
        match self.listen_addr.strip_prefix(':') {
            Some(port) => format!("0.0.0.0:{port}"),
            None => self.listen_addr.clone(),
        }
    }

    /// Check that both strategies are present.
    pub(crate) fn strategies(&self) -> TransportResult<(Arc<dyn Decoder>, Arc<dyn Handshake>)> {
        let decoder = self.decoder.clone().ok_or(TransportError::MissingDecoder)?;
        let handshake = self.handshake.clone().ok_or(TransportError::MissingHandshake)?;
        Ok((decoder, handshake))
    }
}
