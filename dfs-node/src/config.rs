//! Node configuration.

use std::time::Duration;

use dfs_p2p::config::{DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_MAX_TRANSIENT_DECODE_ERRORS, DEFAULT_RPC_BUFFER};
use dfs_p2p::{
    LengthPrefixedDecoder, NopHandshake, StreamDecoder, TcpTransportOpts, VersionHandshake,
    MAX_FRAME_SIZE,
};

use crate::cli::{Cli, DecoderKind, HandshakeKind};

/// Complete node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// P2P listen address.
    pub listen_addr: String,

    /// Frame decoder.
    pub decoder: DecoderKind,

    /// Connection handshake.
    pub handshake: HandshakeKind,

    /// Handshake timeout.
    pub handshake_timeout: Duration,

    /// Capacity of the inbound message channel.
    pub rpc_buffer: usize,

    /// Largest accepted frame payload.
    pub max_frame_size: usize,

    /// Consecutive malformed frames before a peer is dropped.
    pub max_malformed_frames: usize,

    /// Log level.
    pub log_level: String,
}

impl NodeConfig {
    /// Create a node configuration from CLI arguments.
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            listen_addr: cli.listen.clone(),
            decoder: cli.decoder,
            handshake: cli.handshake,
            handshake_timeout: Duration::from_secs(cli.handshake_timeout_secs),
            rpc_buffer: cli.rpc_buffer,
            max_frame_size: cli.max_frame_size,
            max_malformed_frames: cli.max_malformed_frames,
            log_level: cli.log_level.clone(),
        }
    }

    /// Build transport options from node config.
    pub fn transport_opts(&self) -> TcpTransportOpts {
        let opts = TcpTransportOpts::new(self.listen_addr.clone())
            .with_handshake_timeout(self.handshake_timeout)
            .with_rpc_buffer(self.rpc_buffer)
            .with_max_transient_decode_errors(self.max_malformed_frames);

        let opts = match self.decoder {
            DecoderKind::Length => opts.with_decoder(LengthPrefixedDecoder::new(self.max_frame_size)),
            DecoderKind::Stream => opts.with_decoder(StreamDecoder::default()),
        };

        match self.handshake {
            HandshakeKind::None => opts.with_handshake(NopHandshake),
            HandshakeKind::Version => opts.with_handshake(VersionHandshake::default()),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: ":3000".to_string(),
            decoder: DecoderKind::Length,
            handshake: HandshakeKind::None,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            rpc_buffer: DEFAULT_RPC_BUFFER,
            max_frame_size: MAX_FRAME_SIZE,
            max_malformed_frames: DEFAULT_MAX_TRANSIENT_DECODE_ERRORS,
            log_level: "info".to_string(),
        }
    }
}
