//! Command-line argument parsing.

use clap::{Parser, ValueEnum};

use dfs_p2p::config::{
    DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_MAX_TRANSIENT_DECODE_ERRORS, DEFAULT_RPC_BUFFER,
};
use dfs_p2p::MAX_FRAME_SIZE;

/// Frame decoder selection.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderKind {
    /// 4-byte big-endian length prefix, then payload.
    Length,
    /// Every socket read is one message.
    Stream,
}

/// Handshake selection.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeKind {
    /// Accept every connection.
    None,
    /// Exchange network magic and protocol version.
    Version,
}

/// Distributed file storage node.
#[derive(Parser, Debug, Clone)]
#[command(name = "dfs-node")]
#[command(about = "Distributed file storage node")]
#[command(version)]
pub struct Cli {
    /// P2P listen address (":3000" listens on all interfaces).
    #[arg(long, default_value = ":3000")]
    pub listen: String,

    /// Frame decoder.
    #[arg(long, value_enum, default_value_t = DecoderKind::Length)]
    pub decoder: DecoderKind,

    /// Connection handshake.
    #[arg(long, value_enum, default_value_t = HandshakeKind::None)]
    pub handshake: HandshakeKind,

    /// Handshake timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_HANDSHAKE_TIMEOUT.as_secs())]
    pub handshake_timeout_secs: u64,

    /// Capacity of the inbound message channel.
    #[arg(long, default_value_t = DEFAULT_RPC_BUFFER)]
    pub rpc_buffer: usize,

    /// Largest accepted frame payload in bytes.
    #[arg(long, default_value_t = MAX_FRAME_SIZE)]
    pub max_frame_size: usize,

    /// Consecutive malformed frames before a peer is dropped.
    #[arg(long, default_value_t = DEFAULT_MAX_TRANSIENT_DECODE_ERRORS)]
    pub max_malformed_frames: usize,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let cli = Cli::parse_from(["dfs-node"]);
        assert_eq!(cli.listen, ":3000");
        assert_eq!(cli.decoder, DecoderKind::Length);
        assert_eq!(cli.handshake, HandshakeKind::None);
        assert_eq!(cli.handshake_timeout_secs, DEFAULT_HANDSHAKE_TIMEOUT.as_secs());
        assert_eq!(cli.rpc_buffer, DEFAULT_RPC_BUFFER);
        assert_eq!(cli.max_frame_size, MAX_FRAME_SIZE);
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_strategy_flags() {
        let cli = Cli::parse_from([
            "dfs-node",
            "--listen",
            "127.0.0.1:4000",
            "--decoder",
            "stream",
            "--handshake",
            "version",
        ]);
        assert_eq!(cli.listen, "127.0.0.1:4000");
        assert_eq!(cli.decoder, DecoderKind::Stream);
        assert_eq!(cli.handshake, HandshakeKind::Version);
    }

    #[test]
    fn test_rejects_unknown_decoder() {
        assert!(Cli::try_parse_from(["dfs-node", "--decoder", "xml"]).is_err());
    }
}
