//! Transport protocol layer.
//!
//! This module contains:
//! - The message record handed to consumers
//! - Pluggable frame decoders
//! - Pluggable connection handshakes

pub mod framing;
pub mod handshake;
pub mod messages;
pub mod version;

// Re-export main types
pub use framing::{encode_frame, write_frame, Decoder, LengthPrefixedDecoder, StreamDecoder};
pub use handshake::{handshake_fn, FnHandshake, Handshake, NopHandshake};
pub use messages::Rpc;
pub use version::VersionHandshake;
