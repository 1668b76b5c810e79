//! Distributed file storage node library.
//!
//! Provides the components used by the `dfs-node` binary: argument parsing,
//! configuration, shutdown handling and the node that wires the transport
//! to its message consumer.

pub mod cli;
pub mod config;
pub mod node;
pub mod shutdown;
