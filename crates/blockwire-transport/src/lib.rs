//! Wire layer for Blockwire.
//!
//! - [`varint`]: `VarInt` / `VarLong` primitives.
//! - [`frame`]: length-prefixed framing with optional zlib compression,
//!   exposed as a `tokio_util` codec.
//! - [`TcpTransport`]: accepts client connections and hands out framed
//!   read/write halves.

#![allow(async_fn_in_trait)]

mod error;
pub mod frame;
mod tcp;
pub mod varint;

pub use error::{FrameError, TransportError};
pub use frame::{FrameCodec, MAX_FRAME_LEN, MAX_UNCOMPRESSED_LEN, decompress};
pub use tcp::{FrameReader, FrameWriter, TcpConnection, TcpTransport};
pub use varint::VarIntError;

use std::fmt;
use std::net::SocketAddr;

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming connection.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;

    /// Stops handing out new connections.
    async fn shutdown(&self) -> Result<(), Self::Error>;
}

/// An accepted connection.
pub trait Connection: Send + Sync + 'static {
    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;

    /// Returns the remote address of the peer.
    fn peer_addr(&self) -> SocketAddr;
}
