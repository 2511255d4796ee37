//! TCP transport: a listener plus framed read/write halves per connection.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::frame::FrameCodec;
use crate::{Connection, ConnectionId, Transport, TransportError};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Read half of a connection, yielding decoded frame bodies.
pub type FrameReader = FramedRead<OwnedReadHalf, FrameCodec>;

/// Write half of a connection, accepting encoded packet bodies.
pub type FrameWriter = FramedWrite<OwnedWriteHalf, FrameCodec>;

/// A TCP [`Transport`] that listens for incoming game clients.
pub struct TcpTransport {
    listener: TcpListener,
    shut_down: AtomicBool,
}

impl TcpTransport {
    /// Binds a new TCP transport to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::BindFailed)?;
        tracing::info!(addr, "TCP transport listening");
        Ok(Self {
            listener,
            shut_down: AtomicBool::new(false),
        })
    }

    /// Returns the address the listener is bound to.
    ///
    /// Useful after binding to port 0.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.listener
            .local_addr()
            .map_err(TransportError::BindFailed)
    }
}

impl Transport for TcpTransport {
    type Connection = TcpConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(TransportError::Shutdown);
        }

        let (stream, peer_addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        // Packets are small and latency-sensitive.
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer_addr, error = %e, "failed to set TCP_NODELAY");
        }

        let id = ConnectionId::new(
            NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
        );
        tracing::debug!(%id, %peer_addr, "accepted TCP connection");

        Ok(TcpConnection {
            id,
            peer_addr,
            stream,
        })
    }

    async fn shutdown(&self) -> Result<(), Self::Error> {
        self.shut_down.store(true, Ordering::Release);
        Ok(())
    }
}

/// A single accepted TCP connection, not yet split.
pub struct TcpConnection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    stream: TcpStream,
}

impl TcpConnection {
    /// Splits the stream into a frame reader and a frame writer.
    ///
    /// Both halves start with compression disabled.
    pub fn into_framed(self) -> (FrameReader, FrameWriter) {
        let (read, write) = self.stream.into_split();
        (
            FramedRead::new(read, FrameCodec::new()),
            FramedWrite::new(write, FrameCodec::new()),
        )
    }
}

impl Connection for TcpConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}
