//! Per-connection tasks.
//!
//! Each accepted connection gets a [`Session`], a read loop on the task
//! that accepted it and a writer task. The read loop feeds frames to the
//! session in arrival order; the writer drains the session's [`Outbound`]
//! channel into the socket. Both stop when the session is cancelled.

use std::sync::Arc;

use blockwire_protocol::BroadcastCache;
use blockwire_session::{
    Outbound, Session, SessionConfig, SessionProtocol, SessionSet,
};
use blockwire_transport::{
    Connection, FrameError, FrameReader, FrameWriter, TcpConnection, decompress,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

/// Everything a connection task shares with the rest of the server.
#[derive(Clone)]
pub(crate) struct ConnectionShared {
    pub(crate) protocol: Arc<SessionProtocol>,
    pub(crate) cache: Arc<BroadcastCache>,
    pub(crate) sessions: Arc<SessionSet>,
    pub(crate) session_config: SessionConfig,
}

/// Runs one connection from accept to close.
pub(crate) async fn handle_connection(conn: TcpConnection, shared: ConnectionShared) {
    let (session, outbound) = Session::new(
        conn.id(),
        conn.peer_addr(),
        shared.session_config,
        shared.protocol,
        shared.cache,
    );
    shared.sessions.insert(Arc::clone(&session));

    let (reader, writer) = conn.into_framed();
    let writer_task = tokio::spawn(write_loop(writer, outbound, Arc::clone(&session)));

    read_loop(reader, &session, session.cancellation()).await;

    // No-op if a handler or the writer already closed it.
    session.close();
    if let Err(e) = writer_task.await {
        tracing::debug!(session = %session.id(), error = %e, "writer task failed");
    }
}

async fn read_loop(
    mut reader: FrameReader,
    session: &Arc<Session>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return,
            frame = reader.next() => frame,
        };

        let frame = match frame {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                tracing::debug!(session = %session.id(), error = %e, "bad frame");
                return;
            }
            None => {
                tracing::debug!(session = %session.id(), "peer closed the connection");
                return;
            }
        };

        // Compression may have been switched on since the last frame.
        let body = match decompress(session.compression_threshold(), frame) {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!(session = %session.id(), error = %e, "bad compressed frame");
                return;
            }
        };

        if session.receive_frame(body.freeze()).is_err() {
            return;
        }
    }
}

async fn write_loop(
    mut writer: FrameWriter,
    mut outbound: UnboundedReceiver<Outbound>,
    session: Arc<Session>,
) {
    while let Some(item) = outbound.recv().await {
        let fed = match item {
            Outbound::Packet(packet) => writer.feed(packet).await,
            Outbound::Compression(threshold) => {
                writer.encoder_mut().set_threshold(threshold);
                Ok(())
            }
            Outbound::Close => {
                if let Err(e) = writer.close().await {
                    tracing::debug!(session = %session.id(), error = %e, "close failed");
                }
                return;
            }
        };

        let result = match fed {
            Ok(()) => flush_if_idle(&mut writer, &outbound).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::debug!(session = %session.id(), error = %e, "write failed");
            session.close();
            return;
        }
    }
}

/// Flushes once the queue is drained, so a burst goes out in one write.
async fn flush_if_idle(
    writer: &mut FrameWriter,
    outbound: &UnboundedReceiver<Outbound>,
) -> Result<(), FrameError> {
    if outbound.is_empty() {
        writer.flush().await?;
    }
    Ok(())
}
