//! One [`Session`] per client connection.
//!
//! A session is shared between three parties: the connection's read task
//! (which feeds it frames), its write task (which drains the [`Outbound`]
//! channel), and the tick loop (which calls [`Session::pulse`]). Anything
//! else may call [`Session::send`] or [`Session::disconnect`] from any
//! thread.
//!
//! # Ordering
//!
//! Outbound messages are processed and encoded on the caller's thread,
//! outside any lock, using the protocol state current at that moment. The
//! encoded packets are then appended to an outbox under one short-lived
//! mutex. `pulse` forwards the outbox to the writer under the same mutex,
//! so packets reach the socket in the order their appends happened.
//!
//! The protocol state is readable without the outbox lock but only changes
//! while it is held. An append whose state moved during encoding encodes
//! again in the new state.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use blockwire_protocol::message::{Disconnect, KeepAlive};
use blockwire_protocol::{
    BroadcastCache, CachedOutput, CodecContext, Direction, Dispatch, Handler, Message,
    ProtocolBuilder, ProtocolError, ProtocolState, ProtocolTable,
};
use blockwire_transport::ConnectionId;
use bytes::Bytes;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::SessionError;
use crate::manager::SessionSet;

/// Protocol table whose handlers receive sessions.
pub type SessionProtocol = ProtocolTable<Arc<Session>>;

/// Builder for a [`SessionProtocol`].
pub type SessionProtocolBuilder = ProtocolBuilder<Arc<Session>>;

/// Configuration for sessions.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Protocol version assumed until the client's handshake arrives.
    pub protocol_version: i32,

    /// How often a keep-alive is sent to PLAY sessions.
    pub keepalive_interval_secs: u64,

    /// How long a keep-alive may go unanswered before the session is
    /// disconnected with "Timed out".
    pub keepalive_timeout_secs: u64,
}

impl SessionConfig {
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    pub fn keepalive_timeout(&self) -> Duration {
        Duration::from_secs(self.keepalive_timeout_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            protocol_version: blockwire_protocol::PROTOCOL_VERSION,
            keepalive_interval_secs: 15,
            keepalive_timeout_secs: 30,
        }
    }
}

/// Work item for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// An encoded packet body (opcode + payload), not yet framed.
    Packet(Bytes),
    /// Switch the frame encoder to this threshold for every later packet.
    Compression(i32),
    /// Flush and shut the socket down.
    Close,
}

struct Outbox {
    queue: VecDeque<Outbound>,
    /// Threshold requested by the last `SetCompression` enqueued.
    compression: i32,
}

struct KeepAliveState {
    pending: Option<(i32, Instant)>,
    last_sent: Instant,
    latency: Duration,
}

type TickTask = (Arc<dyn Handler<Arc<Session>>>, Message);

/// One message of a send, ready to append.
enum Staged {
    Encoded(CachedOutput),
    /// A `SetCompression` with a negative threshold. Valid only while
    /// compression is still off, and never written.
    DisableCompression,
}

/// Server-side view of one client connection.
pub struct Session {
    id: ConnectionId,
    remote: SocketAddr,
    config: SessionConfig,
    protocol: Arc<SessionProtocol>,
    cache: Arc<BroadcastCache>,

    /// Index into [`ProtocolState::ALL`]. Written only under `outbox`.
    state: AtomicU8,
    outbox: Mutex<Outbox>,
    writer: mpsc::UnboundedSender<Outbound>,
    /// Threshold the writer has been told to use. Read by the frame
    /// decoder of the read task.
    compression_threshold: AtomicI32,

    tick_tasks: Mutex<Vec<TickTask>>,
    keep_alive: Mutex<KeepAliveState>,

    protocol_version: OnceCell<i32>,
    virtual_host: OnceCell<String>,
    player_name: OnceCell<String>,

    disconnected: AtomicBool,
    disconnect_reason: OnceCell<String>,
    cancel: CancellationToken,
    set: OnceCell<Weak<SessionSet>>,
}

impl Session {
    /// Creates a session in HANDSHAKE and the receiver its writer task
    /// should drain.
    pub fn new(
        id: ConnectionId,
        remote: SocketAddr,
        config: SessionConfig,
        protocol: Arc<SessionProtocol>,
        cache: Arc<BroadcastCache>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let (writer, rx) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            id,
            remote,
            config,
            protocol,
            cache,
            state: AtomicU8::new(ProtocolState::Handshake as u8),
            outbox: Mutex::new(Outbox {
                queue: VecDeque::new(),
                compression: -1,
            }),
            writer,
            compression_threshold: AtomicI32::new(-1),
            tick_tasks: Mutex::new(Vec::new()),
            keep_alive: Mutex::new(KeepAliveState {
                pending: None,
                last_sent: Instant::now(),
                latency: Duration::ZERO,
            }),
            protocol_version: OnceCell::new(),
            virtual_host: OnceCell::new(),
            player_name: OnceCell::new(),
            disconnected: AtomicBool::new(false),
            disconnect_reason: OnceCell::new(),
            cancel: CancellationToken::new(),
            set: OnceCell::new(),
        });
        tracing::debug!(session = %id, %remote, "session created");
        (session, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// Current protocol state. Never waits on a send in progress.
    pub fn protocol_state(&self) -> ProtocolState {
        ProtocolState::ALL[usize::from(self.state.load(Ordering::Acquire))]
    }

    /// Moves the session to `next`.
    ///
    /// Packets already sent keep the encoding of the old state; every
    /// `send` after this returns uses the new one.
    ///
    /// # Errors
    /// [`SessionError::IllegalTransition`] unless the move is
    /// HANDSHAKE → STATUS, HANDSHAKE → LOGIN, or LOGIN → PLAY.
    pub fn set_protocol_state(
        &self,
        next: ProtocolState,
    ) -> Result<(), SessionError> {
        let outbox = self.outbox.lock();
        let from = self.protocol_state();
        if !from.can_transition_to(next) {
            return Err(SessionError::IllegalTransition { from, to: next });
        }
        self.state.store(next as u8, Ordering::Release);
        drop(outbox);

        if next == ProtocolState::Play {
            let mut keep_alive = self.keep_alive.lock();
            keep_alive.pending = None;
            keep_alive.last_sent = Instant::now();
        }
        tracing::debug!(session = %self.id, %from, to = %next, "protocol state changed");
        Ok(())
    }

    /// Negotiated protocol version, or the server's own before the
    /// handshake.
    pub fn protocol_version(&self) -> i32 {
        self.protocol_version
            .get()
            .copied()
            .unwrap_or(self.config.protocol_version)
    }

    /// Records the client's protocol version. Write-once.
    pub fn set_protocol_version(&self, version: i32) -> Result<(), SessionError> {
        self.protocol_version
            .set(version)
            .map_err(|_| SessionError::AlreadySet("protocol version"))
    }

    /// Host name the client used to connect, if the handshake has arrived.
    pub fn virtual_host(&self) -> Option<&str> {
        self.virtual_host.get().map(String::as_str)
    }

    /// Records the handshake's server address. Write-once.
    pub fn set_virtual_host(&self, host: String) -> Result<(), SessionError> {
        self.virtual_host
            .set(host)
            .map_err(|_| SessionError::AlreadySet("virtual host"))
    }

    pub fn player_name(&self) -> Option<&str> {
        self.player_name.get().map(String::as_str)
    }

    /// Records the logged-in player's name. Write-once.
    pub fn set_player_name(&self, name: String) -> Result<(), SessionError> {
        self.player_name
            .set(name)
            .map_err(|_| SessionError::AlreadySet("player name"))
    }

    /// Compression threshold in effect on the socket, `-1` if disabled.
    pub fn compression_threshold(&self) -> i32 {
        self.compression_threshold.load(Ordering::Acquire)
    }

    /// Round-trip time measured by the last answered keep-alive.
    pub fn latency(&self) -> Duration {
        self.keep_alive.lock().latency
    }

    pub fn is_active(&self) -> bool {
        !self.disconnected.load(Ordering::Acquire)
    }

    /// Reason passed to [`disconnect`](Self::disconnect), once it has been
    /// called.
    pub fn disconnect_reason(&self) -> Option<&str> {
        self.disconnect_reason.get().map(String::as_str)
    }

    /// Token cancelled when the session closes. Connection tasks select on
    /// it.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Context for encoding or decoding in the current state.
    pub fn codec_context(&self) -> CodecContext {
        CodecContext::new(self.protocol_state(), self.protocol_version())
    }

    pub(crate) fn attach(&self, set: Weak<SessionSet>) {
        let _ = self.set.set(set);
    }

    // -----------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------

    /// Processes, encodes, and queues `message`. Never blocks on I/O.
    ///
    /// A `SetCompression` with a non-negative threshold also queues a
    /// compression switch right behind its packet. A negative threshold
    /// is ignored while compression is off.
    ///
    /// # Errors
    /// - [`SessionError::Closed`] after disconnect.
    /// - [`SessionError::CompressionLocked`] for a negative threshold once
    ///   compression is on.
    /// - [`SessionError::Protocol`] if a processor or codec fails. Nothing
    ///   is queued in that case and the session stays open.
    pub fn send(&self, message: impl Into<Message>) -> Result<(), SessionError> {
        self.send_all([message.into()])
    }

    /// Sends `messages` as one contiguous run: no packet from a concurrent
    /// `send` lands between them.
    ///
    /// Every message is processed and encoded before anything is queued.
    /// If any of them fails, none is queued.
    ///
    /// # Errors
    /// As for [`send`](Self::send).
    pub fn send_all<I>(&self, messages: I) -> Result<(), SessionError>
    where
        I: IntoIterator,
        I::Item: Into<Message>,
    {
        if !self.is_active() {
            return Err(SessionError::Closed);
        }
        let messages: Vec<Message> = messages.into_iter().map(Into::into).collect();

        // The state only moves forward, so this loops at most three times.
        loop {
            let state = self.protocol_state();
            let staged = self.stage(state, &messages)?;

            let mut outbox = self.outbox.lock();
            if !self.is_active() {
                return Err(SessionError::Closed);
            }
            if self.protocol_state() != state {
                continue;
            }
            return Self::append(&mut outbox, staged);
        }
    }

    /// Runs processors and codecs for `messages` in `state`. Takes no lock.
    fn stage(
        &self,
        state: ProtocolState,
        messages: &[Message],
    ) -> Result<Vec<Staged>, SessionError> {
        let ctx = CodecContext::new(state, self.protocol_version());
        let mut staged = Vec::with_capacity(messages.len());
        for message in messages {
            if let Message::SetCompression(set) = message {
                if set.threshold < 0 {
                    staged.push(Staged::DisableCompression);
                    continue;
                }
            }
            let output = self
                .protocol
                .process_outbound(&ctx, message, &self.cache)
                .inspect_err(|e| {
                    tracing::warn!(
                        session = %self.id,
                        kind = ?message.kind(),
                        error = %e,
                        "dropping outbound message"
                    );
                })?;
            staged.push(Staged::Encoded(output));
        }
        Ok(staged)
    }

    /// Appends a staged batch, or nothing if any part of it is rejected.
    fn append(outbox: &mut Outbox, staged: Vec<Staged>) -> Result<(), SessionError> {
        let mut compression = outbox.compression;
        for item in &staged {
            match item {
                Staged::DisableCompression if compression >= 0 => {
                    return Err(SessionError::CompressionLocked);
                }
                Staged::DisableCompression => {}
                Staged::Encoded(output) => {
                    if let Some(threshold) = enabled_threshold(&output.processed) {
                        compression = threshold;
                    }
                }
            }
        }

        for item in staged {
            let Staged::Encoded(output) = item else {
                continue;
            };
            for (processed, packet) in output.processed.iter().zip(output.encoded.iter()) {
                outbox.queue.push_back(Outbound::Packet(packet.clone()));
                if let Message::SetCompression(set) = processed {
                    if set.threshold >= 0 {
                        outbox.queue.push_back(Outbound::Compression(set.threshold));
                    }
                }
            }
        }
        outbox.compression = compression;
        Ok(())
    }

    /// Turns compression on (or changes the threshold) by sending
    /// `SetCompression`.
    pub fn set_compression(&self, threshold: i32) -> Result<(), SessionError> {
        self.send(blockwire_protocol::message::SetCompression { threshold })
    }

    /// Hands everything queued so far to the writer task.
    pub fn flush(&self) {
        let mut outbox = self.outbox.lock();
        self.forward(&mut outbox);
    }

    fn forward(&self, outbox: &mut Outbox) {
        while let Some(item) = outbox.queue.pop_front() {
            if let Outbound::Compression(threshold) = item {
                self.compression_threshold.store(threshold, Ordering::Release);
            }
            if self.writer.send(item).is_err() {
                // Writer is gone; the socket is closed.
                outbox.queue.clear();
                return;
            }
        }
    }

    // -----------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------

    /// Decodes a frame body in the current state and dispatches it.
    ///
    /// An unknown opcode disconnects with a reason. Any other decode
    /// failure closes the connection without one.
    pub fn receive_frame(self: &Arc<Self>, frame: Bytes) -> Result<(), SessionError> {
        if !self.is_active() {
            return Err(SessionError::Closed);
        }
        let ctx = self.codec_context();
        match self.protocol.decode(&ctx, frame) {
            Ok(message) => {
                self.receive(message);
                Ok(())
            }
            Err(e @ ProtocolError::UnknownOpcode { .. }) => {
                self.disconnect(&e.to_string());
                Err(e.into())
            }
            Err(e) => {
                tracing::debug!(session = %self.id, error = %e, "malformed packet");
                self.close();
                Err(e.into())
            }
        }
    }

    /// Runs inbound processors on `message` and dispatches the results to
    /// their handlers.
    pub fn receive(self: &Arc<Self>, message: Message) {
        let ctx = self.codec_context();
        let kind = message.kind();
        let messages = match self.protocol.process_inbound(&ctx, message) {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(session = %self.id, ?kind, error = %e, "dropping inbound message");
                return;
            }
        };
        for message in messages {
            self.dispatch(ctx.state, message);
        }
    }

    fn dispatch(self: &Arc<Self>, state: ProtocolState, message: Message) {
        let Some(binding) = self.protocol.handler(state, message.kind()) else {
            tracing::debug!(session = %self.id, kind = ?message.kind(), %state, "no handler bound");
            return;
        };

        match binding.dispatch {
            Dispatch::Inline => binding.handler.handle(self, message),
            Dispatch::Tick => {
                self.tick_tasks
                    .lock()
                    .push((Arc::clone(&binding.handler), message));
            }
            Dispatch::Pool => {
                let handler = Arc::clone(&binding.handler);
                let session = Arc::clone(self);
                match tokio::runtime::Handle::try_current() {
                    Ok(runtime) => {
                        runtime.spawn_blocking(move || handler.handle(&session, message));
                    }
                    Err(_) => handler.handle(&session, message),
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------

    /// One tick of work: run queued handlers, check liveness, flush.
    pub fn pulse(self: &Arc<Self>) {
        if !self.is_active() {
            return;
        }

        let tasks = std::mem::take(&mut *self.tick_tasks.lock());
        for (handler, message) in tasks {
            handler.handle(self, message);
        }

        if self.protocol_state() == ProtocolState::Play && !self.check_keep_alive() {
            return;
        }

        self.flush();
    }

    /// Sends a keep-alive when one is due. Returns `false` if the session
    /// timed out and was disconnected.
    fn check_keep_alive(&self) -> bool {
        let now = Instant::now();
        let mut keep_alive = self.keep_alive.lock();

        if let Some((_, sent)) = keep_alive.pending {
            if now.duration_since(sent) >= self.config.keepalive_timeout() {
                drop(keep_alive);
                tracing::info!(session = %self.id, "keep-alive timed out");
                self.disconnect("Timed out");
                return false;
            }
            return true;
        }

        if now.duration_since(keep_alive.last_sent) >= self.config.keepalive_interval() {
            let id: i32 = rand::random();
            keep_alive.pending = Some((id, now));
            keep_alive.last_sent = now;
            drop(keep_alive);
            if let Err(e) = self.send(KeepAlive { id }) {
                tracing::debug!(session = %self.id, error = %e, "failed to send keep-alive");
            }
        }
        true
    }

    /// Records a keep-alive reply. Replies that do not match the pending
    /// id are ignored.
    pub fn keep_alive_received(&self, id: i32) {
        let mut keep_alive = self.keep_alive.lock();
        match keep_alive.pending {
            Some((pending, sent)) if pending == id => {
                keep_alive.latency = sent.elapsed();
                keep_alive.pending = None;
            }
            _ => {
                tracing::debug!(session = %self.id, id, "unexpected keep-alive reply");
            }
        }
    }

    // -----------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------

    /// Sends a Disconnect with `reason` if the current state has one,
    /// flushes, and closes the connection. Idempotent: only the first
    /// call has any effect.
    pub fn disconnect(&self, reason: &str) {
        self.shutdown(Some(reason));
    }

    /// Closes the connection after flushing, without a Disconnect packet.
    pub fn close(&self) {
        self.shutdown(None);
    }

    fn shutdown(&self, reason: Option<&str>) {
        if self.disconnected.swap(true, Ordering::AcqRel) {
            return;
        }

        {
            let mut outbox = self.outbox.lock();
            if let Some(reason) = reason {
                let _ = self.disconnect_reason.set(reason.to_owned());
                let state = self.protocol_state();
                let registry = self.protocol.registry(state, Direction::Outbound);
                let ctx = CodecContext::new(state, self.protocol_version());
                match registry.encode(&ctx, &Disconnect::from_text(reason).into()) {
                    Ok(packet) => outbox.queue.push_back(Outbound::Packet(packet)),
                    Err(e) => {
                        tracing::debug!(
                            session = %self.id,
                            error = %e,
                            "disconnect reason not deliverable"
                        );
                    }
                }
            }
            outbox.queue.push_back(Outbound::Close);
            self.forward(&mut outbox);
        }

        self.cancel.cancel();
        self.tick_tasks.lock().clear();
        if let Some(set) = self.set.get().and_then(Weak::upgrade) {
            set.remove(self.id);
        }

        tracing::info!(
            session = %self.id,
            remote = %self.remote,
            player = self.player_name().unwrap_or("-"),
            reason = reason.unwrap_or(""),
            "session disconnected"
        );
    }
}

/// Last non-negative `SetCompression` threshold among `messages`.
fn enabled_threshold(messages: &[Message]) -> Option<i32> {
    messages.iter().rev().find_map(|message| match message {
        Message::SetCompression(set) if set.threshold >= 0 => Some(set.threshold),
        _ => None,
    })
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .field("state", &self.protocol_state())
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use blockwire_protocol::message::{
        Chat, SetCompression, StatusPong,
    };
    use blockwire_protocol::register_vanilla;

    use super::*;

    fn protocol() -> Arc<SessionProtocol> {
        let mut builder = SessionProtocolBuilder::new();
        register_vanilla(&mut builder).unwrap();
        Arc::new(builder.build().unwrap())
    }

    fn session() -> (Arc<Session>, mpsc::UnboundedReceiver<Outbound>) {
        Session::new(
            ConnectionId::new(1),
            "127.0.0.1:50000".parse().unwrap(),
            SessionConfig::default(),
            protocol(),
            Arc::new(BroadcastCache::default()),
        )
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            out.push(item);
        }
        out
    }

    fn to_play(session: &Session) {
        session.set_protocol_state(ProtocolState::Login).unwrap();
        session.set_protocol_state(ProtocolState::Play).unwrap();
    }

    #[test]
    fn test_send_is_queued_until_flush() {
        let (session, mut rx) = session();
        to_play(&session);

        session.send(Chat::from_text("hi")).unwrap();
        assert!(drain(&mut rx).is_empty());

        session.flush();
        let items = drain(&mut rx);
        assert_eq!(items.len(), 1);
        assert!(matches!(&items[0], Outbound::Packet(p) if p[0] == 0x02));
    }

    #[test]
    fn test_encoding_uses_state_at_send_time() {
        let (session, mut rx) = session();
        session.set_protocol_state(ProtocolState::Status).unwrap();
        session.send(StatusPong { payload: 1 }).unwrap();

        // Pong exists only in STATUS, so it was encoded before any change.
        session.flush();
        let items = drain(&mut rx);
        assert!(matches!(&items[0], Outbound::Packet(p) if p[0] == 0x01));
    }

    #[test]
    fn test_message_without_codec_in_state_is_rejected() {
        let (session, _rx) = session();
        let result = session.send(Chat::from_text("too early"));
        assert!(matches!(
            result,
            Err(SessionError::Protocol(ProtocolError::NotEncodable { .. }))
        ));
        assert!(session.is_active());
    }

    #[test]
    fn test_illegal_transition_is_rejected() {
        let (session, _rx) = session();
        assert!(matches!(
            session.set_protocol_state(ProtocolState::Play),
            Err(SessionError::IllegalTransition { .. })
        ));
        session.set_protocol_state(ProtocolState::Status).unwrap();
        assert!(session.set_protocol_state(ProtocolState::Login).is_err());
        assert_eq!(session.protocol_state(), ProtocolState::Status);
    }

    #[test]
    fn test_protocol_version_is_write_once() {
        let (session, _rx) = session();
        assert_eq!(session.protocol_version(), 47);
        session.set_protocol_version(5).unwrap();
        assert!(session.set_protocol_version(47).is_err());
        assert_eq!(session.protocol_version(), 5);
    }

    #[test]
    fn test_compression_switch_follows_its_packet() {
        let (session, mut rx) = session();
        session.set_protocol_state(ProtocolState::Login).unwrap();

        session.set_compression(256).unwrap();
        assert_eq!(session.compression_threshold(), -1);

        session.flush();
        let items = drain(&mut rx);
        assert!(matches!(&items[0], Outbound::Packet(p) if p[0] == 0x03));
        assert_eq!(items[1], Outbound::Compression(256));
        assert_eq!(session.compression_threshold(), 256);
    }

    #[test]
    fn test_compression_cannot_be_disabled() {
        let (session, mut rx) = session();
        session.set_protocol_state(ProtocolState::Login).unwrap();

        // Disabling before enabling does nothing.
        session.send(SetCompression { threshold: -1 }).unwrap();
        session.flush();
        assert!(drain(&mut rx).is_empty());

        session.set_compression(64).unwrap();
        assert!(matches!(
            session.send(SetCompression { threshold: -1 }),
            Err(SessionError::CompressionLocked)
        ));
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let (session, mut rx) = session();
        to_play(&session);

        session.disconnect("first");
        session.disconnect("second");
        session.close();

        let items = drain(&mut rx);
        assert_eq!(items.len(), 2, "one Disconnect packet, one Close");
        assert!(matches!(&items[0], Outbound::Packet(p) if p[0] == 0x40));
        assert_eq!(items[1], Outbound::Close);
        assert_eq!(session.disconnect_reason(), Some("first"));
        assert!(session.cancellation().is_cancelled());
        assert!(matches!(
            session.send(Chat::from_text("late")),
            Err(SessionError::Closed)
        ));
    }

    #[test]
    fn test_disconnect_in_status_sends_no_packet() {
        let (session, mut rx) = session();
        session.set_protocol_state(ProtocolState::Status).unwrap();
        session.disconnect("bye");
        assert_eq!(drain(&mut rx), vec![Outbound::Close]);
    }

    #[test]
    fn test_disconnect_flushes_pending_packets_first() {
        let (session, mut rx) = session();
        to_play(&session);
        session.send(Chat::from_text("last words")).unwrap();
        session.close();

        let items = drain(&mut rx);
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[0], Outbound::Packet(p) if p[0] == 0x02));
        assert_eq!(items[1], Outbound::Close);
        assert_eq!(session.disconnect_reason(), None);
    }

    #[test]
    fn test_unknown_opcode_disconnects_with_reason() {
        let (session, mut rx) = session();
        to_play(&session);

        let result = session.receive_frame(Bytes::from_static(&[0x7E]));
        assert!(result.is_err());
        assert!(!session.is_active());
        assert!(session.disconnect_reason().unwrap().contains("unknown opcode"));
        assert!(matches!(&drain(&mut rx)[0], Outbound::Packet(p) if p[0] == 0x40));
    }

    #[test]
    fn test_malformed_frame_closes_silently() {
        let (session, mut rx) = session();
        to_play(&session);

        // KeepAlive with a trailing byte.
        let result = session.receive_frame(Bytes::from_static(&[0x00, 0x01, 0x02]));
        assert!(matches!(
            result,
            Err(SessionError::Protocol(ProtocolError::TrailingBytes(1)))
        ));
        assert!(!session.is_active());
        assert_eq!(drain(&mut rx), vec![Outbound::Close]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_sent_then_times_out() {
        let (session, mut rx) = session();
        to_play(&session);

        session.pulse();
        assert!(drain(&mut rx).is_empty());

        tokio::time::advance(Duration::from_secs(15)).await;
        session.pulse();
        let items = drain(&mut rx);
        assert_eq!(items.len(), 1);
        assert!(matches!(&items[0], Outbound::Packet(p) if p[0] == 0x00));

        tokio::time::advance(Duration::from_secs(30)).await;
        session.pulse();
        assert!(!session.is_active());
        assert_eq!(session.disconnect_reason(), Some("Timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_reply_records_latency() {
        let (session, mut rx) = session();
        to_play(&session);

        tokio::time::advance(Duration::from_secs(15)).await;
        session.pulse();
        let id = {
            let keep_alive = session.keep_alive.lock();
            keep_alive.pending.map(|(id, _)| id).unwrap()
        };
        drain(&mut rx);

        tokio::time::advance(Duration::from_millis(40)).await;
        session.keep_alive_received(id);
        assert_eq!(session.latency(), Duration::from_millis(40));

        tokio::time::advance(Duration::from_secs(29)).await;
        session.pulse();
        assert!(session.is_active());
    }
}
