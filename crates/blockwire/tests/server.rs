//! End-to-end tests: a real server on an OS-assigned port and a client
//! speaking the wire format through a plain framed `TcpStream`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use blockwire::prelude::*;
use blockwire::protocol::{CodecContext, Direction};
use blockwire::protocol::codec::{read_i64, read_string, read_varint, write_string, write_varint};
use blockwire::transport::FrameCodec;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

type Client = Framed<TcpStream, FrameCodec>;

const WAIT: Duration = Duration::from_secs(5);

// =========================================================================
// Helpers
// =========================================================================

struct Running {
    addr: String,
    sessions: Arc<SessionSet>,
    shutdown: CancellationToken,
    task: tokio::task::JoinHandle<Result<(), BlockwireError>>,
}

async fn start(builder: ServerBuilder) -> Running {
    let server = builder
        .bind("127.0.0.1:0")
        .build(OfflineAuthenticator)
        .await
        .expect("server should build");
    let addr = server.local_addr().expect("local addr").to_string();
    let sessions = Arc::clone(server.sessions());
    let shutdown = server.shutdown_token();
    let task = tokio::spawn(server.run());
    Running {
        addr,
        sessions,
        shutdown,
        task,
    }
}

async fn connect(addr: &str) -> Client {
    let stream = TcpStream::connect(addr).await.expect("connect");
    Framed::new(stream, FrameCodec::new())
}

fn handshake(version: i32, next_state: i32) -> Bytes {
    let mut buf = BytesMut::new();
    write_varint(&mut buf, 0x00);
    write_varint(&mut buf, version);
    write_string(&mut buf, "localhost");
    buf.put_u16(25565);
    write_varint(&mut buf, next_state);
    buf.freeze()
}

fn login_start(name: &str) -> Bytes {
    let mut buf = BytesMut::new();
    write_varint(&mut buf, 0x00);
    write_string(&mut buf, name);
    buf.freeze()
}

/// Next frame body, split into opcode and payload.
async fn recv(client: &mut Client) -> (i32, BytesMut) {
    let mut frame = timeout(WAIT, client.next())
        .await
        .expect("frame within timeout")
        .expect("connection open")
        .expect("valid frame");
    let opcode = read_varint(&mut frame).expect("opcode");
    (opcode, frame)
}

/// Waits for the server to close the connection.
async fn expect_closed(client: &mut Client) {
    match timeout(WAIT, client.next()).await.expect("close within timeout") {
        None | Some(Err(_)) => {}
        Some(Ok(frame)) => panic!("expected close, got frame {frame:?}"),
    }
}

/// Logs `name` in with compression off and returns the client in PLAY.
async fn login(addr: &str, name: &str) -> Client {
    let mut client = connect(addr).await;
    client.send(handshake(PROTOCOL_VERSION, 2)).await.unwrap();
    client.send(login_start(name)).await.unwrap();
    let (opcode, _) = recv(&mut client).await;
    assert_eq!(opcode, 0x02, "LoginSuccess");
    client
}

// =========================================================================
// Status
// =========================================================================

#[tokio::test]
async fn test_status_then_ping_then_close() {
    let server = start(Server::builder().motd("Integration").max_players(7)).await;
    let mut client = connect(&server.addr).await;

    client.send(handshake(PROTOCOL_VERSION, 1)).await.unwrap();
    client.send(Bytes::from_static(&[0x00])).await.unwrap();

    let (opcode, mut payload) = recv(&mut client).await;
    assert_eq!(opcode, 0x00);
    let json: serde_json::Value =
        serde_json::from_str(&read_string(&mut payload, 32_767).unwrap()).unwrap();
    assert_eq!(json["version"]["name"], "1.8.9");
    assert_eq!(json["version"]["protocol"], 47);
    assert_eq!(json["players"]["max"], 7);
    assert_eq!(json["players"]["online"], 0);
    assert_eq!(json["description"]["text"], "Integration");

    let mut ping = BytesMut::new();
    write_varint(&mut ping, 0x01);
    ping.put_i64(0x0102_0304_0506_0708);
    client.send(ping.freeze()).await.unwrap();

    let (opcode, mut payload) = recv(&mut client).await;
    assert_eq!(opcode, 0x01);
    assert_eq!(read_i64(&mut payload).unwrap(), 0x0102_0304_0506_0708);
    expect_closed(&mut client).await;

    server.shutdown.cancel();
}

// =========================================================================
// Handshake outcomes
// =========================================================================

#[tokio::test]
async fn test_outdated_client_gets_login_disconnect() {
    let server = start(Server::builder()).await;
    let mut client = connect(&server.addr).await;

    client.send(handshake(PROTOCOL_VERSION - 1, 2)).await.unwrap();

    let (opcode, mut payload) = recv(&mut client).await;
    assert_eq!(opcode, 0x00, "login Disconnect");
    let reason = read_string(&mut payload, 32_767).unwrap();
    assert!(reason.contains("Outdated client! I'm running 1.8.9"), "{reason}");
    expect_closed(&mut client).await;

    server.shutdown.cancel();
}

#[tokio::test]
async fn test_unknown_next_state_closes_silently() {
    let server = start(Server::builder()).await;
    let mut client = connect(&server.addr).await;

    client.send(handshake(PROTOCOL_VERSION, 3)).await.unwrap();

    expect_closed(&mut client).await;
    server.shutdown.cancel();
}

#[tokio::test]
async fn test_unknown_opcode_in_login_is_explained() {
    let server = start(Server::builder()).await;
    let mut client = connect(&server.addr).await;

    client.send(handshake(PROTOCOL_VERSION, 2)).await.unwrap();
    client.send(Bytes::from_static(&[0x07])).await.unwrap();

    let (opcode, mut payload) = recv(&mut client).await;
    assert_eq!(opcode, 0x00);
    let reason = read_string(&mut payload, 32_767).unwrap();
    assert!(reason.contains("unknown opcode 0x07"), "{reason}");
    expect_closed(&mut client).await;

    server.shutdown.cancel();
}

#[tokio::test]
async fn test_trailing_bytes_drop_the_connection() {
    let server = start(Server::builder()).await;
    let mut client = connect(&server.addr).await;

    client.send(handshake(PROTOCOL_VERSION, 1)).await.unwrap();
    // A status request has no payload.
    client.send(Bytes::from_static(&[0x00, 0xFF])).await.unwrap();

    expect_closed(&mut client).await;
    server.shutdown.cancel();
}

// =========================================================================
// Login and play
// =========================================================================

#[tokio::test]
async fn test_login_with_compression() {
    let server = start(Server::builder().compression_threshold(64)).await;
    let mut client = connect(&server.addr).await;

    client.send(handshake(PROTOCOL_VERSION, 2)).await.unwrap();
    client.send(login_start("Steve")).await.unwrap();

    let (opcode, mut payload) = recv(&mut client).await;
    assert_eq!(opcode, 0x03, "SetCompression");
    assert_eq!(read_varint(&mut payload).unwrap(), 64);
    client.codec_mut().set_threshold(64);

    let (opcode, mut payload) = recv(&mut client).await;
    assert_eq!(opcode, 0x02, "LoginSuccess");
    let uuid = read_string(&mut payload, 36).unwrap();
    assert_eq!(uuid, OfflineAuthenticator::offline_uuid("Steve").to_string());
    assert_eq!(read_string(&mut payload, 16).unwrap(), "Steve");
    assert!(!payload.has_remaining());

    // Chat goes out in the compressed format and comes back broadcast.
    let mut chat = BytesMut::new();
    write_varint(&mut chat, 0x01);
    write_string(&mut chat, &"hello ".repeat(15));
    client.send(chat.freeze()).await.unwrap();

    let (opcode, mut payload) = recv(&mut client).await;
    assert_eq!(opcode, 0x02, "Chat");
    let json = read_string(&mut payload, 32_767).unwrap();
    assert!(json.contains("<Steve> hello hello"), "{json}");
    assert_eq!(server.sessions.online_players(), vec!["Steve".to_string()]);

    server.shutdown.cancel();
}

#[tokio::test]
async fn test_chat_reaches_every_player() {
    let server = start(Server::builder().compression_threshold(-1)).await;
    let mut steve = login(&server.addr, "Steve").await;
    let mut alex = login(&server.addr, "Alex").await;

    let mut chat = BytesMut::new();
    write_varint(&mut chat, 0x01);
    write_string(&mut chat, "hi all");
    alex.send(chat.freeze()).await.unwrap();

    for client in [&mut steve, &mut alex] {
        let (opcode, mut payload) = recv(client).await;
        assert_eq!(opcode, 0x02);
        let json = read_string(&mut payload, 32_767).unwrap();
        assert!(json.contains("<Alex> hi all"), "{json}");
    }

    server.shutdown.cancel();
}

#[tokio::test]
async fn test_shutdown_disconnects_players() {
    let server = start(Server::builder().compression_threshold(-1)).await;
    let mut client = login(&server.addr, "Steve").await;

    server.shutdown.cancel();

    let (opcode, mut payload) = recv(&mut client).await;
    assert_eq!(opcode, 0x40, "play Disconnect");
    assert!(read_string(&mut payload, 32_767).unwrap().contains("Server closed"));
    expect_closed(&mut client).await;

    let result = timeout(WAIT, server.task).await.expect("run returns");
    assert!(result.expect("task joins").is_ok());
    assert!(server.sessions.is_empty());
}

// =========================================================================
// Builder
// =========================================================================

#[tokio::test]
async fn test_conflicting_registration_fails_build() {
    let result = Server::builder()
        .bind("127.0.0.1:0")
        .configure(|protocol| {
            protocol.register_handler(
                ProtocolState::Status,
                MessageKind::StatusRequest,
                |_: &Arc<Session>, _: Message| {},
                Dispatch::Inline,
            )?;
            Ok(())
        })
        .build(OfflineAuthenticator)
        .await;

    assert!(matches!(result, Err(BlockwireError::Registration(_))));
}

/// Inbound processor that records it ran and passes the message through.
struct Marker(Arc<AtomicBool>);

impl Processor for Marker {
    fn process(
        &self,
        _: &CodecContext,
        message: &Message,
        output: &mut Vec<Message>,
    ) -> Result<(), ProtocolError> {
        self.0.store(true, Ordering::SeqCst);
        output.push(message.clone());
        Ok(())
    }
}

#[tokio::test]
async fn test_configure_adds_processors() {
    let seen = Arc::new(AtomicBool::new(false));
    let marker = Marker(Arc::clone(&seen));
    let server = start(
        Server::builder()
            .compression_threshold(-1)
            .configure(move |protocol| {
                protocol.register_processor(
                    ProtocolState::Play,
                    Direction::Inbound,
                    MessageKind::ChatInbound,
                    marker,
                );
                Ok(())
            }),
    )
    .await;
    let mut client = login(&server.addr, "Steve").await;

    let mut chat = BytesMut::new();
    write_varint(&mut chat, 0x01);
    write_string(&mut chat, "ping");
    client.send(chat.freeze()).await.unwrap();
    let (opcode, _) = recv(&mut client).await;

    assert_eq!(opcode, 0x02);
    assert!(seen.load(Ordering::SeqCst));
    server.shutdown.cancel();
}
