//! Built-in handlers: handshake, server list, login, keep-alive and chat.
//!
//! They are registered after the vanilla codecs and before any collaborator
//! registrations, so a collaborator that binds one of these kinds again
//! gets a `DuplicateHandler` error from the builder.

use std::sync::Arc;

use blockwire_protocol::message::{
    Chat, Handshake, LoginSuccess, StatusPong, StatusResponse,
};
use blockwire_protocol::{
    Dispatch, Message, MessageKind, PROTOCOL_VERSION, ProtocolState,
    RegistrationError, VERSION_NAME,
};
use blockwire_session::{
    Authenticator, GameProfile, Session, SessionError, SessionProtocolBuilder,
    SessionSet,
};
use serde::Serialize;

use crate::ServerConfig;

/// What the built-in handlers need from the server.
pub(crate) struct ServerContext<A> {
    pub(crate) config: ServerConfig,
    pub(crate) sessions: Arc<SessionSet>,
    pub(crate) auth: A,
}

/// Binds the built-in handlers on `builder`.
pub(crate) fn register_builtin_handlers<A: Authenticator>(
    builder: &mut SessionProtocolBuilder,
    ctx: Arc<ServerContext<A>>,
) -> Result<(), RegistrationError> {
    let status = Arc::clone(&ctx);
    let login = Arc::clone(&ctx);
    let chat = ctx;

    builder
        .register_handler(
            ProtocolState::Handshake,
            MessageKind::Handshake,
            |session: &Arc<Session>, message: Message| handle_handshake(session, message),
            Dispatch::Inline,
        )?
        .register_handler(
            ProtocolState::Status,
            MessageKind::StatusRequest,
            move |session: &Arc<Session>, _: Message| handle_status_request(&status, session),
            Dispatch::Inline,
        )?
        .register_handler(
            ProtocolState::Status,
            MessageKind::StatusPing,
            |session: &Arc<Session>, message: Message| handle_ping(session, message),
            Dispatch::Inline,
        )?
        .register_handler(
            ProtocolState::Login,
            MessageKind::LoginStart,
            move |session: &Arc<Session>, message: Message| {
                handle_login_start(&login, session, message)
            },
            Dispatch::Inline,
        )?
        .register_handler(
            ProtocolState::Play,
            MessageKind::KeepAlive,
            |session: &Arc<Session>, message: Message| {
                if let Message::KeepAlive(reply) = message {
                    session.keep_alive_received(reply.id);
                }
            },
            Dispatch::Inline,
        )?
        .register_handler(
            ProtocolState::Play,
            MessageKind::ChatInbound,
            move |session: &Arc<Session>, message: Message| handle_chat(&chat, session, message),
            Dispatch::Tick,
        )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

fn handle_handshake(session: &Arc<Session>, message: Message) {
    let Message::Handshake(Handshake {
        protocol_version,
        server_address,
        server_port,
        next_state,
    }) = message
    else {
        return;
    };

    let Some(next) = ProtocolState::from_handshake_id(next_state) else {
        session.disconnect(&format!("Unknown protocol state! ({next_state})"));
        return;
    };

    if let Err(e) = session
        .set_protocol_version(protocol_version)
        .and_then(|()| session.set_virtual_host(server_address))
        .and_then(|()| session.set_protocol_state(next))
    {
        tracing::debug!(session = %session.id(), error = %e, "rejecting handshake");
        session.close();
        return;
    }
    tracing::debug!(
        session = %session.id(),
        protocol_version,
        host = session.virtual_host().unwrap_or(""),
        port = server_port,
        state = %next,
        "handshake"
    );

    // LOGIN is entered first so the reason goes out as a login Disconnect.
    if next == ProtocolState::Login {
        if protocol_version < PROTOCOL_VERSION {
            session.disconnect(&format!("Outdated client! I'm running {VERSION_NAME}"));
        } else if protocol_version > PROTOCOL_VERSION {
            session.disconnect(&format!("Outdated server! I'm running {VERSION_NAME}"));
        }
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct StatusJson<'a> {
    version: VersionJson<'a>,
    players: PlayersJson,
    description: DescriptionJson<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    favicon: Option<&'a str>,
}

#[derive(Serialize)]
struct VersionJson<'a> {
    name: &'a str,
    protocol: i32,
}

#[derive(Serialize)]
struct PlayersJson {
    max: u32,
    online: usize,
}

#[derive(Serialize)]
struct DescriptionJson<'a> {
    text: &'a str,
}

/// Builds the server-list JSON.
fn status_json(config: &ServerConfig, online: usize) -> Result<String, serde_json::Error> {
    serde_json::to_string(&StatusJson {
        version: VersionJson {
            name: VERSION_NAME,
            protocol: PROTOCOL_VERSION,
        },
        players: PlayersJson {
            max: config.max_players,
            online,
        },
        description: DescriptionJson { text: &config.motd },
        favicon: config.favicon.as_deref(),
    })
}

fn handle_status_request<A>(ctx: &Arc<ServerContext<A>>, session: &Arc<Session>) {
    let online = ctx.sessions.online_players().len();
    let result = status_json(&ctx.config, online)
        .map_err(|e| SessionError::Protocol(e.into()))
        .and_then(|json| session.send(StatusResponse { json }));
    if let Err(e) = result {
        tracing::debug!(session = %session.id(), error = %e, "status response failed");
        session.close();
    }
}

fn handle_ping(session: &Arc<Session>, message: Message) {
    let Message::StatusPing(ping) = message else {
        return;
    };
    if let Err(e) = session.send(StatusPong {
        payload: ping.payload,
    }) {
        tracing::debug!(session = %session.id(), error = %e, "pong failed");
    }
    // The ping is the last thing a server-list query sends.
    session.close();
}

// ---------------------------------------------------------------------------
// Login
// ---------------------------------------------------------------------------

fn handle_login_start<A: Authenticator>(
    ctx: &Arc<ServerContext<A>>,
    session: &Arc<Session>,
    message: Message,
) {
    let Message::LoginStart(start) = message else {
        return;
    };

    let online = ctx.sessions.online_players().len();
    if online >= ctx.config.max_players as usize {
        session.disconnect("The server is full!");
        return;
    }

    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        tracing::error!(session = %session.id(), "login outside a runtime");
        session.close();
        return;
    };

    let ctx = Arc::clone(ctx);
    let session = Arc::clone(session);
    runtime.spawn(async move {
        let profile = match ctx.auth.authenticate(&start.name).await {
            Ok(profile) => profile,
            Err(SessionError::AuthFailed(reason)) => {
                tracing::info!(
                    session = %session.id(),
                    name = %start.name,
                    %reason,
                    "login rejected"
                );
                session.disconnect(&reason);
                return;
            }
            Err(e) => {
                session.disconnect(&e.to_string());
                return;
            }
        };
        if let Err(e) = finish_login(&ctx.config, &session, profile) {
            tracing::debug!(session = %session.id(), error = %e, "login failed");
            session.disconnect("Login failed");
        }
    });
}

/// Turns compression on, confirms the login and moves to PLAY.
fn finish_login(
    config: &ServerConfig,
    session: &Session,
    profile: GameProfile,
) -> Result<(), SessionError> {
    if !session.is_active() {
        return Err(SessionError::Closed);
    }
    if config.compression_threshold >= 0 {
        session.set_compression(config.compression_threshold)?;
    }
    session.set_player_name(profile.name.clone())?;
    session.send(LoginSuccess {
        uuid: profile.uuid.clone(),
        name: profile.name.clone(),
    })?;
    session.set_protocol_state(ProtocolState::Play)?;
    session.flush();

    tracing::info!(
        session = %session.id(),
        remote = %session.remote_addr(),
        name = %profile.name,
        uuid = %profile.uuid,
        "player logged in"
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Play
// ---------------------------------------------------------------------------

fn handle_chat<A>(ctx: &Arc<ServerContext<A>>, session: &Arc<Session>, message: Message) {
    let Message::ChatInbound(chat) = message else {
        return;
    };
    let name = session.player_name().unwrap_or("?");
    let line = format!("<{name}> {}", chat.message);
    tracing::info!(session = %session.id(), "{line}");
    ctx.sessions.broadcast(Chat::from_text(&line));
}
