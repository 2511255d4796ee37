//! Opcode tables for protocol 47 (game version 1.8.9).

use crate::cache::EqualHash;
use crate::codecs::{
    ChatCodec, ChatInboundCodec, DisconnectCodec, HandshakeCodec,
    KeepAliveCodec, LoginStartCodec, LoginSuccessCodec, PingCodec,
    SetCompressionCodec, StatusRequestCodec, StatusResponseCodec, TitleCodec,
};
use crate::message::MessageKind as K;
use crate::pipeline::TitleProcessor;
use crate::registry::ProtocolBuilder;
use crate::state::{Direction::*, ProtocolState::*};
use crate::RegistrationError;

/// Protocol version these tables implement.
pub const PROTOCOL_VERSION: i32 = 47;

/// Game version shown in the server list.
pub const VERSION_NAME: &str = "1.8.9";

/// Registers every vanilla codec, plus the title processor and a broadcast
/// cache binding for titles and chat.
///
/// Handlers are not registered here; they belong to whoever owns the
/// session type.
pub fn register_vanilla<S>(
    builder: &mut ProtocolBuilder<S>,
) -> Result<(), RegistrationError> {
    builder
        .register_codec(Handshake, Inbound, 0x00, HandshakeCodec, &[K::Handshake])?
        // Status
        .register_codec(Status, Inbound, 0x00, StatusRequestCodec, &[K::StatusRequest])?
        .register_codec(Status, Inbound, 0x01, PingCodec, &[K::StatusPing])?
        .register_codec(Status, Outbound, 0x00, StatusResponseCodec, &[K::StatusResponse])?
        .register_codec(Status, Outbound, 0x01, PingCodec, &[K::StatusPong])?
        // Login
        .register_codec(Login, Inbound, 0x00, LoginStartCodec, &[K::LoginStart])?
        .register_codec(Login, Outbound, 0x00, DisconnectCodec, &[K::Disconnect])?
        .register_codec(Login, Outbound, 0x02, LoginSuccessCodec, &[K::LoginSuccess])?
        .register_codec(Login, Outbound, 0x03, SetCompressionCodec, &[K::SetCompression])?
        // Play
        .register_codec(Play, Inbound, 0x00, KeepAliveCodec, &[K::KeepAlive])?
        .register_codec(Play, Inbound, 0x01, ChatInboundCodec, &[K::ChatInbound])?
        .register_codec(Play, Outbound, 0x00, KeepAliveCodec, &[K::KeepAlive])?
        .register_codec(Play, Outbound, 0x02, ChatCodec, &[K::Chat])?
        .register_codec(Play, Outbound, 0x40, DisconnectCodec, &[K::Disconnect])?
        .register_codec(
            Play,
            Outbound,
            0x45,
            TitleCodec,
            &[K::TitleText, K::TitleTimes, K::TitleClear, K::TitleReset],
        )?
        .register_codec(Play, Outbound, 0x46, SetCompressionCodec, &[K::SetCompression])?;

    builder
        .register_processor(Play, Outbound, K::TitleUpdate, TitleProcessor)
        .register_cache(Play, K::TitleUpdate, EqualHash)
        .register_cache(Play, K::Chat, EqualHash);
    Ok(())
}
