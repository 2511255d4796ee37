//! Codecs for the vanilla packets of protocol 47.
//!
//! Each codec handles exactly the message kinds listed in
//! [`vanilla`](crate::vanilla), except [`TitleCodec`], which serves all four
//! title packets behind a single opcode.

use bytes::{BufMut, Bytes, BytesMut};

use crate::ProtocolError;
use crate::codec::{
    Codec, CodecContext, misuse, read_i64, read_string, read_u16, read_varint,
    write_string, write_varint,
};
use crate::message::{
    ChatInbound, Handshake, KeepAlive, LoginStart, Message, StatusPing,
    StatusRequest, TitleSlot,
};

/// Longest server address accepted in a handshake.
pub const MAX_ADDRESS_LEN: usize = 255;
/// Longest player name.
pub const MAX_NAME_LEN: usize = 16;
/// Longest chat line a client may send.
pub const MAX_CHAT_LEN: usize = 100;
/// Longest JSON text component.
pub const MAX_JSON_LEN: usize = 32_767;

/// Writes a JSON text component, rejecting anything a client would refuse
/// to read.
fn write_json(buf: &mut BytesMut, json: &str) -> Result<(), ProtocolError> {
    let chars = json.chars().count();
    if chars > MAX_JSON_LEN {
        return Err(ProtocolError::StringTooLong {
            max: MAX_JSON_LEN,
            actual: chars,
        });
    }
    write_string(buf, json);
    Ok(())
}

const TITLE_SET_TITLE: i32 = 0;
const TITLE_SET_SUBTITLE: i32 = 1;
const TITLE_SET_TIMES: i32 = 2;
const TITLE_CLEAR: i32 = 3;
const TITLE_RESET: i32 = 4;

#[derive(Debug, Clone, Copy, Default)]
pub struct HandshakeCodec;

impl Codec for HandshakeCodec {
    fn name(&self) -> &'static str {
        "Handshake"
    }

    fn can_decode(&self) -> bool {
        true
    }

    fn decode(
        &self,
        _ctx: &CodecContext,
        buf: &mut Bytes,
    ) -> Result<Message, ProtocolError> {
        Ok(Handshake {
            protocol_version: read_varint(buf)?,
            server_address: read_string(buf, MAX_ADDRESS_LEN)?,
            server_port: read_u16(buf)?,
            next_state: read_varint(buf)?,
        }
        .into())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StatusRequestCodec;

impl Codec for StatusRequestCodec {
    fn name(&self) -> &'static str {
        "StatusRequest"
    }

    fn can_decode(&self) -> bool {
        true
    }

    fn decode(
        &self,
        _ctx: &CodecContext,
        _buf: &mut Bytes,
    ) -> Result<Message, ProtocolError> {
        Ok(StatusRequest.into())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StatusResponseCodec;

impl Codec for StatusResponseCodec {
    fn name(&self) -> &'static str {
        "StatusResponse"
    }

    fn can_encode(&self) -> bool {
        true
    }

    fn encode(
        &self,
        _ctx: &CodecContext,
        message: &Message,
        buf: &mut BytesMut,
    ) -> Result<(), ProtocolError> {
        match message {
            Message::StatusResponse(response) => {
                write_json(buf, &response.json)
            }
            other => Err(misuse(self.name(), "encode", Some(other.kind()))),
        }
    }
}

/// Decodes the client's ping and encodes the server's pong. Both carry a
/// single `i64` that the server echoes back unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PingCodec;

impl Codec for PingCodec {
    fn name(&self) -> &'static str {
        "Ping"
    }

    fn can_encode(&self) -> bool {
        true
    }

    fn can_decode(&self) -> bool {
        true
    }

    fn encode(
        &self,
        _ctx: &CodecContext,
        message: &Message,
        buf: &mut BytesMut,
    ) -> Result<(), ProtocolError> {
        match message {
            Message::StatusPong(pong) => {
                buf.put_i64(pong.payload);
                Ok(())
            }
            other => Err(misuse(self.name(), "encode", Some(other.kind()))),
        }
    }

    fn decode(
        &self,
        _ctx: &CodecContext,
        buf: &mut Bytes,
    ) -> Result<Message, ProtocolError> {
        Ok(StatusPing {
            payload: read_i64(buf)?,
        }
        .into())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoginStartCodec;

impl Codec for LoginStartCodec {
    fn name(&self) -> &'static str {
        "LoginStart"
    }

    fn can_decode(&self) -> bool {
        true
    }

    fn decode(
        &self,
        _ctx: &CodecContext,
        buf: &mut Bytes,
    ) -> Result<Message, ProtocolError> {
        Ok(LoginStart {
            name: read_string(buf, MAX_NAME_LEN)?,
        }
        .into())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoginSuccessCodec;

impl Codec for LoginSuccessCodec {
    fn name(&self) -> &'static str {
        "LoginSuccess"
    }

    fn can_encode(&self) -> bool {
        true
    }

    fn encode(
        &self,
        _ctx: &CodecContext,
        message: &Message,
        buf: &mut BytesMut,
    ) -> Result<(), ProtocolError> {
        match message {
            Message::LoginSuccess(success) => {
                write_string(buf, &success.uuid);
                write_string(buf, &success.name);
                Ok(())
            }
            other => Err(misuse(self.name(), "encode", Some(other.kind()))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SetCompressionCodec;

impl Codec for SetCompressionCodec {
    fn name(&self) -> &'static str {
        "SetCompression"
    }

    fn can_encode(&self) -> bool {
        true
    }

    fn encode(
        &self,
        _ctx: &CodecContext,
        message: &Message,
        buf: &mut BytesMut,
    ) -> Result<(), ProtocolError> {
        match message {
            Message::SetCompression(set) => {
                write_varint(buf, set.threshold);
                Ok(())
            }
            other => Err(misuse(self.name(), "encode", Some(other.kind()))),
        }
    }
}

/// Used for both the LOGIN and the PLAY disconnect packet; only the opcode
/// differs.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisconnectCodec;

impl Codec for DisconnectCodec {
    fn name(&self) -> &'static str {
        "Disconnect"
    }

    fn can_encode(&self) -> bool {
        true
    }

    fn encode(
        &self,
        _ctx: &CodecContext,
        message: &Message,
        buf: &mut BytesMut,
    ) -> Result<(), ProtocolError> {
        match message {
            Message::Disconnect(disconnect) => {
                write_json(buf, &disconnect.json)
            }
            other => Err(misuse(self.name(), "encode", Some(other.kind()))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KeepAliveCodec;

impl Codec for KeepAliveCodec {
    fn name(&self) -> &'static str {
        "KeepAlive"
    }

    fn can_encode(&self) -> bool {
        true
    }

    fn can_decode(&self) -> bool {
        true
    }

    fn encode(
        &self,
        _ctx: &CodecContext,
        message: &Message,
        buf: &mut BytesMut,
    ) -> Result<(), ProtocolError> {
        match message {
            Message::KeepAlive(keep_alive) => {
                write_varint(buf, keep_alive.id);
                Ok(())
            }
            other => Err(misuse(self.name(), "encode", Some(other.kind()))),
        }
    }

    fn decode(
        &self,
        _ctx: &CodecContext,
        buf: &mut Bytes,
    ) -> Result<Message, ProtocolError> {
        Ok(KeepAlive {
            id: read_varint(buf)?,
        }
        .into())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChatInboundCodec;

impl Codec for ChatInboundCodec {
    fn name(&self) -> &'static str {
        "ChatInbound"
    }

    fn can_decode(&self) -> bool {
        true
    }

    fn decode(
        &self,
        _ctx: &CodecContext,
        buf: &mut Bytes,
    ) -> Result<Message, ProtocolError> {
        Ok(ChatInbound {
            message: read_string(buf, MAX_CHAT_LEN)?,
        }
        .into())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChatCodec;

impl Codec for ChatCodec {
    fn name(&self) -> &'static str {
        "Chat"
    }

    fn can_encode(&self) -> bool {
        true
    }

    fn encode(
        &self,
        _ctx: &CodecContext,
        message: &Message,
        buf: &mut BytesMut,
    ) -> Result<(), ProtocolError> {
        match message {
            Message::Chat(chat) => {
                write_json(buf, &chat.json)?;
                buf.put_u8(chat.position as u8);
                Ok(())
            }
            other => Err(misuse(self.name(), "encode", Some(other.kind()))),
        }
    }
}

/// The title packet: a `VarInt` action followed by action-specific fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct TitleCodec;

impl Codec for TitleCodec {
    fn name(&self) -> &'static str {
        "Title"
    }

    fn can_encode(&self) -> bool {
        true
    }

    fn encode(
        &self,
        _ctx: &CodecContext,
        message: &Message,
        buf: &mut BytesMut,
    ) -> Result<(), ProtocolError> {
        match message {
            Message::TitleText(text) => {
                let action = match text.slot {
                    TitleSlot::Title => TITLE_SET_TITLE,
                    TitleSlot::Subtitle => TITLE_SET_SUBTITLE,
                };
                write_varint(buf, action);
                write_json(buf, &text.json)?;
            }
            Message::TitleTimes(times) => {
                write_varint(buf, TITLE_SET_TIMES);
                buf.put_i32(times.fade_in);
                buf.put_i32(times.stay);
                buf.put_i32(times.fade_out);
            }
            Message::TitleClear(_) => write_varint(buf, TITLE_CLEAR),
            Message::TitleReset(_) => write_varint(buf, TITLE_RESET),
            other => {
                return Err(misuse(self.name(), "encode", Some(other.kind())));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProtocolState;
    use crate::message::{
        Chat, ChatPosition, Disconnect, StatusPong, TitleText, TitleTimes,
    };

    fn ctx() -> CodecContext {
        CodecContext::new(ProtocolState::Play, 47)
    }

    fn encode(codec: &dyn Codec, message: impl Into<Message>) -> Vec<u8> {
        let mut buf = BytesMut::new();
        codec
            .encode(&ctx(), &message.into(), &mut buf)
            .expect("encode");
        buf.to_vec()
    }

    #[test]
    fn test_handshake_decodes_all_fields() {
        let mut body = BytesMut::new();
        write_varint(&mut body, 47);
        write_string(&mut body, "play.example.net");
        body.put_u16(25565);
        write_varint(&mut body, 2);

        let message = HandshakeCodec
            .decode(&ctx(), &mut body.freeze())
            .expect("decode");
        assert_eq!(
            message,
            Message::Handshake(Handshake {
                protocol_version: 47,
                server_address: "play.example.net".into(),
                server_port: 25565,
                next_state: 2,
            })
        );
    }

    #[test]
    fn test_truncated_handshake_is_an_error() {
        let mut body = Bytes::from_static(&[0x2F, 0x00, 0x63]);
        assert!(HandshakeCodec.decode(&ctx(), &mut body).is_err());
    }

    #[test]
    fn test_pong_echoes_payload_big_endian() {
        let bytes = encode(&PingCodec, StatusPong { payload: 0x0102 });
        assert_eq!(bytes, vec![0, 0, 0, 0, 0, 0, 0x01, 0x02]);
    }

    #[test]
    fn test_ping_decodes_payload() {
        let mut body = Bytes::from_static(&[0, 0, 0, 0, 0, 0, 0, 9]);
        let message = PingCodec.decode(&ctx(), &mut body).unwrap();
        assert_eq!(message, Message::StatusPing(StatusPing { payload: 9 }));
    }

    #[test]
    fn test_set_compression_negative_threshold() {
        let bytes = encode(
            &SetCompressionCodec,
            crate::message::SetCompression { threshold: -1 },
        );
        assert_eq!(bytes, vec![0xFF, 0xFF, 0xFF, 0xFF, 0x0F]);
    }

    #[test]
    fn test_chat_writes_position_byte() {
        let bytes = encode(
            &ChatCodec,
            Chat {
                json: "{}".into(),
                position: ChatPosition::ActionBar,
            },
        );
        assert_eq!(bytes, vec![0x02, b'{', b'}', 0x02]);
    }

    #[test]
    fn test_title_actions() {
        let title = encode(
            &TitleCodec,
            TitleText {
                slot: TitleSlot::Subtitle,
                json: "x".into(),
            },
        );
        assert_eq!(title, vec![0x01, 0x01, b'x']);

        let times = encode(
            &TitleCodec,
            TitleTimes {
                fade_in: 1,
                stay: 2,
                fade_out: 3,
            },
        );
        assert_eq!(times, vec![0x02, 0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 3]);

        assert_eq!(
            encode(&TitleCodec, crate::message::TitleReset),
            vec![0x04]
        );
    }

    #[test]
    fn test_wrong_kind_is_codec_misuse() {
        let mut buf = BytesMut::new();
        let result = DisconnectCodec.encode(
            &ctx(),
            &Message::from(KeepAlive { id: 1 }),
            &mut buf,
        );
        assert!(matches!(
            result,
            Err(ProtocolError::CodecMisuse { codec: "Disconnect", .. })
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_only_codec_cannot_encode() {
        let mut buf = BytesMut::new();
        let message = Message::from(Disconnect::from_text("bye"));
        assert!(!HandshakeCodec.can_encode());
        assert!(HandshakeCodec.encode(&ctx(), &message, &mut buf).is_err());
    }

    #[test]
    fn test_oversized_json_is_not_encoded() {
        let mut buf = BytesMut::new();
        let chat = Message::from(Chat {
            json: "x".repeat(MAX_JSON_LEN + 1),
            position: ChatPosition::Chat,
        });
        assert!(matches!(
            ChatCodec.encode(&ctx(), &chat, &mut buf),
            Err(ProtocolError::StringTooLong { max: MAX_JSON_LEN, .. })
        ));

        let disconnect = Message::from(Disconnect {
            json: "y".repeat(MAX_JSON_LEN + 1),
        });
        assert!(DisconnectCodec.encode(&ctx(), &disconnect, &mut buf).is_err());

        // Exactly at the limit still encodes.
        let title = Message::from(TitleText {
            slot: TitleSlot::Title,
            json: "z".repeat(MAX_JSON_LEN),
        });
        assert!(TitleCodec.encode(&ctx(), &title, &mut BytesMut::new()).is_ok());
    }
}
