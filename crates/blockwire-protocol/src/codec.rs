//! The codec contract and the field helpers codecs are written with.
//!
//! A codec turns the payload of one or more message kinds into bytes and
//! back. It never sees the opcode: the registry writes and strips that.
//! Codecs are stateless and shared by every connection, so anything that
//! varies per connection arrives through [`CodecContext`].

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::ProtocolError;
use crate::message::{Message, MessageKind};
use crate::state::ProtocolState;

/// Per-connection facts a codec may depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodecContext {
    /// Protocol state the packet belongs to.
    pub state: ProtocolState,
    /// Version the client announced in its handshake, or the server's own
    /// version before the handshake arrives.
    pub protocol_version: i32,
}

impl CodecContext {
    pub fn new(state: ProtocolState, protocol_version: i32) -> Self {
        Self {
            state,
            protocol_version,
        }
    }
}

/// Serializes message payloads.
///
/// Implement [`encode`](Codec::encode) for server-to-client packets,
/// [`decode`](Codec::decode) for client-to-server packets, or both. The
/// registry checks [`can_encode`](Codec::can_encode) and
/// [`can_decode`](Codec::can_decode) when a codec is bound, so a codec
/// placed in the wrong direction fails at startup instead of on first use.
pub trait Codec: Send + Sync + 'static {
    /// Name used in logs and errors.
    fn name(&self) -> &'static str;

    fn can_encode(&self) -> bool {
        false
    }

    fn can_decode(&self) -> bool {
        false
    }

    /// Writes the payload of `message` (without opcode) into `buf`.
    ///
    /// # Errors
    /// [`ProtocolError::CodecMisuse`] if this codec does not encode, or
    /// does not handle `message`'s kind.
    fn encode(
        &self,
        ctx: &CodecContext,
        message: &Message,
        buf: &mut BytesMut,
    ) -> Result<(), ProtocolError> {
        let _ = (ctx, buf);
        Err(misuse(self.name(), "encode", Some(message.kind())))
    }

    /// Reads one payload (opcode already stripped) from `buf`.
    ///
    /// The registry rejects the packet if bytes remain afterwards.
    fn decode(
        &self,
        ctx: &CodecContext,
        buf: &mut Bytes,
    ) -> Result<Message, ProtocolError> {
        let _ = (ctx, buf);
        Err(misuse(self.name(), "decode", None))
    }
}

/// Builds a [`ProtocolError::CodecMisuse`].
pub fn misuse(
    codec: &'static str,
    operation: &'static str,
    kind: Option<MessageKind>,
) -> ProtocolError {
    ProtocolError::CodecMisuse {
        codec,
        operation,
        kind,
    }
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn ensure(buf: &impl Buf, needed: usize) -> Result<(), ProtocolError> {
    if buf.remaining() < needed {
        return Err(ProtocolError::UnexpectedEnd {
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

pub fn read_varint(buf: &mut impl Buf) -> Result<i32, ProtocolError> {
    Ok(blockwire_transport::varint::read_varint(buf)?)
}

pub fn write_varint(buf: &mut impl BufMut, value: i32) {
    blockwire_transport::varint::write_varint(buf, value);
}

pub fn read_u8(buf: &mut impl Buf) -> Result<u8, ProtocolError> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

pub fn read_u16(buf: &mut impl Buf) -> Result<u16, ProtocolError> {
    ensure(buf, 2)?;
    Ok(buf.get_u16())
}

pub fn read_i32(buf: &mut impl Buf) -> Result<i32, ProtocolError> {
    ensure(buf, 4)?;
    Ok(buf.get_i32())
}

pub fn read_i64(buf: &mut impl Buf) -> Result<i64, ProtocolError> {
    ensure(buf, 8)?;
    Ok(buf.get_i64())
}

/// Reads a `VarInt`-length-prefixed UTF-8 string of at most `max_chars`
/// characters.
///
/// The byte length is checked against `max_chars * 4` before anything is
/// copied, so a hostile length prefix cannot force a large allocation.
pub fn read_string(
    buf: &mut impl Buf,
    max_chars: usize,
) -> Result<String, ProtocolError> {
    let len = read_varint(buf)?;
    let len = usize::try_from(len).map_err(|_| {
        ProtocolError::InvalidValue(format!("negative string length {len}"))
    })?;
    if len > max_chars * 4 {
        return Err(ProtocolError::StringTooLong {
            max: max_chars,
            actual: len,
        });
    }
    ensure(buf, len)?;

    let raw = buf.copy_to_bytes(len);
    let text = std::str::from_utf8(&raw)?;
    let chars = text.chars().count();
    if chars > max_chars {
        return Err(ProtocolError::StringTooLong {
            max: max_chars,
            actual: chars,
        });
    }
    Ok(text.to_owned())
}

/// Writes a `VarInt`-length-prefixed UTF-8 string.
pub fn write_string(buf: &mut impl BufMut, value: &str) {
    write_varint(buf, value.len() as i32);
    buf.put_slice(value.as_bytes());
}

/// Fails if `buf` still holds unread bytes.
pub fn expect_end(buf: &impl Buf) -> Result<(), ProtocolError> {
    match buf.remaining() {
        0 => Ok(()),
        n => Err(ProtocolError::TrailingBytes(n)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_round_trip() {
        let mut buf = BytesMut::new();
        write_string(&mut buf, "héllo");
        let mut bytes = buf.freeze();
        assert_eq!(read_string(&mut bytes, 16).unwrap(), "héllo");
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_string_over_char_limit_is_rejected() {
        let mut buf = BytesMut::new();
        write_string(&mut buf, "abcdefghijklmnopq");
        let mut bytes = buf.freeze();
        assert!(matches!(
            read_string(&mut bytes, 16),
            Err(ProtocolError::StringTooLong { max: 16, actual: 17 })
        ));
    }

    #[test]
    fn test_string_byte_length_checked_before_copy() {
        let mut buf = BytesMut::new();
        write_varint(&mut buf, 1_000_000);
        let mut bytes = buf.freeze();
        assert!(matches!(
            read_string(&mut bytes, 16),
            Err(ProtocolError::StringTooLong { .. })
        ));
    }

    #[test]
    fn test_truncated_string_is_unexpected_end() {
        let mut bytes = Bytes::from_static(&[0x05, b'a', b'b']);
        assert!(matches!(
            read_string(&mut bytes, 16),
            Err(ProtocolError::UnexpectedEnd { needed: 5, remaining: 2 })
        ));
    }

    #[test]
    fn test_invalid_utf8_is_rejected() {
        let mut bytes = Bytes::from_static(&[0x02, 0xC3, 0x28]);
        assert!(matches!(
            read_string(&mut bytes, 16),
            Err(ProtocolError::InvalidUtf8(_))
        ));
    }

    #[test]
    fn test_short_integers_are_errors_not_panics() {
        let mut bytes = Bytes::from_static(&[0x01]);
        assert!(read_u16(&mut bytes).is_err());
        assert!(read_i64(&mut Bytes::from_static(&[0; 7])).is_err());
    }

    #[test]
    fn test_expect_end() {
        assert!(expect_end(&Bytes::new()).is_ok());
        assert!(matches!(
            expect_end(&Bytes::from_static(&[1, 2])),
            Err(ProtocolError::TrailingBytes(2))
        ));
    }

    #[test]
    fn test_default_codec_methods_report_misuse() {
        struct Nothing;
        impl Codec for Nothing {
            fn name(&self) -> &'static str {
                "Nothing"
            }
        }

        let ctx = CodecContext::new(ProtocolState::Play, 47);
        let mut buf = BytesMut::new();
        let message = Message::from(crate::message::KeepAlive { id: 1 });
        assert!(matches!(
            Nothing.encode(&ctx, &message, &mut buf),
            Err(ProtocolError::CodecMisuse { operation: "encode", .. })
        ));
        assert!(matches!(
            Nothing.decode(&ctx, &mut Bytes::new()),
            Err(ProtocolError::CodecMisuse { operation: "decode", .. })
        ));
    }
}
