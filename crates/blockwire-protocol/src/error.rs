//! Error types for the protocol layer.
//!
//! [`ProtocolError`] covers everything that can go wrong turning a frame
//! body into a [`Message`](crate::Message) or back. [`RegistrationError`]
//! is only produced while the protocol table is being built, and is fatal
//! for server startup.

use blockwire_transport::VarIntError;

use crate::message::MessageKind;
use crate::state::{Direction, ProtocolState};

/// Errors from encoding, decoding, or processing a message.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// A `VarInt` field was malformed.
    #[error("bad varint: {0}")]
    VarInt(#[from] VarIntError),

    /// A field needed more bytes than the packet had left.
    #[error("packet ended early: needed {needed} bytes, {remaining} left")]
    UnexpectedEnd { needed: usize, remaining: usize },

    /// A string field was longer than its declared maximum.
    #[error("string of {actual} characters exceeds maximum of {max}")]
    StringTooLong { max: usize, actual: usize },

    /// A string field was not valid UTF-8.
    #[error("string is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// A field held a value outside its allowed range.
    #[error("invalid field value: {0}")]
    InvalidValue(String),

    /// The codec finished but bytes were left in the packet.
    #[error("{0} trailing bytes after packet")]
    TrailingBytes(usize),

    /// No codec is registered for this opcode in the active state.
    #[error("unknown opcode {opcode:#04x} in state {state}")]
    UnknownOpcode { state: ProtocolState, opcode: i32 },

    /// The message kind has no outbound codec in the active state.
    #[error("message {kind:?} cannot be sent in state {state}")]
    NotEncodable {
        state: ProtocolState,
        kind: MessageKind,
    },

    /// A codec was asked to do something it does not support, or was
    /// handed a message of a kind it does not serialize.
    #[error("codec {codec} cannot {operation} {kind:?}")]
    CodecMisuse {
        codec: &'static str,
        operation: &'static str,
        kind: Option<MessageKind>,
    },

    /// A processor rejected the message.
    #[error("processor failed: {0}")]
    Processor(String),

    /// Building or parsing a JSON text field failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from building the protocol table. All are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    /// Two codecs claimed the same opcode.
    #[error("opcode {opcode:#04x} already bound in {state} {direction}")]
    DuplicateOpcode {
        state: ProtocolState,
        direction: Direction,
        opcode: i32,
    },

    /// A message kind was bound to a second codec.
    #[error("message {kind:?} already has a codec in {state} {direction}")]
    DuplicateMessage {
        state: ProtocolState,
        direction: Direction,
        kind: MessageKind,
    },

    /// A message kind was given a second handler.
    #[error("message {kind:?} already has a handler in {state}")]
    DuplicateHandler {
        state: ProtocolState,
        kind: MessageKind,
    },

    /// A codec was bound in a direction it cannot serve.
    #[error("codec {codec} cannot be used for {direction} messages")]
    CodecDirection {
        codec: &'static str,
        direction: Direction,
    },

    /// Handlers only receive inbound messages.
    #[error("cannot bind a handler for outbound message {kind:?} in {state}")]
    HandlerOnOutbound {
        state: ProtocolState,
        kind: MessageKind,
    },

    /// A cached outbound message has neither a codec nor processors, so
    /// it could never produce bytes.
    #[error("cached message {kind:?} in {state} has no codec or processor")]
    Unencodable {
        state: ProtocolState,
        kind: MessageKind,
    },
}
