//! Message layer for Blockwire.
//!
//! This crate turns frame bodies into typed [`Message`]s and back:
//!
//! - [`message`]: the closed set of messages and their payload structs.
//! - [`codec`] / [`codecs`]: the codec contract and the vanilla codecs.
//! - [`ProtocolState`]: HANDSHAKE, STATUS, LOGIN, PLAY and the legal moves
//!   between them.
//! - [`ProtocolBuilder`] / [`ProtocolTable`]: opcode tables plus the
//!   handler, processor and cache bindings of every message kind.
//! - [`BroadcastCache`]: shares processed and encoded output between the
//!   recipients of one broadcast.
//!
//! ```text
//! frame body → ProtocolTable::decode → processors → Handler<S>
//! Message → processors → BroadcastCache → codec → frame body
//! ```
//!
//! It knows nothing about sockets or sessions; handlers are generic over
//! the session type.

pub mod cache;
pub mod codec;
pub mod codecs;
mod error;
pub mod message;
pub mod pipeline;
pub mod registry;
mod state;
pub mod vanilla;

pub use cache::{
    BroadcastCache, CachedOutput, EqualHash, HashGenerator, ProtocolVersionHash,
};
pub use codec::{Codec, CodecContext};
pub use error::{ProtocolError, RegistrationError};
pub use message::{Message, MessageKind};
pub use pipeline::{Processor, TitleProcessor};
pub use registry::{
    Dispatch, Handler, HandlerBinding, MessageRegistration, MessageRegistry,
    ProtocolBuilder, ProtocolTable,
};
pub use state::{Direction, ProtocolState};
pub use vanilla::{PROTOCOL_VERSION, VERSION_NAME, register_vanilla};
