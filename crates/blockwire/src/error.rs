//! Unified error type for Blockwire.

use blockwire_protocol::{ProtocolError, RegistrationError};
use blockwire_session::SessionError;
use blockwire_transport::{FrameError, TransportError};

/// Top-level error that wraps every crate-specific error.
///
/// Each variant converts with `?` from the error of the crate it names.
#[derive(Debug, thiserror::Error)]
pub enum BlockwireError {
    /// Binding or accepting failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A frame could not be read or written.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// A packet could not be encoded, decoded or processed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The protocol table was misconfigured at startup.
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    Session(#[from] SessionError),

    /// The configuration could not be parsed.
    #[error("invalid config: {0}")]
    Config(#[from] serde_json::Error),
}
