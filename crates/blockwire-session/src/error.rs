use blockwire_protocol::{ProtocolError, ProtocolState};

/// Errors that can occur in the session layer.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session has been disconnected; nothing more can be sent.
    #[error("session is closed")]
    Closed,

    /// Compression was enabled earlier and cannot be turned off.
    #[error("compression cannot be disabled once enabled")]
    CompressionLocked,

    /// The requested protocol state change is not allowed.
    #[error("illegal protocol state transition {from} -> {to}")]
    IllegalTransition {
        from: ProtocolState,
        to: ProtocolState,
    },

    /// A write-once field was written twice.
    #[error("{0} is already set")]
    AlreadySet(&'static str),

    /// Encoding, decoding, or processing a message failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The authenticator rejected the player.
    #[error("authentication failed: {0}")]
    AuthFailed(String),
}
