use crate::varint::VarIntError;

/// Errors from decoding or encoding a single frame.
///
/// Every variant is fatal for the connection that produced it.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Reading or writing the socket failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A length or data-length prefix was not a valid `VarInt`.
    #[error("bad length prefix: {0}")]
    VarInt(#[from] VarIntError),

    /// The frame, or the body it inflates to, is over the protocol limit.
    #[error("frame of {0} bytes exceeds the protocol limit")]
    FrameTooLarge(usize),

    /// The length prefix decoded to a negative number.
    #[error("negative frame length {0}")]
    NegativeLength(i32),

    /// A compressed frame was malformed or lied about its size.
    #[error("bad compressed frame: {0}")]
    BadCompression(String),
}

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Binding the listener failed.
    #[error("bind failed: {0}")]
    BindFailed(#[source] std::io::Error),

    /// Accepting a connection failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// The transport was shut down.
    #[error("transport shut down")]
    Shutdown,
}
