//! # Blockwire
//!
//! Wire-protocol engine for multiplayer block-game servers.
//!
//! Blockwire accepts TCP connections, frames and optionally compresses
//! the byte stream, walks every connection through the
//! HANDSHAKE → STATUS | LOGIN → PLAY state machine and hands typed
//! [`Message`](blockwire_protocol::Message)s to registered handlers.
//! Outgoing messages go through processors and a broadcast cache that
//! encodes identical traffic once for every recipient.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use blockwire::prelude::*;
//!
//! # async fn run() -> Result<(), BlockwireError> {
//! blockwire::init_tracing();
//!
//! let server = Server::builder()
//!     .bind("0.0.0.0:25565")
//!     .build(OfflineAuthenticator)
//!     .await?;
//! server.run().await
//! # }
//! ```
//!
//! The server answers server-list pings, logs players in offline and
//! relays chat out of the box. Everything else is added through
//! [`ServerBuilder::configure`].

mod config;
mod connection;
mod error;
mod handlers;
mod server;
pub mod tick;

pub use blockwire_protocol as protocol;
pub use blockwire_session as session;
pub use blockwire_transport as transport;

pub use config::ServerConfig;
pub use error::BlockwireError;
pub use server::{Server, ServerBuilder};
pub use tick::TickConfig;

/// Installs a `tracing` subscriber that prints to stderr.
///
/// The filter comes from `RUST_LOG` and defaults to `info`. Call once,
/// early in `main`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

/// The types most servers need.
pub mod prelude {
    pub use blockwire_protocol::message::*;
    pub use blockwire_protocol::{
        BroadcastCache, Dispatch, EqualHash, HashGenerator, Message,
        MessageKind, PROTOCOL_VERSION, Processor, ProtocolError,
        ProtocolState, ProtocolVersionHash, RegistrationError, VERSION_NAME,
    };
    pub use blockwire_session::{
        Authenticator, GameProfile, OfflineAuthenticator, Session,
        SessionConfig, SessionError, SessionProtocolBuilder, SessionSet,
    };

    pub use crate::{BlockwireError, Server, ServerBuilder, ServerConfig, TickConfig};
}
