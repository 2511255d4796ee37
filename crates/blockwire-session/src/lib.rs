//! Session layer for Blockwire.
//!
//! A [`Session`] is the server's view of one client connection: its
//! protocol state, negotiated version, outbound queue, compression
//! threshold and liveness. The [`SessionSet`] tracks every live session so
//! the tick loop can pulse them and broadcasts can reach them.
//!
//! ```text
//! read task ──► Session::receive_frame ──► handlers
//! anyone    ──► Session::send ──► outbox ──(pulse)──► writer task
//! tick loop ──► SessionSet::pulse_all
//! ```

#![allow(async_fn_in_trait)]

mod auth;
mod error;
mod manager;
mod session;

pub use auth::{Authenticator, GameProfile, OfflineAuthenticator};
pub use error::SessionError;
pub use manager::SessionSet;
pub use session::{
    Outbound, Session, SessionConfig, SessionProtocol, SessionProtocolBuilder,
};
