//! Protocol states and the transitions between them.
//!
//! ```text
//!             ┌──► STATUS
//! HANDSHAKE ──┤
//!             └──► LOGIN ──► PLAY
//! ```
//!
//! Every state owns one inbound and one outbound opcode table. There is no
//! way back: a connection that has left HANDSHAKE never sees it again, and
//! PLAY is terminal until the connection closes.

use std::fmt;

/// The protocol state of a connection. Selects which opcode table applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum ProtocolState {
    /// First state of every connection. Only the handshake is accepted.
    #[default]
    Handshake,
    /// Server list ping: status request and latency ping.
    Status,
    /// Login sequence up to `LoginSuccess`.
    Login,
    /// In game.
    Play,
}

impl ProtocolState {
    /// All states, in table order.
    pub const ALL: [ProtocolState; 4] = [
        ProtocolState::Handshake,
        ProtocolState::Status,
        ProtocolState::Login,
        ProtocolState::Play,
    ];

    /// Maps the handshake's `next_state` field to a state.
    ///
    /// Only `1` (status) and `2` (login) are valid.
    pub fn from_handshake_id(id: i32) -> Option<Self> {
        match id {
            1 => Some(ProtocolState::Status),
            2 => Some(ProtocolState::Login),
            _ => None,
        }
    }

    /// Whether a connection in `self` may move to `next`.
    pub fn can_transition_to(self, next: ProtocolState) -> bool {
        matches!(
            (self, next),
            (ProtocolState::Handshake, ProtocolState::Status)
                | (ProtocolState::Handshake, ProtocolState::Login)
                | (ProtocolState::Login, ProtocolState::Play)
        )
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolState::Handshake => "HANDSHAKE",
            ProtocolState::Status => "STATUS",
            ProtocolState::Login => "LOGIN",
            ProtocolState::Play => "PLAY",
        };
        f.write_str(name)
    }
}

/// Which way a packet travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client to server.
    Inbound,
    /// Server to client.
    Outbound,
}

impl Direction {
    /// Both directions, in table order.
    pub const ALL: [Direction; 2] = [Direction::Inbound, Direction::Outbound];

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => f.write_str("inbound"),
            Direction::Outbound => f.write_str("outbound"),
        }
    }
}
