//! The closed set of messages the engine understands.
//!
//! Each packet kind has a payload struct holding only its decoded fields.
//! [`Message`] wraps them in one enum so registries, processors and the
//! broadcast cache can treat every packet uniformly, and [`MessageKind`] is
//! the fieldless tag used as a registry key.
//!
//! Messages are plain values: `Clone + Eq + Hash`, never mutated after
//! construction. The broadcast cache relies on the `Eq` and `Hash` impls.

/// Generates [`Message`], [`MessageKind`], `Message::kind`, and a
/// `From<Payload> for Message` impl for every payload struct.
macro_rules! messages {
    ($( $(#[$doc:meta])* $name:ident, )*) => {
        /// A decoded packet, or an internal message that processors expand
        /// into packets.
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum Message {
            $( $(#[$doc])* $name($name), )*
        }

        /// Tag identifying a [`Message`] variant.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum MessageKind {
            $( $(#[$doc])* $name, )*
        }

        impl Message {
            /// Returns the tag of this message.
            pub fn kind(&self) -> MessageKind {
                match self {
                    $( Message::$name(_) => MessageKind::$name, )*
                }
            }
        }

        $(
            impl From<$name> for Message {
                fn from(message: $name) -> Self {
                    Message::$name(message)
                }
            }
        )*
    };
}

messages! {
    /// First packet of every connection.
    Handshake,
    /// Client asks for the server list entry.
    StatusRequest,
    /// Server list entry as JSON.
    StatusResponse,
    /// Client latency probe.
    StatusPing,
    /// Echo of a [`StatusPing`].
    StatusPong,
    /// Client announces its player name.
    LoginStart,
    /// Login finished; the connection moves to PLAY.
    LoginSuccess,
    /// Enables compression for everything after this packet.
    SetCompression,
    /// Server closes the connection with a reason.
    Disconnect,
    /// Liveness probe, same shape in both directions.
    KeepAlive,
    /// Chat line typed by the player.
    ChatInbound,
    /// Chat component shown to the player.
    Chat,
    /// Title or subtitle text.
    TitleText,
    /// Title fade timings.
    TitleTimes,
    /// Hides the current title.
    TitleClear,
    /// Hides the title and resets its timings.
    TitleReset,
    /// Internal: a complete title change, split into packets by
    /// [`TitleProcessor`](crate::TitleProcessor).
    TitleUpdate,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Handshake {
    pub protocol_version: i32,
    pub server_address: String,
    pub server_port: u16,
    /// `1` for status, `2` for login. Anything else is rejected.
    pub next_state: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct StatusRequest;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatusResponse {
    pub json: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusPing {
    pub payload: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusPong {
    pub payload: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoginStart {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoginSuccess {
    /// Hyphenated UUID string.
    pub uuid: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SetCompression {
    /// Minimum body size that gets compressed. Negative disables.
    pub threshold: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Disconnect {
    /// Chat component JSON.
    pub json: String,
}

impl Disconnect {
    /// Builds a disconnect carrying a plain-text reason.
    pub fn from_text(reason: &str) -> Self {
        Self {
            json: text_component(reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeepAlive {
    pub id: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChatInbound {
    pub message: String,
}

/// Where a [`Chat`] message is displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ChatPosition {
    #[default]
    Chat = 0,
    System = 1,
    ActionBar = 2,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Chat {
    pub json: String,
    pub position: ChatPosition,
}

impl Chat {
    /// Builds a chat-box message from plain text.
    pub fn from_text(text: &str) -> Self {
        Self {
            json: text_component(text),
            position: ChatPosition::Chat,
        }
    }
}

/// Which line of the title a [`TitleText`] sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TitleSlot {
    Title,
    Subtitle,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TitleText {
    pub slot: TitleSlot,
    pub json: String,
}

/// Durations in ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TitleTimes {
    pub fade_in: i32,
    pub stay: i32,
    pub fade_out: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TitleClear;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TitleReset;

/// A whole title change. Plain text, turned into components when split.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TitleUpdate {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub times: Option<TitleTimes>,
}

/// Wraps plain text in a chat component: `{"text":"..."}`.
pub fn text_component(text: &str) -> String {
    serde_json::json!({ "text": text }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        let message: Message = KeepAlive { id: 3 }.into();
        assert_eq!(message.kind(), MessageKind::KeepAlive);

        let message = Message::from(TitleUpdate::default());
        assert_eq!(message.kind(), MessageKind::TitleUpdate);
    }

    #[test]
    fn test_text_component_escapes_quotes() {
        assert_eq!(text_component("hi"), r#"{"text":"hi"}"#);
        assert_eq!(text_component(r#"say "x""#), r#"{"text":"say \"x\""}"#);
    }

    #[test]
    fn test_disconnect_from_text() {
        let message = Disconnect::from_text("Timed out");
        assert_eq!(message.json, r#"{"text":"Timed out"}"#);
    }
}
