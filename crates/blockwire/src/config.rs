//! Server configuration.

use std::time::Duration;

use blockwire_session::SessionConfig;
use serde::Deserialize;

use crate::tick::TickConfig;

/// Everything a [`Server`](crate::Server) needs to know before it binds.
///
/// Every field has a default, so a config file only has to name what it
/// changes:
///
/// ```rust
/// use blockwire::ServerConfig;
///
/// let config = ServerConfig::from_json(r#"{ "max_players": 64 }"#).unwrap();
/// assert_eq!(config.max_players, 64);
/// assert_eq!(config.compression_threshold, 256);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the listener binds to.
    pub bind: String,

    /// Text shown under the server name in the server list.
    pub motd: String,

    pub max_players: u32,

    /// Packets at least this large are zlib-compressed once a player has
    /// logged in. Negative disables compression.
    pub compression_threshold: i32,

    /// Base64 PNG shown in the server list, including its
    /// `data:image/png;base64,` prefix.
    pub favicon: Option<String>,

    /// How long an unused broadcast cache entry is kept.
    pub cache_idle_secs: u64,

    pub session: SessionConfig,
    pub tick: TickConfig,
}

impl ServerConfig {
    /// Parses a JSON config. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn cache_idle(&self) -> Duration {
        Duration::from_secs(self.cache_idle_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:25565".to_string(),
            motd: "A Blockwire server".to_string(),
            max_players: 20,
            compression_threshold: 256,
            favicon: None,
            cache_idle_secs: 10,
            session: SessionConfig::default(),
            tick: TickConfig::default(),
        }
    }
}
