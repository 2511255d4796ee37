//! `Server` builder and accept loop.
//!
//! This is the entry point for running a Blockwire server. It ties the
//! layers together: transport → protocol table → sessions → tick loop.

use std::net::SocketAddr;
use std::sync::Arc;

use blockwire_protocol::{BroadcastCache, RegistrationError, register_vanilla};
use blockwire_session::{Authenticator, SessionProtocolBuilder, SessionSet};
use blockwire_transport::{TcpTransport, Transport, TransportError};
use tokio_util::sync::CancellationToken;

use crate::connection::{ConnectionShared, handle_connection};
use crate::handlers::{ServerContext, register_builtin_handlers};
use crate::tick::run_tick_loop;
use crate::{BlockwireError, ServerConfig};

type ConfigureHook =
    Box<dyn FnOnce(&mut SessionProtocolBuilder) -> Result<(), RegistrationError> + Send>;

/// Builder for configuring and starting a Blockwire server.
///
/// # Example
///
/// ```rust,no_run
/// use blockwire::prelude::*;
///
/// # async fn run() -> Result<(), BlockwireError> {
/// let server = Server::builder()
///     .bind("0.0.0.0:25565")
///     .motd("Welcome")
///     .configure(|protocol| {
///         protocol.register_handler(
///             ProtocolState::Play,
///             MessageKind::ChatInbound,
///             |session: &std::sync::Arc<Session>, message: Message| {
///                 tracing::info!(session = %session.id(), ?message, "chat");
///             },
///             Dispatch::Tick,
///         )?;
///         Ok(())
///     })
///     .build(OfflineAuthenticator)
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct ServerBuilder {
    config: ServerConfig,
    hooks: Vec<ConfigureHook>,
}

impl ServerBuilder {
    /// Creates a builder with the default [`ServerConfig`].
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            hooks: Vec::new(),
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind = addr.to_string();
        self
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn motd(mut self, motd: &str) -> Self {
        self.config.motd = motd.to_string();
        self
    }

    pub fn max_players(mut self, max_players: u32) -> Self {
        self.config.max_players = max_players;
        self
    }

    /// Compression threshold applied at login. Negative disables it.
    pub fn compression_threshold(mut self, threshold: i32) -> Self {
        self.config.compression_threshold = threshold;
        self
    }

    /// Adds registrations to the protocol table.
    ///
    /// Hooks run in the order they were added, after the vanilla codecs
    /// and built-in handlers are in place. A hook that re-registers an
    /// opcode or handler makes [`build`](Self::build) fail.
    pub fn configure<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&mut SessionProtocolBuilder) -> Result<(), RegistrationError> + Send + 'static,
    {
        self.hooks.push(Box::new(hook));
        self
    }

    /// Builds the protocol table and binds the listener.
    ///
    /// # Errors
    /// [`BlockwireError::Registration`] if any registration conflicts,
    /// [`BlockwireError::Transport`] if the address cannot be bound.
    pub async fn build<A: Authenticator>(self, auth: A) -> Result<Server, BlockwireError> {
        let config = self.config;
        let sessions = SessionSet::new();

        let mut protocol = SessionProtocolBuilder::new();
        register_vanilla(&mut protocol)?;
        let ctx = Arc::new(ServerContext {
            config: config.clone(),
            sessions: Arc::clone(&sessions),
            auth,
        });
        register_builtin_handlers(&mut protocol, ctx)?;
        for hook in self.hooks {
            hook(&mut protocol)?;
        }
        let protocol = Arc::new(protocol.build()?);

        let transport = TcpTransport::bind(&config.bind).await?;

        Ok(Server {
            transport,
            shared: ConnectionShared {
                protocol,
                cache: Arc::new(BroadcastCache::new(config.cache_idle())),
                sessions,
                session_config: config.session.clone(),
            },
            config,
            shutdown: CancellationToken::new(),
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Blockwire server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct Server {
    transport: TcpTransport,
    shared: ConnectionShared,
    config: ServerConfig,
    shutdown: CancellationToken,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, BlockwireError> {
        Ok(self.transport.local_addr()?)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Every connected session.
    pub fn sessions(&self) -> &Arc<SessionSet> {
        &self.shared.sessions
    }

    pub fn cache(&self) -> &Arc<BroadcastCache> {
        &self.shared.cache
    }

    /// Token that stops [`run`](Self::run) when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs the accept loop and the tick loop until the shutdown token is
    /// cancelled. Every remaining session is then disconnected with
    /// "Server closed".
    pub async fn run(mut self) -> Result<(), BlockwireError> {
        tracing::info!(
            addr = %self.local_addr()?,
            motd = %self.config.motd,
            "blockwire server running"
        );

        let tick = tokio::spawn(run_tick_loop(
            Arc::clone(&self.shared.sessions),
            Arc::clone(&self.shared.cache),
            self.config.tick.clone(),
            self.shutdown.clone(),
        ));

        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = self.transport.accept() => accepted,
            };
            match accepted {
                Ok(conn) => {
                    tokio::spawn(handle_connection(conn, self.shared.clone()));
                }
                Err(TransportError::Shutdown) => break,
                Err(e) => tracing::error!(error = %e, "accept failed"),
            }
        }

        self.shutdown.cancel();
        self.transport.shutdown().await?;
        let sessions = self.shared.sessions.snapshot();
        for session in &sessions {
            session.disconnect("Server closed");
        }
        if let Err(e) = tick.await {
            tracing::error!(error = %e, "tick loop panicked");
        }

        tracing::info!(disconnected = sessions.len(), "blockwire server stopped");
        Ok(())
    }
}
