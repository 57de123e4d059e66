//! `PartyhallServer` builder and server loop.
//!
//! This is the entry point for running a partyhall server. It ties
//! together all the layers: transport → protocol → session → rooms.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use partyhall_protocol::{JsonCodec, PlayerId};
use partyhall_room::RoomRegistry;
use partyhall_session::{Authenticator, SessionManager, TokenAuthenticator, TokenSigner};
use partyhall_transport::{ConnectionId, Transport, WebSocketTransport};
use tokio::sync::Notify;
use tracing::{debug, error, info};

use crate::router::handle_connection;
use crate::{PartyhallError, ServerConfig};

/// The connection currently speaking for a logged-in player.
pub(crate) struct Presence {
    pub(crate) conn: ConnectionId,
    /// Wakes that connection so it closes with "logged in elsewhere".
    pub(crate) kick: Arc<Notify>,
}

/// Shared server state passed to each connection task.
pub(crate) struct ServerState<A: Authenticator> {
    pub(crate) sessions: tokio::sync::Mutex<SessionManager>,
    pub(crate) registry: RoomRegistry,
    pub(crate) auth: A,
    pub(crate) signer: TokenSigner,
    pub(crate) codec: JsonCodec,
    pub(crate) heartbeat_interval: Duration,
    pub(crate) heartbeat_timeout: Duration,
    presence: Mutex<HashMap<PlayerId, Presence>>,
}

impl<A: Authenticator> ServerState<A> {
    fn presence(&self) -> MutexGuard<'_, HashMap<PlayerId, Presence>> {
        self.presence.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes `conn` the player's connection. Any previous connection is
    /// kicked.
    pub(crate) fn claim(&self, player_id: PlayerId, conn: ConnectionId, kick: Arc<Notify>) {
        let previous = self.presence().insert(player_id, Presence { conn, kick });
        if let Some(previous) = previous.filter(|p| p.conn != conn) {
            info!(%player_id, old = %previous.conn, new = %conn, "kicking previous connection");
            previous.kick.notify_one();
        }
    }

    /// Drops the player's presence if `conn` still owns it. Returns `false`
    /// when another connection has taken over.
    pub(crate) fn release(&self, player_id: PlayerId, conn: ConnectionId) -> bool {
        let mut presence = self.presence();
        match presence.get(&player_id) {
            Some(current) if current.conn == conn => {
                presence.remove(&player_id);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn online(&self) -> usize {
        self.presence().len()
    }
}

/// Builder for configuring and starting a partyhall server.
///
/// # Example
///
/// ```rust,ignore
/// use partyhall::prelude::*;
///
/// let server = PartyhallServer::builder()
///     .bind("0.0.0.0:8765")
///     .build()
///     .await?;
/// server.run().await
/// ```
pub struct PartyhallServerBuilder {
    config: ServerConfig,
}

impl PartyhallServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    /// Builds the server with the token/guest authenticator.
    pub async fn build(self) -> Result<PartyhallServer<TokenAuthenticator>, PartyhallError> {
        let signer = self.signer()?;
        let auth = TokenAuthenticator::new(signer, self.config.allow_guests);
        self.build_with(auth).await
    }

    /// Builds the server around a custom authenticator. Session tokens
    /// handed out at login are still signed with the configured secret.
    pub async fn build_with<A: Authenticator>(
        self,
        auth: A,
    ) -> Result<PartyhallServer<A>, PartyhallError> {
        let transport = WebSocketTransport::bind(&self.config.bind_addr).await?;

        let state = Arc::new(ServerState {
            sessions: tokio::sync::Mutex::new(SessionManager::new(self.config.session.clone())),
            registry: RoomRegistry::new(self.config.registry.clone()),
            auth,
            signer: self.signer()?,
            codec: JsonCodec,
            heartbeat_interval: self.config.heartbeat_interval,
            heartbeat_timeout: self.config.heartbeat_timeout,
            presence: Mutex::new(HashMap::new()),
        });

        Ok(PartyhallServer { transport, state })
    }

    fn signer(&self) -> Result<TokenSigner, PartyhallError> {
        Ok(TokenSigner::new(&self.config.session_secret, self.config.token_ttl)?)
    }
}

impl Default for PartyhallServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound partyhall server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct PartyhallServer<A: Authenticator> {
    transport: WebSocketTransport,
    state: Arc<ServerState<A>>,
}

impl PartyhallServer<TokenAuthenticator> {
    /// Creates a new builder.
    pub fn builder() -> PartyhallServerBuilder {
        PartyhallServerBuilder::new()
    }
}

impl<A: Authenticator> PartyhallServer<A> {
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, PartyhallError> {
        Ok(self.transport.local_addr()?)
    }

    /// The room registry this server routes into.
    pub fn registry(&self) -> RoomRegistry {
        self.state.registry.clone()
    }

    /// Runs the accept loop until the process is terminated.
    pub async fn run(self) -> Result<(), PartyhallError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the accept loop until `shutdown` resolves, then closes every
    /// room.
    ///
    /// Each accepted connection gets its own task running the router. A
    /// background sweep expires sessions whose grace period has passed.
    pub async fn run_until(
        mut self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), PartyhallError> {
        info!(addr = ?self.transport.local_addr().ok(), "partyhall server running");
        let sweeper = tokio::spawn(sweep_sessions(Arc::clone(&self.state)));
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.transport.accept() => match accepted {
                    Ok(conn) => {
                        let state = Arc::clone(&self.state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(conn, state).await {
                                debug!(error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "accept failed");
                    }
                },
                () = &mut shutdown => break,
            }
        }

        info!(online = self.state.online(), "shutting down");
        sweeper.abort();
        self.transport.shutdown().await?;
        self.state.registry.shutdown().await;
        Ok(())
    }
}

async fn sweep_sessions<A: Authenticator>(state: Arc<ServerState<A>>) {
    let mut interval = tokio::time::interval(state.heartbeat_interval);
    loop {
        interval.tick().await;
        let mut sessions = state.sessions.lock().await;
        let expired = sessions.expire_stale();
        sessions.cleanup_expired();
        if !expired.is_empty() {
            debug!(count = expired.len(), "expired sessions removed");
        }
    }
}
