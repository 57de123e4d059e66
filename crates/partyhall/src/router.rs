//! Per-connection dispatch: login, message routing and outbound delivery.
//!
//! Each accepted connection gets its own Tokio task running this router.
//! The task waits on five things at once:
//!   1. inbound frames (text → `ClientMessage`, binary → `TickFrame`)
//!   2. the player's outbound queue, fed by the room actor
//!   3. lobby events from the registry broadcast (after login)
//!   4. a kick from a newer login of the same player
//!   5. the liveness check, every heartbeat interval
//!
//! Errors from a single message become `ServerMessage::Error` and the loop
//! continues. Only transport failures end the connection.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use partyhall_protocol::{
    codes, ClientMessage, Codec, Credentials, PlayerId, ProtocolError, ServerMessage, TickFrame,
};
use partyhall_room::{Outbound, RoomOptions};
use partyhall_session::Authenticator;
use partyhall_transport::{Connection, ConnectionId, WebSocketConnection, WireMessage};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::server::ServerState;
use crate::PartyhallError;

/// What the connection does after a message.
enum Flow {
    Continue,
    Close,
}

/// Why the serve loop ended.
#[derive(Debug, Clone, Copy)]
enum Exit {
    /// The socket closed, failed or went silent.
    Dropped,
    LoggedOut,
    /// A newer login took the player over.
    Kicked,
}

#[derive(Debug, Clone)]
struct Player {
    id: PlayerId,
    name: String,
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<A: Authenticator>(
    conn: WebSocketConnection,
    state: Arc<ServerState<A>>,
) -> Result<(), PartyhallError> {
    let conn_id = conn.id();
    debug!(%conn_id, peer = %conn.peer_addr(), "handling new connection");

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let mut link = Link {
        conn: &conn,
        conn_id,
        state: &state,
        outbound_tx,
        outbound_rx,
        lobby: None,
        kicked: Arc::new(Notify::new()),
        player: None,
    };

    let result = link.serve().await;
    let exit = match &result {
        Ok(exit) => *exit,
        Err(_) => Exit::Dropped,
    };
    link.finish(exit).await;
    let _ = conn.close().await;
    result.map(|_| ())
}

/// One connection's view of the server.
struct Link<'a, A: Authenticator> {
    conn: &'a WebSocketConnection,
    conn_id: ConnectionId,
    state: &'a ServerState<A>,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    lobby: Option<broadcast::Receiver<ServerMessage>>,
    kicked: Arc<Notify>,
    player: Option<Player>,
}

impl<A: Authenticator> Link<'_, A> {
    async fn serve(&mut self) -> Result<Exit, PartyhallError> {
        let period = self.state.heartbeat_interval;
        let mut liveness = time::interval_at(Instant::now() + period, period);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let conn = self.conn;

        loop {
            tokio::select! {
                inbound = conn.recv() => match inbound {
                    Ok(Some(msg)) => {
                        if matches!(self.route(msg).await?, Flow::Close) {
                            return Ok(Exit::LoggedOut);
                        }
                    }
                    Ok(None) => {
                        info!(conn_id = %self.conn_id, "connection closed cleanly");
                        return Ok(Exit::Dropped);
                    }
                    Err(e) => {
                        debug!(conn_id = %self.conn_id, error = %e, "recv error");
                        return Ok(Exit::Dropped);
                    }
                },
                Some(outbound) = self.outbound_rx.recv() => self.deliver(outbound).await?,
                event = next_lobby_event(&mut self.lobby) => self.send(&event).await?,
                () = self.kicked.notified() => {
                    self.send(&ServerMessage::Error {
                        code: codes::CONFLICT,
                        message: "logged in elsewhere".into(),
                    })
                    .await?;
                    return Ok(Exit::Kicked);
                }
                _ = liveness.tick() => {
                    if conn.liveness().is_stale(self.state.heartbeat_timeout) {
                        info!(
                            conn_id = %self.conn_id,
                            idle_secs = conn.liveness().idle_for().as_secs(),
                            "heartbeat timed out"
                        );
                        return Ok(Exit::Dropped);
                    }
                }
            }
        }
    }

    /// Cleans up after the loop. A dropped connection keeps the player's
    /// seat and session for the grace period.
    async fn finish(&mut self, exit: Exit) {
        let Some(player) = self.player.take() else {
            return;
        };
        match exit {
            Exit::Kicked | Exit::LoggedOut => {}
            Exit::Dropped => {
                if !self.state.release(player.id, self.conn_id) {
                    return;
                }
                self.state.registry.disconnect(player.id).await;
                if let Err(e) = self.state.sessions.lock().await.disconnect(player.id) {
                    debug!(player_id = %player.id, error = %e, "no session to disconnect");
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Routes one inbound frame. Per-message errors are reported to the
    /// client; only transport errors are returned.
    async fn route(&mut self, msg: WireMessage) -> Result<Flow, PartyhallError> {
        let result = match msg {
            WireMessage::Text(text) => match self.state.codec.decode::<ClientMessage>(text.as_bytes()) {
                Ok(message) => self.dispatch(message).await,
                Err(e) => Err(e.into()),
            },
            WireMessage::Binary(data) => self.dispatch_frame(&data).await.map(|()| Flow::Continue),
        };

        match result {
            Ok(flow) => Ok(flow),
            Err(e @ PartyhallError::Transport(_)) => Err(e),
            Err(e) => {
                debug!(conn_id = %self.conn_id, code = e.code(), error = %e, "message rejected");
                self.send(&ServerMessage::Error {
                    code: e.code(),
                    message: e.to_string(),
                })
                .await?;
                Ok(Flow::Continue)
            }
        }
    }

    async fn dispatch(&mut self, message: ClientMessage) -> Result<Flow, PartyhallError> {
        let state = self.state;
        let registry = &state.registry;

        match message {
            ClientMessage::Heartbeat { client_time } => {
                self.send(&ServerMessage::HeartbeatAck {
                    client_time,
                    server_time: unix_millis(),
                })
                .await?;
            }
            ClientMessage::Login { credentials } => self.login(credentials).await?,
            ClientMessage::Logout => {
                let player = self.require_login()?;
                self.logout(player).await;
                return Ok(Flow::Close);
            }
            ClientMessage::CreateRoom {
                mode,
                name,
                password,
                board_size,
            } => {
                let player = self.require_login()?;
                registry.create_room(
                    mode,
                    player.id,
                    player.name,
                    self.outbound_tx.clone(),
                    RoomOptions {
                        name,
                        password,
                        board_size,
                    },
                )?;
            }
            ClientMessage::JoinRoom { room_id, password } => {
                let player = self.require_login()?;
                registry
                    .join_room(room_id, player.id, player.name, self.outbound_tx.clone(), password)
                    .await?;
            }
            ClientMessage::QuickMatch { mode } => {
                let player = self.require_login()?;
                registry
                    .quick_match(mode, player.id, player.name, self.outbound_tx.clone())
                    .await?;
            }
            ClientMessage::LeaveRoom { room_id } => {
                let player = self.require_login()?;
                registry.leave_room(room_id, player.id).await?;
            }
            ClientMessage::ListRooms { mode } => {
                self.require_login()?;
                let rooms = registry.list_rooms(mode);
                self.send(&ServerMessage::RoomList { rooms }).await?;
            }
            ClientMessage::SetReady { room_id, ready } => {
                let player = self.require_login()?;
                registry.set_ready(room_id, player.id, ready).await?;
            }
            ClientMessage::StartGame { room_id } => {
                let player = self.require_login()?;
                registry.start_game(room_id, player.id).await?;
            }
            ClientMessage::Action { room_id, seq, payload } => {
                let player = self.require_login()?;
                registry.submit_action(room_id, player.id, seq, payload).await?;
            }
            ClientMessage::AckSnapshot { room_id, tick } => {
                let player = self.require_login()?;
                registry.ack_snapshot(room_id, player.id, tick).await?;
            }
            ClientMessage::ReportDesync { room_id, tick } => {
                let player = self.require_login()?;
                debug!(%room_id, player_id = %player.id, tick, "client reported desync");
                registry.report_desync(room_id, player.id, tick).await?;
            }
        }
        Ok(Flow::Continue)
    }

    async fn dispatch_frame(&mut self, data: &[u8]) -> Result<(), PartyhallError> {
        let player = self.require_login()?;
        match TickFrame::decode(data)? {
            TickFrame::Input(frame) => {
                self.state.registry.submit_input(player.id, frame).await?;
                Ok(())
            }
            TickFrame::Snapshot(_) => Err(ProtocolError::InvalidMessage(
                "snapshots only travel server to client".into(),
            )
            .into()),
        }
    }

    fn require_login(&self) -> Result<Player, PartyhallError> {
        self.player.clone().ok_or(PartyhallError::LoginRequired)
    }

    // -----------------------------------------------------------------------
    // Login / logout
    // -----------------------------------------------------------------------

    /// Authenticates the connection and, if the player still holds a seat,
    /// puts them back in it.
    async fn login(&mut self, credentials: Credentials) -> Result<(), PartyhallError> {
        if let Some(player) = &self.player {
            return Err(PartyhallError::AlreadyLoggedIn(player.id));
        }

        let resume = credentials.resume.as_deref().filter(|token| !token.is_empty());
        let outcome = match resume {
            Some(token) => self.state.sessions.lock().await.resume(token)?,
            None => {
                let identity = self.state.auth.authenticate(&credentials).await?;
                self.state.sessions.lock().await.login(identity)
            }
        };
        let session = outcome.session;
        let player = Player {
            id: session.player_id,
            name: session.name,
        };

        self.state
            .claim(player.id, self.conn_id, Arc::clone(&self.kicked));
        self.lobby = Some(self.state.registry.subscribe());
        self.player = Some(player.clone());

        let room = self
            .state
            .registry
            .reconnect(player.id, self.outbound_tx.clone())
            .await;
        info!(
            conn_id = %self.conn_id,
            player_id = %player.id,
            resumed = resume.is_some(),
            replaced = outcome.replaced,
            room = ?room,
            "player logged in"
        );

        // Sent directly, so it lands before anything the room queued.
        self.send(&ServerMessage::LoginOk {
            player_id: player.id,
            session_token: self.state.signer.issue(player.id, &player.name),
            name: player.name,
            resume_token: session.reconnect_token,
            room,
        })
        .await
    }

    async fn logout(&mut self, player: Player) {
        let state = self.state;
        let registry = &state.registry;
        if let Some(room_id) = registry.room_of(player.id) {
            if let Err(e) = registry.leave_room(room_id, player.id).await {
                debug!(player_id = %player.id, error = %e, "leave on logout failed");
            }
        }
        self.state.sessions.lock().await.logout(player.id);
        self.state.release(player.id, self.conn_id);
        self.player = None;
        self.lobby = None;
        info!(conn_id = %self.conn_id, player_id = %player.id, "player logged out");
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    async fn deliver(&self, outbound: Outbound) -> Result<(), PartyhallError> {
        match outbound {
            Outbound::Message(message) => self.send(&message).await,
            Outbound::Frame(frame) => {
                let data = frame.encode()?;
                self.conn.send(WireMessage::Binary(data)).await?;
                Ok(())
            }
        }
    }

    async fn send(&self, message: &ServerMessage) -> Result<(), PartyhallError> {
        let text = self.state.codec.encode_text(message)?;
        self.conn.send(WireMessage::Text(text)).await?;
        Ok(())
    }
}

/// The next lobby event, or never when the connection isn't subscribed.
async fn next_lobby_event(lobby: &mut Option<broadcast::Receiver<ServerMessage>>) -> ServerMessage {
    let Some(rx) = lobby else {
        return std::future::pending().await;
    };
    loop {
        match rx.recv().await {
            Ok(event) => return event,
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "slow connection missed lobby events");
            }
            Err(RecvError::Closed) => return std::future::pending().await,
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
