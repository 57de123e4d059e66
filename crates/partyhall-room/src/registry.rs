//! Room registry: creates rooms, tracks who sits where, and serves the
//! lobby list.
//!
//! The registry never holds game state. It keeps a directory with one
//! entry per room (the actor's handle plus a cached [`RoomSummary`]) and
//! a player index enforcing that a player sits in at most one room. Room
//! actors call back into the directory when their seats change, so the
//! lobby list is answered without messaging any actor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use partyhall_protocol::{
    GameMode, InputFrame, LifecycleState, PlayerId, RoomId, RoomSummary, ServerMessage,
};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::room::RoomActor;
use crate::{
    CapacityError, PlayerSender, RegistryConfig, RoomConfig, RoomError, RoomHandle, RoomOptions,
};

/// Room ids are never reused while the process lives.
static NEXT_ROOM_ID: AtomicU64 = AtomicU64::new(1);

/// Lobby events buffered per subscriber before the slowest one lags.
const LOBBY_CHANNEL_SIZE: usize = 256;

struct Entry {
    handle: RoomHandle,
    summary: RoomSummary,
}

#[derive(Default)]
struct Directory {
    rooms: HashMap<RoomId, Entry>,
    /// Each player's room. A player appears here from the moment a join is
    /// reserved until their seat is vacated.
    players: HashMap<PlayerId, RoomId>,
}

/// State shared between the registry and every room actor.
pub(crate) struct Shared {
    directory: Mutex<Directory>,
    lobby: broadcast::Sender<ServerMessage>,
    config: RegistryConfig,
}

impl Shared {
    /// The lock is held for bookkeeping only; never across an `.await`.
    fn lock(&self) -> MutexGuard<'_, Directory> {
        self.directory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A room's seats or lifecycle changed.
    pub(crate) fn publish(&self, summary: RoomSummary) {
        {
            let mut directory = self.lock();
            let Some(entry) = directory.rooms.get_mut(&summary.room_id) else {
                return;
            };
            entry.summary = summary.clone();
        }
        let _ = self.lobby.send(ServerMessage::RoomListed { room: summary });
    }

    /// Drops `player` from the index if it still points at `room_id`.
    pub(crate) fn release(&self, room_id: RoomId, player_id: PlayerId) {
        let mut directory = self.lock();
        if directory.players.get(&player_id) == Some(&room_id) {
            directory.players.remove(&player_id);
        }
    }

    /// Forgets a closed room and everyone indexed to it.
    pub(crate) fn remove_room(&self, room_id: RoomId) {
        let removed = {
            let mut directory = self.lock();
            directory.players.retain(|_, room| *room != room_id);
            directory.rooms.remove(&room_id).is_some()
        };
        if removed {
            info!(%room_id, "room removed");
            let _ = self.lobby.send(ServerMessage::RoomRemoved { room_id });
        }
    }
}

/// Creates rooms, routes players to them and lists them.
///
/// Cheap to clone; every clone shares the same directory.
#[derive(Clone)]
pub struct RoomRegistry {
    shared: Arc<Shared>,
}

impl RoomRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        let (lobby, _) = broadcast::channel(LOBBY_CHANNEL_SIZE);
        Self {
            shared: Arc::new(Shared {
                directory: Mutex::new(Directory::default()),
                lobby,
                config,
            }),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.shared.config
    }

    /// Opens a room of `mode` with `host` in seat 0 and spawns its actor.
    ///
    /// # Errors
    /// `AlreadyInRoom` if the host is seated elsewhere, `Capacity` when
    /// the room limit is reached, `InvalidOption` for options the mode
    /// refuses.
    pub fn create_room(
        &self,
        mode: GameMode,
        host: PlayerId,
        host_name: impl Into<String>,
        sender: PlayerSender,
        options: RoomOptions,
    ) -> Result<RoomId, RoomError> {
        options.check(mode)?;
        let mut directory = self.shared.lock();
        if let Some(current) = directory.players.get(&host) {
            return Err(RoomError::AlreadyInRoom(host, *current));
        }
        let max = self.shared.config.max_rooms;
        if directory.rooms.len() >= max {
            return Err(CapacityError::TooManyRooms { max }.into());
        }

        let room_id = RoomId(NEXT_ROOM_ID.fetch_add(1, Ordering::Relaxed));
        let config = RoomConfig::for_mode(mode, &self.shared.config);
        let (actor, handle) = RoomActor::new(
            room_id,
            config,
            options,
            (host, host_name.into()),
            sender,
            Arc::clone(&self.shared),
        );
        let summary = actor.summary();
        directory.rooms.insert(
            room_id,
            Entry {
                handle,
                summary: summary.clone(),
            },
        );
        directory.players.insert(host, room_id);
        drop(directory);

        tokio::spawn(actor.run());
        info!(%room_id, %mode, %host, "room created");
        let _ = self.shared.lobby.send(ServerMessage::RoomListed { room: summary });
        Ok(room_id)
    }

    /// Seats `player` in `room_id`. Returns the seat index.
    ///
    /// The player's index entry is reserved before the actor is asked, so
    /// two concurrent joins by the same player cannot both succeed.
    pub async fn join_room(
        &self,
        room_id: RoomId,
        player: PlayerId,
        name: impl Into<String>,
        sender: PlayerSender,
        password: Option<String>,
    ) -> Result<usize, RoomError> {
        let handle = {
            let mut directory = self.shared.lock();
            if let Some(current) = directory.players.get(&player).copied() {
                return Err(if current == room_id {
                    RoomError::AlreadySeated(player, room_id)
                } else {
                    RoomError::AlreadyInRoom(player, current)
                });
            }
            let handle = directory
                .rooms
                .get(&room_id)
                .map(|entry| entry.handle.clone())
                .ok_or(RoomError::NotFound(room_id))?;
            directory.players.insert(player, room_id);
            handle
        };

        let result = handle.join(player, name.into(), password, sender).await;
        if let Err(err) = &result {
            if !matches!(err, RoomError::AlreadySeated(..)) {
                self.shared.release(room_id, player);
            }
        }
        result
    }

    /// Gives up the player's seat. A running match is forfeited.
    pub async fn leave_room(&self, room_id: RoomId, player: PlayerId) -> Result<(), RoomError> {
        let handle = self.member_handle(room_id, player)?;
        match handle.leave(player).await {
            Err(RoomError::Unavailable(_)) => {
                self.shared.release(room_id, player);
                Ok(())
            }
            other => other,
        }
    }

    /// Rooms that are not closed, optionally of one mode, by id.
    pub fn list_rooms(&self, mode: Option<GameMode>) -> Vec<RoomSummary> {
        let directory = self.shared.lock();
        let mut rooms: Vec<RoomSummary> = directory
            .rooms
            .values()
            .map(|entry| &entry.summary)
            .filter(|summary| summary.lifecycle != LifecycleState::Closed)
            .filter(|summary| mode.is_none_or(|mode| summary.mode == mode))
            .cloned()
            .collect();
        rooms.sort_by_key(|summary| summary.room_id);
        rooms
    }

    /// Joins the oldest public lobby of `mode` with a free seat, or opens a
    /// new room when there is none.
    pub async fn quick_match(
        &self,
        mode: GameMode,
        player: PlayerId,
        name: impl Into<String>,
        sender: PlayerSender,
    ) -> Result<(RoomId, usize), RoomError> {
        let name = name.into();
        let candidates: Vec<RoomId> = self
            .list_rooms(Some(mode))
            .into_iter()
            .filter(|summary| summary.has_open_seat() && !summary.has_password)
            .map(|summary| summary.room_id)
            .collect();

        for room_id in candidates {
            match self
                .join_room(room_id, player, name.clone(), sender.clone(), None)
                .await
            {
                Ok(seat) => return Ok((room_id, seat)),
                // Filled or started since the list was read.
                Err(
                    RoomError::RoomFull(_)
                    | RoomError::RoomClosed(_)
                    | RoomError::InvalidState(_)
                    | RoomError::NotFound(_)
                    | RoomError::Unavailable(_),
                ) => continue,
                Err(err) => return Err(err),
            }
        }

        let room_id = self.create_room(mode, player, name, sender, RoomOptions::default())?;
        Ok((room_id, 0))
    }

    /// The room `player` is seated in.
    pub fn room_of(&self, player: PlayerId) -> Option<RoomId> {
        self.shared.lock().players.get(&player).copied()
    }

    pub fn summary(&self, room_id: RoomId) -> Option<RoomSummary> {
        self.shared
            .lock()
            .rooms
            .get(&room_id)
            .map(|entry| entry.summary.clone())
    }

    pub fn room_count(&self) -> usize {
        self.shared.lock().rooms.len()
    }

    /// Lobby events: `RoomListed` and `RoomRemoved`.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.shared.lobby.subscribe()
    }

    pub async fn set_ready(&self, room_id: RoomId, player: PlayerId, ready: bool) -> Result<(), RoomError> {
        self.member_handle(room_id, player)?
            .set_ready(player, ready)
            .await
    }

    pub async fn start_game(&self, room_id: RoomId, player: PlayerId) -> Result<(), RoomError> {
        self.member_handle(room_id, player)?.start(player).await
    }

    pub async fn submit_action(
        &self,
        room_id: RoomId,
        player: PlayerId,
        seq: u64,
        payload: Value,
    ) -> Result<(), RoomError> {
        self.member_handle(room_id, player)?
            .action(player, seq, payload)
            .await
    }

    pub async fn submit_input(&self, player: PlayerId, frame: InputFrame) -> Result<(), RoomError> {
        self.member_handle(RoomId(frame.room_id), player)?
            .input(player, frame)
            .await
    }

    pub async fn ack_snapshot(&self, room_id: RoomId, player: PlayerId, tick: u64) -> Result<(), RoomError> {
        self.member_handle(room_id, player)?.ack(player, tick).await
    }

    pub async fn report_desync(&self, room_id: RoomId, player: PlayerId, tick: u64) -> Result<(), RoomError> {
        self.member_handle(room_id, player)?.desync(player, tick).await
    }

    /// The player's connection is gone. During a match the seat is held
    /// for the reconnect grace; otherwise it is vacated.
    pub async fn disconnect(&self, player: PlayerId) {
        if let Some(handle) = self.current_handle(player) {
            if let Err(err) = handle.disconnect(player).await {
                debug!(%player, error = %err, "disconnect not delivered");
            }
        }
    }

    /// Reattaches the player's held seat, if any, to a new connection. The
    /// room sends `RoomJoined` and a full snapshot.
    pub async fn reconnect(&self, player: PlayerId, sender: PlayerSender) -> Option<RoomId> {
        let handle = self.current_handle(player)?;
        match handle.reconnect(player, sender).await {
            Ok(_) => Some(handle.room_id()),
            Err(err) => {
                debug!(%player, error = %err, "reconnect failed");
                None
            }
        }
    }

    /// Closes every room, aborting running matches.
    pub async fn shutdown(&self) {
        let handles: Vec<RoomHandle> = self
            .shared
            .lock()
            .rooms
            .values()
            .map(|entry| entry.handle.clone())
            .collect();
        info!(rooms = handles.len(), "closing all rooms");
        for handle in handles {
            let _ = handle.shutdown().await;
        }
    }

    fn member_handle(&self, room_id: RoomId, player: PlayerId) -> Result<RoomHandle, RoomError> {
        let directory = self.shared.lock();
        if directory.players.get(&player) != Some(&room_id) {
            return Err(RoomError::NotInRoom(player, room_id));
        }
        directory
            .rooms
            .get(&room_id)
            .map(|entry| entry.handle.clone())
            .ok_or(RoomError::NotFound(room_id))
    }

    fn current_handle(&self, player: PlayerId) -> Option<RoomHandle> {
        let directory = self.shared.lock();
        let room_id = directory.players.get(&player)?;
        directory
            .rooms
            .get(room_id)
            .map(|entry| entry.handle.clone())
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}
