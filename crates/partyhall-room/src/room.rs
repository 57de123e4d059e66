//! Room actor: one Tokio task per room that owns the match.
//!
//! The actor is the only code that touches a room's seats or game state.
//! Everything else talks to it through a [`RoomHandle`], and commands are
//! processed one at a time in arrival order. Besides its command queue the
//! actor waits on three timers: the tick scheduler (tick-driven modes),
//! the action clock (turn and phase timeouts) and housekeeping deadlines
//! (reconnect grace, resolve grace).

use std::collections::HashMap;
use std::fmt;
use std::future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use partyhall_game::{ControlInput, Effect, GameInstance, MatchConfig, SeatedPlayer};
use partyhall_protocol::{
    InputFrame, LifecycleState, Outcome, PlayerId, Recipient, RoomId, RoomSummary, SeatInfo,
    ServerMessage, SnapshotFrame, StateDelta, TickFrame,
};
use partyhall_sync::{DeltaTracker, InputBuffer, SequenceGate};
use partyhall_tick::{ActionClock, TickInfo, TickScheduler};
use serde_json::Value;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant};
use tracing::{debug, info, trace, warn};

use crate::registry::Shared;
use crate::{FatalRoomError, RoomConfig, RoomError, RoomOptions};

/// Command queue depth per room.
const CHANNEL_SIZE: usize = 64;

/// How long a player command waits for room in a full queue before the
/// caller gets [`RoomError::Busy`].
const POST_TIMEOUT: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Something the room wants delivered to one player's connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// A JSON control message.
    Message(ServerMessage),
    /// A binary snapshot for tick-driven modes.
    Frame(TickFrame),
}

/// Channel for delivering outbound items to a player's connection task.
pub type PlayerSender = mpsc::UnboundedSender<Outbound>;

// ---------------------------------------------------------------------------
// Commands and handle
// ---------------------------------------------------------------------------

type Reply<T> = oneshot::Sender<Result<T, RoomError>>;

pub(crate) enum RoomCommand {
    Join {
        player_id: PlayerId,
        name: String,
        password: Option<String>,
        sender: PlayerSender,
        reply: Reply<usize>,
    },
    Reconnect {
        player_id: PlayerId,
        sender: PlayerSender,
        reply: Reply<usize>,
    },
    Leave {
        player_id: PlayerId,
        reply: Reply<()>,
    },
    SetReady {
        player_id: PlayerId,
        ready: bool,
        reply: Reply<()>,
    },
    Start {
        player_id: PlayerId,
        reply: Reply<()>,
    },
    Action {
        player_id: PlayerId,
        seq: u64,
        payload: Value,
    },
    Input {
        player_id: PlayerId,
        frame: InputFrame,
    },
    Ack {
        player_id: PlayerId,
        tick: u64,
    },
    Desync {
        player_id: PlayerId,
        tick: u64,
    },
    Disconnect {
        player_id: PlayerId,
    },
    Shutdown,
    /// Makes the named rules hook panic on the room task.
    #[cfg(test)]
    InjectFault {
        hook: &'static str,
    },
}

/// Handle to a running room actor.
///
/// Cheap to clone. The registry keeps one per room; the actor stops once
/// it closes or every handle is dropped.
#[derive(Clone)]
pub struct RoomHandle {
    room_id: RoomId,
    sender: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    /// Takes the lowest free seat. Returns the seat index.
    pub async fn join(
        &self,
        player_id: PlayerId,
        name: String,
        password: Option<String>,
        sender: PlayerSender,
    ) -> Result<usize, RoomError> {
        self.request(|reply| RoomCommand::Join {
            player_id,
            name,
            password,
            sender,
            reply,
        })
        .await
    }

    /// Reattaches a held seat to a new connection.
    pub async fn reconnect(&self, player_id: PlayerId, sender: PlayerSender) -> Result<usize, RoomError> {
        self.request(|reply| RoomCommand::Reconnect {
            player_id,
            sender,
            reply,
        })
        .await
    }

    pub async fn leave(&self, player_id: PlayerId) -> Result<(), RoomError> {
        self.request(|reply| RoomCommand::Leave { player_id, reply }).await
    }

    pub async fn set_ready(&self, player_id: PlayerId, ready: bool) -> Result<(), RoomError> {
        self.request(|reply| RoomCommand::SetReady {
            player_id,
            ready,
            reply,
        })
        .await
    }

    /// Host only: starts the match.
    pub async fn start(&self, player_id: PlayerId) -> Result<(), RoomError> {
        self.request(|reply| RoomCommand::Start { player_id, reply }).await
    }

    /// Queues a turn-based action. The verdict comes back on the player's
    /// outbound channel.
    pub async fn action(&self, player_id: PlayerId, seq: u64, payload: Value) -> Result<(), RoomError> {
        self.post(RoomCommand::Action {
            player_id,
            seq,
            payload,
        })
        .await
    }

    pub async fn input(&self, player_id: PlayerId, frame: InputFrame) -> Result<(), RoomError> {
        self.post(RoomCommand::Input { player_id, frame }).await
    }

    pub async fn ack(&self, player_id: PlayerId, tick: u64) -> Result<(), RoomError> {
        self.post(RoomCommand::Ack { player_id, tick }).await
    }

    pub async fn desync(&self, player_id: PlayerId, tick: u64) -> Result<(), RoomError> {
        self.post(RoomCommand::Desync { player_id, tick }).await
    }

    /// The player's connection dropped.
    pub async fn disconnect(&self, player_id: PlayerId) -> Result<(), RoomError> {
        self.post_reliable(RoomCommand::Disconnect { player_id }).await
    }

    /// Aborts any running match and closes the room.
    pub async fn shutdown(&self) -> Result<(), RoomError> {
        self.post_reliable(RoomCommand::Shutdown).await
    }

    #[cfg(test)]
    pub(crate) async fn inject_fault(&self, hook: &'static str) -> Result<(), RoomError> {
        self.post(RoomCommand::InjectFault { hook }).await
    }

    /// Queues a command, giving up after [`POST_TIMEOUT`] so a stalled room
    /// can't hold up the caller's connection loop.
    async fn post(&self, command: RoomCommand) -> Result<(), RoomError> {
        self.sender
            .send_timeout(command, POST_TIMEOUT)
            .await
            .map_err(|err| match err {
                SendTimeoutError::Timeout(_) => {
                    warn!(room_id = %self.room_id, "room queue full, command refused");
                    RoomError::Busy(self.room_id)
                }
                SendTimeoutError::Closed(_) => RoomError::Unavailable(self.room_id),
            })
    }

    /// Queues a command that must not be lost: disconnects and shutdowns.
    async fn post_reliable(&self, command: RoomCommand) -> Result<(), RoomError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| RoomError::Unavailable(self.room_id))
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> RoomCommand) -> Result<T, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.post(command(reply_tx)).await?;
        reply_rx
            .await
            .map_err(|_| RoomError::Unavailable(self.room_id))?
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct Seat {
    player_id: PlayerId,
    name: String,
    ready: bool,
    connected: bool,
    /// Set while the seat is held for a dropped player.
    disconnected_at: Option<Instant>,
    sender: PlayerSender,
}

impl Seat {
    fn new(player_id: PlayerId, name: String, sender: PlayerSender) -> Self {
        Self {
            player_id,
            name,
            ready: false,
            connected: true,
            disconnected_at: None,
            sender,
        }
    }

    /// Silently drops the item if the connection is gone.
    fn send(&self, outbound: Outbound) {
        let _ = self.sender.send(outbound);
    }
}

pub(crate) struct RoomActor {
    room_id: RoomId,
    config: RoomConfig,
    name: String,
    password: Option<String>,
    board_size: Option<usize>,
    lifecycle: LifecycleState,
    seats: Vec<Option<Seat>>,
    host: Option<PlayerId>,
    game: Option<GameInstance>,
    matches_started: u64,
    /// Snapshot number. Follows the scheduler in tick-driven modes and
    /// counts state changes otherwise.
    tick: u64,
    scheduler: TickScheduler,
    clock: ActionClock<u64>,
    inputs: InputBuffer<ControlInput>,
    gate: SequenceGate,
    trackers: HashMap<PlayerId, DeltaTracker>,
    closes_at: Option<Instant>,
    shared: Arc<Shared>,
    receiver: mpsc::Receiver<RoomCommand>,
}

impl RoomActor {
    /// Builds a room with `host` in seat 0. The caller spawns
    /// [`run`](Self::run).
    pub(crate) fn new(
        room_id: RoomId,
        config: RoomConfig,
        options: RoomOptions,
        host: (PlayerId, String),
        sender: PlayerSender,
        shared: Arc<Shared>,
    ) -> (Self, RoomHandle) {
        let (tx, rx) = mpsc::channel(CHANNEL_SIZE);
        let (host_id, host_name) = host;

        let mut seats: Vec<Option<Seat>> = (0..config.max_players).map(|_| None).collect();
        if let Some(first) = seats.first_mut() {
            *first = Some(Seat::new(host_id, host_name, sender));
        }

        let actor = Self {
            room_id,
            name: options
                .name
                .unwrap_or_else(|| format!("{} room", config.mode)),
            password: options.password,
            board_size: options.board_size,
            lifecycle: LifecycleState::Lobby,
            seats,
            host: Some(host_id),
            game: None,
            matches_started: 0,
            tick: 0,
            scheduler: TickScheduler::with_rate(0),
            clock: ActionClock::new(),
            inputs: InputBuffer::new(),
            gate: SequenceGate::new(),
            trackers: HashMap::new(),
            closes_at: None,
            config,
            shared,
            receiver: rx,
        };
        let handle = RoomHandle { room_id, sender: tx };
        (actor, handle)
    }

    pub(crate) async fn run(mut self) {
        info!(room_id = %self.room_id, mode = %self.config.mode, "room actor started");

        if let Some(host) = self.host {
            self.send_to(
                host,
                ServerMessage::RoomJoined {
                    room_id: self.room_id,
                    seat: 0,
                    mode: self.config.mode,
                },
            );
        }
        self.broadcast_room_update();

        while self.lifecycle != LifecycleState::Closed {
            let deadline = self.next_deadline();
            tokio::select! {
                command = self.receiver.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                info = self.scheduler.wait_for_tick() => {
                    self.on_tick(info);
                    self.scheduler.record_tick_end();
                }
                marker = self.clock.expired() => self.on_action_timeout(marker),
                () = sleep_until(deadline) => self.housekeeping(),
            }
        }

        self.close();
        info!(room_id = %self.room_id, "room actor stopped");
    }

    pub(crate) fn summary(&self) -> RoomSummary {
        RoomSummary {
            room_id: self.room_id,
            mode: self.config.mode,
            name: self.name.clone(),
            lifecycle: self.lifecycle,
            players: self.occupied().count(),
            max_players: self.config.max_players,
            has_password: self.password.is_some(),
            host: self.host,
        }
    }

    fn handle(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::Join {
                player_id,
                name,
                password,
                sender,
                reply,
            } => {
                let result = self.handle_join(player_id, name, password.as_deref(), sender);
                let _ = reply.send(result);
            }
            RoomCommand::Reconnect {
                player_id,
                sender,
                reply,
            } => {
                let _ = reply.send(self.handle_reconnect(player_id, sender));
            }
            RoomCommand::Leave { player_id, reply } => {
                let _ = reply.send(self.handle_leave(player_id));
            }
            RoomCommand::SetReady {
                player_id,
                ready,
                reply,
            } => {
                let _ = reply.send(self.handle_set_ready(player_id, ready));
            }
            RoomCommand::Start { player_id, reply } => {
                let _ = reply.send(self.handle_start(player_id));
            }
            RoomCommand::Action {
                player_id,
                seq,
                payload,
            } => self.handle_action(player_id, seq, &payload),
            RoomCommand::Input { player_id, frame } => self.handle_input(player_id, &frame),
            RoomCommand::Ack { player_id, tick } => {
                if let Some(tracker) = self.trackers.get_mut(&player_id) {
                    let accepted = tracker.ack(tick);
                    trace!(room_id = %self.room_id, %player_id, tick, accepted, "snapshot ack");
                }
            }
            RoomCommand::Desync { player_id, tick } => self.handle_desync(player_id, tick),
            RoomCommand::Disconnect { player_id } => self.handle_disconnect(player_id),
            RoomCommand::Shutdown => {
                info!(room_id = %self.room_id, "room shutting down");
                if self.lifecycle.is_running() {
                    self.broadcast(ServerMessage::Outcome {
                        room_id: self.room_id,
                        result: Outcome::Aborted {
                            reason: "server shutting down".into(),
                        },
                    });
                }
                self.lifecycle = LifecycleState::Closed;
            }
            #[cfg(test)]
            RoomCommand::InjectFault { hook } => {
                let _: Option<()> = self.rules(hook, |_| panic!("injected fault in {hook}"));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Seats
    // -----------------------------------------------------------------------

    fn handle_join(
        &mut self,
        player_id: PlayerId,
        name: String,
        password: Option<&str>,
        sender: PlayerSender,
    ) -> Result<usize, RoomError> {
        match self.lifecycle {
            LifecycleState::Lobby => {}
            LifecycleState::Active => return Err(RoomError::InvalidState(self.lifecycle)),
            LifecycleState::Resolving | LifecycleState::Closed => {
                return Err(RoomError::RoomClosed(self.room_id));
            }
        }
        if self.seat_of(player_id).is_some() {
            return Err(RoomError::AlreadySeated(player_id, self.room_id));
        }
        if let Some(expected) = &self.password {
            if password != Some(expected.as_str()) {
                return Err(RoomError::WrongPassword(self.room_id));
            }
        }
        let seat = self
            .seats
            .iter()
            .position(Option::is_none)
            .ok_or(RoomError::RoomFull(self.room_id))?;

        self.seats[seat] = Some(Seat::new(player_id, name, sender));
        info!(
            room_id = %self.room_id,
            %player_id,
            seat,
            players = self.occupied().count(),
            "player joined"
        );

        self.send_to(
            player_id,
            ServerMessage::RoomJoined {
                room_id: self.room_id,
                seat,
                mode: self.config.mode,
            },
        );
        self.room_changed();
        Ok(seat)
    }

    fn handle_reconnect(&mut self, player_id: PlayerId, sender: PlayerSender) -> Result<usize, RoomError> {
        let index = self
            .seat_of(player_id)
            .ok_or(RoomError::NotInRoom(player_id, self.room_id))?;
        if let Some(seat) = self.seats[index].as_mut() {
            seat.sender = sender;
            seat.connected = true;
            seat.disconnected_at = None;
        }
        info!(room_id = %self.room_id, %player_id, seat = index, "player reconnected");

        self.send_to(
            player_id,
            ServerMessage::RoomJoined {
                room_id: self.room_id,
                seat: index,
                mode: self.config.mode,
            },
        );
        self.broadcast(ServerMessage::Reconnected {
            room_id: self.room_id,
            player_id,
        });
        self.room_changed();

        if self.game.is_some() {
            self.inputs.clear_pending(player_id);
            if let Some(tracker) = self.trackers.get_mut(&player_id) {
                tracker.reset();
            }
            self.send_snapshots(&[player_id]);
        }
        Ok(index)
    }

    fn handle_leave(&mut self, player_id: PlayerId) -> Result<(), RoomError> {
        let index = self
            .seat_of(player_id)
            .ok_or(RoomError::NotInRoom(player_id, self.room_id))?;
        info!(room_id = %self.room_id, %player_id, "player left");
        self.remove_player(index);
        Ok(())
    }

    fn handle_disconnect(&mut self, player_id: PlayerId) {
        let Some(index) = self.seat_of(player_id) else {
            return;
        };

        if !self.lifecycle.is_running() {
            info!(room_id = %self.room_id, %player_id, "player disconnected, vacating seat");
            self.remove_player(index);
            return;
        }

        if let Some(seat) = self.seats[index].as_mut() {
            seat.connected = false;
            seat.disconnected_at = Some(Instant::now());
        }
        info!(
            room_id = %self.room_id,
            %player_id,
            grace_secs = self.config.reconnect_grace.as_secs(),
            "player disconnected, holding seat"
        );
        self.broadcast(ServerMessage::Disconnected {
            room_id: self.room_id,
            player_id,
        });
        self.room_changed();
    }

    fn handle_set_ready(&mut self, player_id: PlayerId, ready: bool) -> Result<(), RoomError> {
        let index = self
            .seat_of(player_id)
            .ok_or(RoomError::NotInRoom(player_id, self.room_id))?;
        if self.lifecycle != LifecycleState::Lobby {
            return Err(RoomError::InvalidState(self.lifecycle));
        }
        if let Some(seat) = self.seats[index].as_mut() {
            seat.ready = ready;
        }
        debug!(room_id = %self.room_id, %player_id, ready, "ready flag set");
        self.room_changed();
        Ok(())
    }

    /// Forfeits a running match for the seat's player, then frees the seat.
    fn remove_player(&mut self, index: usize) {
        let Some(player_id) = self.seats[index].as_ref().map(|seat| seat.player_id) else {
            return;
        };
        let forfeit = if self.lifecycle.is_running() {
            self.rules("forfeit", |game| game.forfeit(player_id))
        } else {
            None
        };

        self.vacate(index);
        if let Some(effects) = forfeit {
            self.dispatch(effects);
        }
        if self.lifecycle == LifecycleState::Closed {
            return;
        }
        self.room_changed();
        self.publish_state();
    }

    fn vacate(&mut self, index: usize) {
        let Some(seat) = self.seats[index].take() else {
            return;
        };
        let player_id = seat.player_id;
        seat.send(Outbound::Message(ServerMessage::RoomLeft {
            room_id: self.room_id,
        }));
        self.shared.release(self.room_id, player_id);
        self.gate.reset(player_id);
        self.inputs.remove(player_id);
        self.trackers.remove(&player_id);

        if self.host == Some(player_id) {
            let next_host = self.occupied().next().map(|seat| seat.player_id);
            self.host = next_host;
            if let Some(host) = self.host {
                info!(room_id = %self.room_id, %host, "host transferred");
            }
        }
        if self.host.is_none() {
            info!(room_id = %self.room_id, "room empty, closing");
            self.lifecycle = LifecycleState::Closed;
        }
    }

    // -----------------------------------------------------------------------
    // Match
    // -----------------------------------------------------------------------

    fn handle_start(&mut self, player_id: PlayerId) -> Result<(), RoomError> {
        if self.seat_of(player_id).is_none() {
            return Err(RoomError::NotInRoom(player_id, self.room_id));
        }
        if self.host != Some(player_id) {
            return Err(RoomError::NotHost(self.room_id));
        }
        if self.lifecycle != LifecycleState::Lobby {
            return Err(RoomError::InvalidState(self.lifecycle));
        }

        let seated: Vec<SeatedPlayer> = self
            .seats
            .iter()
            .enumerate()
            .filter_map(|(seat, occupant)| {
                occupant.as_ref().map(|occupant| SeatedPlayer {
                    seat,
                    player_id: occupant.player_id,
                    name: occupant.name.clone(),
                })
            })
            .collect();
        if seated.len() < self.config.min_players {
            return Err(RoomError::NotEnoughPlayers {
                have: seated.len(),
                need: self.config.min_players,
            });
        }
        if self
            .occupied()
            .any(|seat| !seat.ready && Some(seat.player_id) != self.host)
        {
            return Err(RoomError::NotReady);
        }

        self.matches_started += 1;
        let mode = self.config.mode;
        let match_config = MatchConfig::for_room(self.room_id, self.matches_started)
            .with_board_size(self.board_size);
        let started = panic::catch_unwind(AssertUnwindSafe(|| {
            GameInstance::start(mode, &seated, &match_config)
        }));
        let (game, opening) = match started {
            Ok(Ok(started)) => started,
            Ok(Err(fault)) => return Err(FatalRoomError::from(fault).into()),
            Err(_) => {
                let err = FatalRoomError::RulesPanicked { hook: "initialize" };
                self.abort(err.clone());
                return Err(err.into());
            }
        };

        let tick_driven = self.config.is_tick_driven();
        self.game = Some(game);
        self.lifecycle = LifecycleState::Active;
        self.tick = 0;
        self.gate = SequenceGate::new();
        self.inputs = InputBuffer::new();
        self.trackers = seated
            .iter()
            .map(|seat| (seat.player_id, new_tracker(tick_driven)))
            .collect();
        self.scheduler = TickScheduler::with_rate(self.config.tick_rate_hz);
        info!(
            room_id = %self.room_id,
            %mode,
            players = seated.len(),
            seed = match_config.seed,
            "match started"
        );

        self.room_changed();
        self.dispatch(opening);
        self.broadcast_snapshot();
        self.settle();
        Ok(())
    }

    fn handle_action(&mut self, player_id: PlayerId, seq: u64, payload: &Value) {
        if self.seat_of(player_id).is_none() {
            debug!(room_id = %self.room_id, %player_id, "action from non-member, ignoring");
            return;
        }
        if !self.lifecycle.is_running() {
            self.reject(player_id, seq, "no match in progress");
            return;
        }
        if self.config.is_tick_driven() {
            self.reject(player_id, seq, "this mode takes input frames");
            return;
        }
        if let Err(err) = self.gate.check(player_id, seq) {
            debug!(room_id = %self.room_id, %player_id, error = %err, "action out of sequence");
            self.reject(player_id, seq, err);
            return;
        }

        match self.rules("validate_action", |game| game.apply_action(player_id, payload)) {
            Some(Ok(effects)) => {
                debug!(room_id = %self.room_id, %player_id, seq, "action accepted");
                self.dispatch(effects);
                self.publish_state();
            }
            Some(Err(reason)) => {
                debug!(room_id = %self.room_id, %player_id, seq, %reason, "action rejected");
                self.reject(player_id, seq, reason);
            }
            None => {}
        }
    }

    fn handle_input(&mut self, player_id: PlayerId, frame: &InputFrame) {
        if !self.lifecycle.is_running() || !self.config.is_tick_driven() || self.seat_of(player_id).is_none() {
            trace!(room_id = %self.room_id, %player_id, "input frame ignored");
            return;
        }
        if let Some(tracker) = self.trackers.get_mut(&player_id) {
            tracker.ack(frame.ack_tick);
        }
        if let Err(err) = self
            .inputs
            .submit(player_id, frame.seq, ControlInput::from(frame))
        {
            debug!(room_id = %self.room_id, %player_id, error = %err, "input dropped");
        }
    }

    fn handle_desync(&mut self, player_id: PlayerId, tick: u64) {
        if self.game.is_none() {
            return;
        }
        debug!(room_id = %self.room_id, %player_id, tick, "client desynced, sending full snapshot");
        if let Some(tracker) = self.trackers.get_mut(&player_id) {
            tracker.force_full();
        }
        self.send_snapshots(&[player_id]);
    }

    fn on_tick(&mut self, info: TickInfo) {
        if !self.lifecycle.is_running() {
            return;
        }
        self.tick = info.tick;

        let players: Vec<PlayerId> = self.occupied().map(|seat| seat.player_id).collect();
        for player_id in players {
            let Some((seq, input)) = self.inputs.take(player_id) else {
                continue;
            };
            trace!(room_id = %self.room_id, %player_id, seq, "applying input");
            match self.rules("validate_action", |game| game.apply_input(player_id, &input)) {
                Some(effects) => self.dispatch(effects),
                None => return,
            }
        }

        match self.rules("tick", |game| game.tick(info.dt)) {
            Some(Ok(effects)) => self.dispatch(effects),
            Some(Err(fault)) => {
                self.abort(fault.into());
                return;
            }
            None => return,
        }
        self.broadcast_snapshot();
        self.settle();
    }

    fn on_action_timeout(&mut self, marker: u64) {
        if !self.lifecycle.is_running() {
            return;
        }
        if self.rules("turn_marker", |game| game.turn_marker()) != Some(marker) {
            return;
        }
        debug!(room_id = %self.room_id, marker, "action timer expired");
        if let Some(effects) = self.rules("on_timeout", GameInstance::timeout) {
            self.dispatch(effects);
            self.publish_state();
        }
    }

    fn housekeeping(&mut self) {
        let now = Instant::now();
        if self.closes_at.is_some_and(|at| at <= now) {
            info!(room_id = %self.room_id, "resolve grace over, closing room");
            self.lifecycle = LifecycleState::Closed;
            return;
        }

        let grace = self.config.reconnect_grace;
        let expired: Vec<usize> = self
            .seats
            .iter()
            .enumerate()
            .filter(|(_, seat)| {
                seat.as_ref()
                    .and_then(|seat| seat.disconnected_at)
                    .is_some_and(|since| since + grace <= now)
            })
            .map(|(index, _)| index)
            .collect();
        for index in expired {
            if let Some(seat) = &self.seats[index] {
                info!(
                    room_id = %self.room_id,
                    player_id = %seat.player_id,
                    "reconnect grace expired, forfeiting seat"
                );
            }
            self.remove_player(index);
            if self.lifecycle == LifecycleState::Closed {
                return;
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        let grace = self.config.reconnect_grace;
        self.occupied()
            .filter_map(|seat| seat.disconnected_at.map(|since| since + grace))
            .chain(self.closes_at)
            .min()
    }

    /// Sends the new state (turn-based modes) and handles the match ending
    /// or the turn changing.
    fn publish_state(&mut self) {
        if !self.lifecycle.is_running() {
            return;
        }
        if !self.config.is_tick_driven() {
            self.tick += 1;
            self.broadcast_snapshot();
        }
        self.settle();
    }

    /// Finishes the match if it is over, otherwise re-arms the action timer
    /// for the current turn.
    fn settle(&mut self) {
        if !self.lifecycle.is_running() {
            return;
        }
        let Some((outcome, timer)) = self.rules("is_terminal", |game| {
            let timer = game
                .action_timeout()
                .map(|timeout| (game.turn_marker(), timeout));
            (game.outcome(), timer)
        }) else {
            return;
        };

        if let Some(outcome) = outcome {
            self.finish(outcome);
            return;
        }
        match timer {
            Some((marker, timeout)) => {
                if self.clock.arm(marker, timeout) {
                    trace!(room_id = %self.room_id, marker, "action timer restarted");
                }
            }
            None => self.clock.disarm(),
        }
    }

    fn finish(&mut self, outcome: Outcome) {
        info!(room_id = %self.room_id, ?outcome, "match finished");
        self.lifecycle = LifecycleState::Resolving;
        self.clock.disarm();
        self.scheduler.pause();
        self.closes_at = Some(Instant::now() + self.config.resolve_grace);
        self.broadcast(ServerMessage::Outcome {
            room_id: self.room_id,
            result: outcome,
        });
        self.room_changed();
    }

    /// Ends the match without a result and closes the room.
    fn abort(&mut self, err: FatalRoomError) {
        warn!(room_id = %self.room_id, error = %err, "aborting match");
        self.game = None;
        self.clock.disarm();
        self.scheduler.pause();
        self.broadcast(ServerMessage::Outcome {
            room_id: self.room_id,
            result: Outcome::Aborted {
                reason: err.to_string(),
            },
        });
        self.lifecycle = LifecycleState::Closed;
    }

    fn close(&mut self) {
        self.lifecycle = LifecycleState::Closed;
        self.clock.disarm();
        self.broadcast_room_update();
        for seat in self.occupied() {
            seat.send(Outbound::Message(ServerMessage::RoomLeft {
                room_id: self.room_id,
            }));
        }
        self.shared.remove_room(self.room_id);
    }

    /// Runs a rules hook on the match. A panic aborts the match and closes
    /// the room; `None` then, or when no match is running.
    fn rules<T>(&mut self, hook: &'static str, f: impl FnOnce(&mut GameInstance) -> T) -> Option<T> {
        let game = self.game.as_mut()?;
        match panic::catch_unwind(AssertUnwindSafe(|| f(game))) {
            Ok(value) => Some(value),
            Err(_) => {
                self.abort(FatalRoomError::RulesPanicked { hook });
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // Delivery
    // -----------------------------------------------------------------------

    fn broadcast_snapshot(&mut self) {
        let players: Vec<PlayerId> = self.occupied().map(|seat| seat.player_id).collect();
        self.send_snapshots(&players);
    }

    /// Sends each player in `players` its own filtered view, as a delta
    /// against what that player last acknowledged.
    fn send_snapshots(&mut self, players: &[PlayerId]) {
        let Some(views) = self.rules("visibility_filter", |game| {
            players
                .iter()
                .map(|player| (*player, game.view(Some(*player))))
                .collect::<Vec<_>>()
        }) else {
            return;
        };

        let tick_driven = self.config.is_tick_driven();
        for (player_id, view) in views {
            let delta = self
                .trackers
                .entry(player_id)
                .or_insert_with(|| new_tracker(tick_driven))
                .encode(self.tick, view);

            let outbound = if tick_driven {
                match self.snapshot_frame(player_id, &delta) {
                    Some(frame) => Outbound::Frame(frame),
                    None => continue,
                }
            } else {
                Outbound::Message(ServerMessage::Snapshot {
                    room_id: self.room_id,
                    tick: self.tick,
                    state_delta: delta,
                })
            };
            if let Some(seat) = self.seat(player_id) {
                seat.send(outbound);
            }
        }
    }

    fn snapshot_frame(&self, player_id: PlayerId, delta: &StateDelta) -> Option<TickFrame> {
        let body = match serde_json::to_vec(delta) {
            Ok(body) => body,
            Err(err) => {
                warn!(room_id = %self.room_id, %player_id, error = %err, "failed to encode snapshot");
                return None;
            }
        };
        let base_tick = match delta {
            StateDelta::Patch { base_tick, .. } => Some(*base_tick),
            StateDelta::Full { .. } => None,
        };
        Some(TickFrame::Snapshot(SnapshotFrame {
            room_id: self.room_id.0,
            tick: self.tick,
            base_tick,
            input_ack: self.inputs.acked(player_id),
            body,
        }))
    }

    /// Delivers game effects. Events addressed to a single player are
    /// private.
    fn dispatch(&self, effects: Vec<Effect>) {
        for Effect { to, event } in effects {
            let private = matches!(to, Recipient::Player(_));
            for seat in self.occupied().filter(|seat| to.includes(seat.player_id)) {
                let message = if private {
                    ServerMessage::PrivateEvent {
                        room_id: self.room_id,
                        event: event.clone(),
                    }
                } else {
                    ServerMessage::GameEvent {
                        room_id: self.room_id,
                        event: event.clone(),
                    }
                };
                seat.send(Outbound::Message(message));
            }
        }
    }

    fn reject(&self, player_id: PlayerId, seq: u64, reason: impl fmt::Display) {
        self.send_to(
            player_id,
            ServerMessage::ActionRejected {
                room_id: self.room_id,
                seq,
                reason: reason.to_string(),
            },
        );
    }

    fn broadcast(&self, message: ServerMessage) {
        for seat in self.occupied() {
            seat.send(Outbound::Message(message.clone()));
        }
    }

    fn send_to(&self, player_id: PlayerId, message: ServerMessage) {
        if let Some(seat) = self.seat(player_id) {
            seat.send(Outbound::Message(message));
        }
    }

    fn broadcast_room_update(&self) {
        let seats = self
            .seats
            .iter()
            .enumerate()
            .filter_map(|(index, seat)| {
                seat.as_ref().map(|seat| SeatInfo {
                    seat: index,
                    player_id: seat.player_id,
                    name: seat.name.clone(),
                    ready: seat.ready,
                    connected: seat.connected,
                    is_host: self.host == Some(seat.player_id),
                })
            })
            .collect();
        self.broadcast(ServerMessage::RoomUpdate {
            room_id: self.room_id,
            lifecycle_state: self.lifecycle,
            seats,
        });
    }

    /// Seats or lifecycle changed: tell the room and refresh the lobby list.
    fn room_changed(&self) {
        self.broadcast_room_update();
        if self.lifecycle != LifecycleState::Closed {
            self.shared.publish(self.summary());
        }
    }

    fn occupied(&self) -> impl Iterator<Item = &Seat> {
        self.seats.iter().flatten()
    }

    fn seat(&self, player_id: PlayerId) -> Option<&Seat> {
        self.occupied().find(|seat| seat.player_id == player_id)
    }

    fn seat_of(&self, player_id: PlayerId) -> Option<usize> {
        self.seats
            .iter()
            .position(|seat| seat.as_ref().is_some_and(|seat| seat.player_id == player_id))
    }
}

/// Turn-based rooms send snapshots over the reliable control channel, so
/// every sent view is already a baseline.
fn new_tracker(tick_driven: bool) -> DeltaTracker {
    if tick_driven {
        DeltaTracker::new()
    } else {
        DeltaTracker::reliable()
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(depth: usize) -> (RoomHandle, mpsc::Receiver<RoomCommand>) {
        let (sender, rx) = mpsc::channel(depth);
        let handle = RoomHandle {
            room_id: RoomId(9),
            sender,
        };
        (handle, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_full_queue_returns_busy_after_timeout() {
        let (handle, _rx) = handle(1);
        handle.ack(PlayerId(1), 1).await.unwrap();

        let started = Instant::now();
        let result = handle.ack(PlayerId(1), 2).await;

        assert!(matches!(result, Err(RoomError::Busy(RoomId(9)))));
        assert!(started.elapsed() >= POST_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_reliable_waits_for_space() {
        let (handle, mut rx) = handle(1);
        handle.ack(PlayerId(1), 1).await.unwrap();

        let drain = tokio::spawn(async move {
            time::sleep(Duration::from_secs(5)).await;
            let first = rx.recv().await;
            let second = rx.recv().await;
            (first, second)
        });
        handle.disconnect(PlayerId(1)).await.unwrap();

        let (first, second) = drain.await.unwrap();
        assert!(matches!(first, Some(RoomCommand::Ack { tick: 1, .. })));
        assert!(matches!(second, Some(RoomCommand::Disconnect { player_id: PlayerId(1) })));
    }

    #[tokio::test]
    async fn test_post_stopped_room_is_unavailable() {
        let (handle, rx) = handle(1);
        drop(rx);

        assert!(matches!(
            handle.ack(PlayerId(1), 1).await,
            Err(RoomError::Unavailable(RoomId(9)))
        ));
    }
}
