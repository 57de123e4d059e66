//! Integration tests for the registry and room actors, driven with real
//! game modes and in-memory player channels.

use std::time::Duration;

use partyhall_protocol::{
    GameMode, InputFrame, LifecycleState, Outcome, PlayerId, RoomId, ServerMessage, StateDelta,
    TickFrame,
};
use partyhall_room::{
    CapacityError, Outbound, PlayerSender, RegistryConfig, RoomError, RoomOptions, RoomRegistry,
};
use serde_json::json;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time;

// =========================================================================
// Helpers
// =========================================================================

fn pid(id: u64) -> PlayerId {
    PlayerId(id)
}

fn connection() -> (PlayerSender, UnboundedReceiver<Outbound>) {
    mpsc::unbounded_channel()
}

async fn recv(rx: &mut UnboundedReceiver<Outbound>) -> Outbound {
    time::timeout(Duration::from_secs(60), rx.recv())
        .await
        .expect("timed out waiting for outbound")
        .expect("room dropped the channel")
}

/// Skips messages until `pick` returns `Some`.
async fn wait_for<T>(
    rx: &mut UnboundedReceiver<Outbound>,
    mut pick: impl FnMut(ServerMessage) -> Option<T>,
) -> T {
    loop {
        if let Outbound::Message(message) = recv(rx).await {
            if let Some(value) = pick(message) {
                return value;
            }
        }
    }
}

/// Collects messages up to and including the first one `stop` accepts.
async fn collect_until(
    rx: &mut UnboundedReceiver<Outbound>,
    stop: impl Fn(&ServerMessage) -> bool,
) -> Vec<ServerMessage> {
    let mut seen = Vec::new();
    loop {
        if let Outbound::Message(message) = recv(rx).await {
            let done = stop(&message);
            seen.push(message);
            if done {
                return seen;
            }
        }
    }
}

fn short_grace() -> RegistryConfig {
    RegistryConfig {
        reconnect_grace: Duration::from_secs(10),
        ..RegistryConfig::default()
    }
}

/// Two players seated in a started gomoku room. Player 1 is black and moves
/// first.
async fn gomoku_match(
    registry: &RoomRegistry,
) -> (RoomId, UnboundedReceiver<Outbound>, UnboundedReceiver<Outbound>) {
    let (tx1, rx1) = connection();
    let (tx2, rx2) = connection();
    let room = registry
        .create_room(GameMode::Gomoku, pid(1), "alice", tx1, RoomOptions::default())
        .unwrap();
    registry.join_room(room, pid(2), "bob", tx2, None).await.unwrap();
    registry.set_ready(room, pid(2), true).await.unwrap();
    registry.start_game(room, pid(1)).await.unwrap();
    (room, rx1, rx2)
}

async fn place(registry: &RoomRegistry, room: RoomId, player: u64, seq: u64, row: i64, col: i64) {
    registry
        .submit_action(
            room,
            pid(player),
            seq,
            json!({ "action": "place", "row": row, "col": col }),
        )
        .await
        .unwrap();
}

fn outcome_of(message: ServerMessage) -> Option<Outcome> {
    match message {
        ServerMessage::Outcome { result, .. } => Some(result),
        _ => None,
    }
}

// =========================================================================
// Registry bookkeeping
// =========================================================================

#[tokio::test]
async fn test_create_room_seats_host_at_zero_and_lists_room() {
    let registry = RoomRegistry::default();
    let (tx, mut rx) = connection();

    let room = registry
        .create_room(GameMode::Gomoku, pid(1), "alice", tx, RoomOptions::named("duel"))
        .unwrap();

    let seat = wait_for(&mut rx, |m| match m {
        ServerMessage::RoomJoined { seat, mode, .. } => Some((seat, mode)),
        _ => None,
    })
    .await;
    assert_eq!(seat, (0, GameMode::Gomoku));
    assert_eq!(registry.room_of(pid(1)), Some(room));

    let rooms = registry.list_rooms(None);
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0].name, "duel");
    assert_eq!(rooms[0].players, 1);
    assert_eq!(rooms[0].host, Some(pid(1)));
    assert_eq!(rooms[0].lifecycle, LifecycleState::Lobby);
}

#[tokio::test]
async fn test_join_room_second_room_is_already_in_room() {
    let registry = RoomRegistry::default();
    let (tx1, _rx1) = connection();
    let (tx2, _rx2) = connection();
    let first = registry
        .create_room(GameMode::Shooter, pid(1), "a", tx1.clone(), RoomOptions::default())
        .unwrap();
    let second = registry
        .create_room(GameMode::Shooter, pid(2), "b", tx2, RoomOptions::default())
        .unwrap();

    let other = registry.join_room(second, pid(1), "a", tx1.clone(), None).await;
    let same = registry.join_room(first, pid(1), "a", tx1.clone(), None).await;
    let create = registry.create_room(GameMode::Racing, pid(1), "a", tx1, RoomOptions::default());

    assert!(matches!(other, Err(RoomError::AlreadyInRoom(_, room)) if room == first));
    assert!(matches!(same, Err(RoomError::AlreadySeated(..))));
    assert!(matches!(create, Err(RoomError::AlreadyInRoom(..))));
    assert_eq!(registry.room_of(pid(1)), Some(first));
}

#[tokio::test]
async fn test_create_room_over_limit_is_capacity_error() {
    let registry = RoomRegistry::new(RegistryConfig {
        max_rooms: 1,
        ..RegistryConfig::default()
    });
    let (tx1, _rx1) = connection();
    let (tx2, _rx2) = connection();
    registry
        .create_room(GameMode::Gomoku, pid(1), "a", tx1, RoomOptions::default())
        .unwrap();

    let result = registry.create_room(GameMode::Gomoku, pid(2), "b", tx2, RoomOptions::default());

    assert!(matches!(
        result,
        Err(RoomError::Capacity(CapacityError::TooManyRooms { max: 1 }))
    ));
    assert_eq!(registry.room_of(pid(2)), None);
}

#[tokio::test]
async fn test_join_room_full_room_rejected_and_index_released() {
    let registry = RoomRegistry::default();
    let (tx, _rx) = connection();
    let room = registry
        .create_room(GameMode::Gomoku, pid(1), "a", tx.clone(), RoomOptions::default())
        .unwrap();
    registry.join_room(room, pid(2), "b", tx.clone(), None).await.unwrap();

    let result = registry.join_room(room, pid(3), "c", tx, None).await;

    assert!(matches!(result, Err(RoomError::RoomFull(_))));
    assert_eq!(registry.room_of(pid(3)), None);
}

#[tokio::test]
async fn test_join_room_unknown_room_not_found() {
    let registry = RoomRegistry::default();
    let (tx, _rx) = connection();

    let result = registry.join_room(RoomId(u64::MAX), pid(1), "a", tx, None).await;

    assert!(matches!(result, Err(RoomError::NotFound(_))));
}

#[tokio::test]
async fn test_join_room_private_room_checks_password() {
    let registry = RoomRegistry::default();
    let (tx, _rx) = connection();
    let room = registry
        .create_room(
            GameMode::Monopoly,
            pid(1),
            "a",
            tx.clone(),
            RoomOptions::default().with_password("sesame"),
        )
        .unwrap();

    let wrong = registry
        .join_room(room, pid(2), "b", tx.clone(), Some("open".into()))
        .await;
    let missing = registry.join_room(room, pid(2), "b", tx.clone(), None).await;
    let right = registry
        .join_room(room, pid(2), "b", tx, Some("sesame".into()))
        .await;

    assert!(matches!(wrong, Err(RoomError::WrongPassword(_))));
    assert!(matches!(missing, Err(RoomError::WrongPassword(_))));
    assert_eq!(right.unwrap(), 1);
    assert!(registry.summary(room).unwrap().has_password);
}

#[tokio::test]
async fn test_list_rooms_filters_by_mode() {
    let registry = RoomRegistry::default();
    let (tx, _rx) = connection();
    registry
        .create_room(GameMode::Gomoku, pid(1), "a", tx.clone(), RoomOptions::default())
        .unwrap();
    registry
        .create_room(GameMode::Racing, pid(2), "b", tx.clone(), RoomOptions::default())
        .unwrap();
    registry
        .create_room(GameMode::Racing, pid(3), "c", tx, RoomOptions::default())
        .unwrap();

    assert_eq!(registry.list_rooms(None).len(), 3);
    let racing = registry.list_rooms(Some(GameMode::Racing));
    assert_eq!(racing.len(), 2);
    assert!(racing.iter().all(|room| room.mode == GameMode::Racing));
    assert!(racing[0].room_id < racing[1].room_id);
    assert!(registry.list_rooms(Some(GameMode::Werewolf)).is_empty());
}

#[tokio::test]
async fn test_quick_match_skips_private_and_full_rooms() {
    let registry = RoomRegistry::default();
    let (tx, _rx) = connection();
    let private = registry
        .create_room(
            GameMode::Gomoku,
            pid(1),
            "a",
            tx.clone(),
            RoomOptions::default().with_password("x"),
        )
        .unwrap();

    let (created, seat) = registry
        .quick_match(GameMode::Gomoku, pid(2), "b", tx.clone())
        .await
        .unwrap();
    assert_ne!(created, private);
    assert_eq!(seat, 0);

    let (joined, seat) = registry
        .quick_match(GameMode::Gomoku, pid(3), "c", tx.clone())
        .await
        .unwrap();
    assert_eq!((joined, seat), (created, 1));

    let (fresh, _) = registry
        .quick_match(GameMode::Gomoku, pid(4), "d", tx)
        .await
        .unwrap();
    assert!(fresh != created && fresh != private);
}

#[tokio::test]
async fn test_subscribe_receives_listed_on_create_and_join() {
    let registry = RoomRegistry::default();
    let mut lobby = registry.subscribe();
    let (tx, _rx) = connection();

    let room = registry
        .create_room(GameMode::Shooter, pid(1), "a", tx.clone(), RoomOptions::default())
        .unwrap();
    registry.join_room(room, pid(2), "b", tx, None).await.unwrap();

    let first = lobby.recv().await.unwrap();
    let second = lobby.recv().await.unwrap();
    assert!(matches!(first, ServerMessage::RoomListed { room: ref r } if r.players == 1));
    assert!(matches!(second, ServerMessage::RoomListed { room: ref r } if r.players == 2));
}

// =========================================================================
// Lobby rules
// =========================================================================

#[tokio::test]
async fn test_start_game_checks_host_ready_and_player_count() {
    let registry = RoomRegistry::default();
    let (tx, _rx) = connection();
    let gomoku = registry
        .create_room(GameMode::Gomoku, pid(1), "a", tx.clone(), RoomOptions::default())
        .unwrap();
    let werewolf = registry
        .create_room(GameMode::Werewolf, pid(3), "c", tx.clone(), RoomOptions::default())
        .unwrap();

    let alone = registry.start_game(gomoku, pid(1)).await;
    assert!(matches!(alone, Err(RoomError::NotEnoughPlayers { have: 1, need: 2 })));

    registry.join_room(gomoku, pid(2), "b", tx.clone(), None).await.unwrap();
    assert!(matches!(registry.start_game(gomoku, pid(2)).await, Err(RoomError::NotHost(_))));
    assert!(matches!(registry.start_game(gomoku, pid(1)).await, Err(RoomError::NotReady)));

    registry.set_ready(gomoku, pid(2), true).await.unwrap();
    registry.start_game(gomoku, pid(1)).await.unwrap();
    assert_eq!(registry.summary(gomoku).unwrap().lifecycle, LifecycleState::Active);

    registry.join_room(werewolf, pid(4), "d", tx, None).await.unwrap();
    let few = registry.start_game(werewolf, pid(3)).await;
    assert!(matches!(few, Err(RoomError::NotEnoughPlayers { have: 2, need: 6 })));
}

#[tokio::test]
async fn test_join_room_after_start_is_invalid_state() {
    let registry = RoomRegistry::default();
    let (tx1, _rx1) = connection();
    let (tx2, _rx2) = connection();
    let (tx3, _rx3) = connection();
    let room = registry
        .create_room(GameMode::Shooter, pid(1), "a", tx1, RoomOptions::default())
        .unwrap();
    registry.join_room(room, pid(2), "b", tx2, None).await.unwrap();
    registry.set_ready(room, pid(2), true).await.unwrap();
    registry.start_game(room, pid(1)).await.unwrap();

    let late = registry.join_room(room, pid(3), "c", tx3, None).await;

    assert!(matches!(late, Err(RoomError::InvalidState(LifecycleState::Active))));
    assert!(registry.summary(room).is_some_and(|s| !s.has_open_seat()));
}

#[tokio::test]
async fn test_lobby_disconnect_vacates_seat_and_transfers_host() {
    let registry = RoomRegistry::default();
    let (tx1, _rx1) = connection();
    let (tx2, mut rx2) = connection();
    let room = registry
        .create_room(GameMode::Shooter, pid(1), "a", tx1, RoomOptions::default())
        .unwrap();
    registry.join_room(room, pid(2), "b", tx2, None).await.unwrap();

    registry.disconnect(pid(1)).await;

    let seats = wait_for(&mut rx2, |m| match m {
        ServerMessage::RoomUpdate { seats, .. } if seats.len() == 1 => Some(seats),
        _ => None,
    })
    .await;
    assert_eq!(seats[0].player_id, pid(2));
    assert!(seats[0].is_host);
    assert_eq!(registry.room_of(pid(1)), None);
    assert_eq!(registry.summary(room).unwrap().host, Some(pid(2)));
}

#[tokio::test]
async fn test_leave_room_last_player_removes_room() {
    let registry = RoomRegistry::default();
    let mut lobby = registry.subscribe();
    let (tx, mut rx) = connection();
    let room = registry
        .create_room(GameMode::Racing, pid(1), "a", tx, RoomOptions::default())
        .unwrap();

    registry.leave_room(room, pid(1)).await.unwrap();

    wait_for(&mut rx, |m| matches!(m, ServerMessage::RoomLeft { .. }).then_some(())).await;
    loop {
        if let ServerMessage::RoomRemoved { room_id } = lobby.recv().await.unwrap() {
            assert_eq!(room_id, room);
            break;
        }
    }
    assert!(registry.list_rooms(None).is_empty());
    assert_eq!(registry.room_of(pid(1)), None);
}

#[tokio::test]
async fn test_leave_room_not_member_is_not_in_room() {
    let registry = RoomRegistry::default();
    let (tx, _rx) = connection();
    let room = registry
        .create_room(GameMode::Gomoku, pid(1), "a", tx, RoomOptions::default())
        .unwrap();

    let result = registry.leave_room(room, pid(9)).await;

    assert!(matches!(result, Err(RoomError::NotInRoom(..))));
}

// =========================================================================
// Turn-based play
// =========================================================================

#[tokio::test]
async fn test_gomoku_five_in_a_row_through_room() {
    let registry = RoomRegistry::default();
    let (room, mut rx1, mut rx2) = gomoku_match(&registry).await;

    let first = wait_for(&mut rx1, |m| match m {
        ServerMessage::Snapshot { tick, state_delta, .. } => Some((tick, state_delta)),
        _ => None,
    })
    .await;
    assert_eq!(first.0, 0);
    assert!(first.1.is_full());

    for col in 0..4 {
        place(&registry, room, 1, col as u64 + 1, 7, col).await;
        place(&registry, room, 2, col as u64 + 1, 8, col).await;
    }
    place(&registry, room, 1, 5, 7, 4).await;

    let seen = collect_until(&mut rx1, |m| matches!(m, ServerMessage::Outcome { .. })).await;
    let Some(ServerMessage::Outcome { result, .. }) = seen.last().cloned() else {
        panic!("no outcome");
    };
    assert!(matches!(result, Outcome::Win { ref winners, .. } if winners == &vec![pid(1)]));
    assert!(seen.iter().any(|m| matches!(
        m,
        ServerMessage::Snapshot { state_delta: StateDelta::Patch { .. }, .. }
    )));
    assert!(!seen.iter().any(|m| matches!(m, ServerMessage::ActionRejected { .. })));

    let loser = wait_for(&mut rx2, outcome_of).await;
    assert_eq!(loser, result);
    assert_eq!(registry.summary(room).unwrap().lifecycle, LifecycleState::Resolving);
}

#[tokio::test]
async fn test_gomoku_room_plays_on_configured_board_size() {
    let registry = RoomRegistry::default();
    let (tx1, mut rx1) = connection();
    let (tx2, _rx2) = connection();
    let room = registry
        .create_room(
            GameMode::Gomoku,
            pid(1),
            "alice",
            tx1,
            RoomOptions::default().with_board_size(9),
        )
        .unwrap();
    registry.join_room(room, pid(2), "bob", tx2, None).await.unwrap();
    registry.set_ready(room, pid(2), true).await.unwrap();
    registry.start_game(room, pid(1)).await.unwrap();

    let opening = wait_for(&mut rx1, |m| match m {
        ServerMessage::Snapshot { state_delta: StateDelta::Full { state }, .. } => Some(state),
        _ => None,
    })
    .await;
    assert_eq!(opening["size"], 9);

    place(&registry, room, 1, 1, 9, 0).await;
    let reason = wait_for(&mut rx1, |m| match m {
        ServerMessage::ActionRejected { seq: 1, reason, .. } => Some(reason),
        _ => None,
    })
    .await;
    assert!(reason.contains("off the board"), "{reason}");

    let refused = registry.create_room(
        GameMode::Monopoly,
        pid(3),
        "carol",
        connection().0,
        RoomOptions::default().with_board_size(9),
    );
    assert!(matches!(refused, Err(RoomError::InvalidOption(_))));
    assert_eq!(registry.room_of(pid(3)), None);
}

#[tokio::test]
async fn test_rejected_action_goes_only_to_actor() {
    let registry = RoomRegistry::default();
    let (room, mut rx1, mut rx2) = gomoku_match(&registry).await;

    // White tries to move first.
    place(&registry, room, 2, 1, 7, 7).await;
    place(&registry, room, 1, 1, 7, 7).await;

    let reason = wait_for(&mut rx2, |m| match m {
        ServerMessage::ActionRejected { seq: 1, reason, .. } => Some(reason),
        _ => None,
    })
    .await;
    assert!(reason.contains("turn"));

    let seen = collect_until(&mut rx1, |m| matches!(m, ServerMessage::GameEvent { .. })).await;
    assert!(!seen.iter().any(|m| matches!(m, ServerMessage::ActionRejected { .. })));
}

#[tokio::test]
async fn test_duplicate_and_stale_seq_rejected() {
    let registry = RoomRegistry::default();
    let (room, mut rx1, _rx2) = gomoku_match(&registry).await;

    place(&registry, room, 1, 5, 7, 7).await;
    place(&registry, room, 1, 5, 0, 0).await;
    place(&registry, room, 1, 4, 0, 1).await;

    let duplicate = wait_for(&mut rx1, |m| match m {
        ServerMessage::ActionRejected { seq: 5, reason, .. } => Some(reason),
        _ => None,
    })
    .await;
    let stale = wait_for(&mut rx1, |m| match m {
        ServerMessage::ActionRejected { seq: 4, reason, .. } => Some(reason),
        _ => None,
    })
    .await;
    assert!(duplicate.contains("duplicate"));
    assert!(stale.contains("stale"));
}

#[tokio::test]
async fn test_werewolf_roles_are_private() {
    let registry = RoomRegistry::default();
    let (tx, rx) = connection();
    let room = registry
        .create_room(GameMode::Werewolf, pid(1), "host", tx, RoomOptions::default())
        .unwrap();
    let mut receivers = vec![rx];
    for id in 2..=6 {
        let (tx, rx) = connection();
        receivers.push(rx);
        registry.join_room(room, pid(id), format!("p{id}"), tx, None).await.unwrap();
        registry.set_ready(room, pid(id), true).await.unwrap();
    }
    registry.start_game(room, pid(1)).await.unwrap();

    for rx in &mut receivers {
        let seen = collect_until(rx, |m| matches!(m, ServerMessage::Snapshot { .. })).await;
        let roles = seen
            .iter()
            .filter(|m| matches!(m, ServerMessage::PrivateEvent { event, .. } if event["event"] == "role"))
            .count();
        assert_eq!(roles, 1);
    }
}

#[tokio::test]
async fn test_report_desync_sends_full_snapshot() {
    let registry = RoomRegistry::default();
    let (room, mut rx1, _rx2) = gomoku_match(&registry).await;
    place(&registry, room, 1, 1, 7, 7).await;
    wait_for(&mut rx1, |m| match m {
        ServerMessage::Snapshot { tick: 1, .. } => Some(()),
        _ => None,
    })
    .await;

    registry.report_desync(room, pid(1), 1).await.unwrap();

    let delta = wait_for(&mut rx1, |m| match m {
        ServerMessage::Snapshot { state_delta, .. } => Some(state_delta),
        _ => None,
    })
    .await;
    assert!(delta.is_full());
}

// =========================================================================
// Tick-driven play
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_input_frames_are_applied_and_acked_in_snapshots() {
    let registry = RoomRegistry::default();
    let (tx1, mut rx1) = connection();
    let (tx2, _rx2) = connection();
    let room = registry
        .create_room(GameMode::Racing, pid(1), "a", tx1, RoomOptions::default())
        .unwrap();
    registry.join_room(room, pid(2), "b", tx2, None).await.unwrap();
    registry.set_ready(room, pid(2), true).await.unwrap();
    registry.start_game(room, pid(1)).await.unwrap();

    registry
        .submit_input(pid(1), InputFrame::new(room.0, 1, 0, [0.0, 1.0, 0.0, 0.0], 0))
        .await
        .unwrap();

    let frame = loop {
        if let Outbound::Frame(TickFrame::Snapshot(frame)) = recv(&mut rx1).await {
            if frame.input_ack == 1 {
                break frame;
            }
        }
    };
    assert_eq!(frame.room_id, room.0);
    assert!(frame.tick >= 1);
    // The input acked the opening snapshot, so this one is a patch on it.
    assert_eq!(frame.base_tick, Some(0));
    let delta: StateDelta = serde_json::from_slice(&frame.body).unwrap();
    assert!(matches!(delta, StateDelta::Patch { base_tick: 0, .. }));
}

#[tokio::test(start_paused = true)]
async fn test_json_action_in_tick_mode_rejected() {
    let registry = RoomRegistry::default();
    let (tx1, mut rx1) = connection();
    let (tx2, _rx2) = connection();
    let room = registry
        .create_room(GameMode::Shooter, pid(1), "a", tx1, RoomOptions::default())
        .unwrap();
    registry.join_room(room, pid(2), "b", tx2, None).await.unwrap();
    registry.set_ready(room, pid(2), true).await.unwrap();
    registry.start_game(room, pid(1)).await.unwrap();

    registry
        .submit_action(room, pid(1), 1, json!({ "move_x": 1.0 }))
        .await
        .unwrap();

    let seq = wait_for(&mut rx1, |m| match m {
        ServerMessage::ActionRejected { seq, .. } => Some(seq),
        _ => None,
    })
    .await;
    assert_eq!(seq, 1);
}

#[tokio::test(start_paused = true)]
async fn test_shooter_with_seat_gap_keeps_both_teams_fighting() {
    let registry = RoomRegistry::default();
    let (tx1, mut rx1) = connection();
    let (tx2, _rx2) = connection();
    let (tx3, _rx3) = connection();
    let room = registry
        .create_room(GameMode::Shooter, pid(1), "a", tx1, RoomOptions::default())
        .unwrap();
    registry.join_room(room, pid(2), "b", tx2, None).await.unwrap();
    assert_eq!(registry.join_room(room, pid(3), "c", tx3, None).await.unwrap(), 2);
    registry.leave_room(room, pid(2)).await.unwrap();
    registry.set_ready(room, pid(3), true).await.unwrap();
    registry.start_game(room, pid(1)).await.unwrap();

    time::sleep(Duration::from_secs(2)).await;

    while let Ok(outbound) = rx1.try_recv() {
        assert!(
            !matches!(outbound, Outbound::Message(ServerMessage::Outcome { .. })),
            "match ended with both fighters alive: {outbound:?}"
        );
    }
    assert_eq!(registry.summary(room).unwrap().lifecycle, LifecycleState::Active);
}

// =========================================================================
// Turn and phase timers
// =========================================================================

/// Drains what has been delivered so far and fails on any outcome.
fn assert_no_outcome_yet(rx: &mut UnboundedReceiver<Outbound>) {
    while let Ok(outbound) = rx.try_recv() {
        assert!(
            !matches!(outbound, Outbound::Message(ServerMessage::Outcome { .. })),
            "unexpected outcome: {outbound:?}"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_gomoku_idle_turn_times_out_and_loses() {
    let registry = RoomRegistry::default();
    let (room, mut rx1, mut rx2) = gomoku_match(&registry).await;

    time::sleep(Duration::from_secs(31)).await;

    let resigned = wait_for(&mut rx2, |m| match m {
        ServerMessage::GameEvent { event, .. } if event["event"] == "resigned" => Some(event),
        _ => None,
    })
    .await;
    assert_eq!(resigned["player"], json!(1));
    assert_eq!(resigned["reason"], "timeout");

    let result = wait_for(&mut rx1, outcome_of).await;
    assert!(matches!(result, Outcome::Win { ref winners, .. } if winners == &vec![pid(2)]));
    assert_eq!(registry.summary(room).unwrap().lifecycle, LifecycleState::Resolving);
}

#[tokio::test(start_paused = true)]
async fn test_gomoku_move_before_deadline_discards_old_timer() {
    let registry = RoomRegistry::default();
    let (room, mut rx1, _rx2) = gomoku_match(&registry).await;

    time::sleep(Duration::from_secs(25)).await;
    place(&registry, room, 1, 1, 7, 7).await;

    // Black's original deadline passes; white's turn only started at 25s.
    time::sleep(Duration::from_secs(10)).await;
    assert_no_outcome_yet(&mut rx1);
    assert_eq!(registry.summary(room).unwrap().lifecycle, LifecycleState::Active);

    time::sleep(Duration::from_secs(21)).await;
    let result = wait_for(&mut rx1, outcome_of).await;
    assert!(matches!(result, Outcome::Win { ref winners, .. } if winners == &vec![pid(1)]));
}

#[tokio::test(start_paused = true)]
async fn test_monopoly_stalled_roll_is_rolled_for_player() {
    let registry = RoomRegistry::default();
    let (tx1, mut rx1) = connection();
    let (tx2, _rx2) = connection();
    let room = registry
        .create_room(GameMode::Monopoly, pid(1), "alice", tx1, RoomOptions::default())
        .unwrap();
    registry.join_room(room, pid(2), "bob", tx2, None).await.unwrap();
    registry.set_ready(room, pid(2), true).await.unwrap();
    registry.start_game(room, pid(1)).await.unwrap();
    let opening = wait_for(&mut rx1, |m| match m {
        ServerMessage::Snapshot { tick, .. } => Some(tick),
        _ => None,
    })
    .await;

    time::sleep(Duration::from_secs(21)).await;

    let rolled = wait_for(&mut rx1, |m| match m {
        ServerMessage::GameEvent { event, .. } if event["event"] == "rolled" => Some(event),
        _ => None,
    })
    .await;
    assert_eq!(rolled["player"], json!(1));
    let tick = wait_for(&mut rx1, |m| match m {
        ServerMessage::Snapshot { tick, .. } => Some(tick),
        _ => None,
    })
    .await;
    assert!(tick > opening);
}

#[tokio::test(start_paused = true)]
async fn test_werewolf_night_timer_moves_to_day() {
    let registry = RoomRegistry::default();
    let (tx, mut rx) = connection();
    let room = registry
        .create_room(GameMode::Werewolf, pid(1), "host", tx, RoomOptions::default())
        .unwrap();
    let mut others = Vec::new();
    for id in 2..=6 {
        let (tx, rx) = connection();
        others.push(rx);
        registry.join_room(room, pid(id), format!("p{id}"), tx, None).await.unwrap();
        registry.set_ready(room, pid(id), true).await.unwrap();
    }
    registry.start_game(room, pid(1)).await.unwrap();

    time::sleep(Duration::from_secs(21)).await;

    let dawn = wait_for(&mut rx, |m| match m {
        ServerMessage::GameEvent { event, .. } if event["event"] == "dawn" => Some(event),
        _ => None,
    })
    .await;
    assert!(dawn["killed"].is_null());
    let phase = wait_for(&mut rx, |m| match m {
        ServerMessage::GameEvent { event, .. } if event["event"] == "phase" => Some(event),
        _ => None,
    })
    .await;
    assert_eq!(phase["phase"], "day_discussion");
}

// =========================================================================
// Reconnection grace and closure
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_reconnect_within_grace_restores_seat_with_full_snapshot() {
    let registry = RoomRegistry::new(short_grace());
    let (room, mut rx1, _rx2) = gomoku_match(&registry).await;
    place(&registry, room, 1, 1, 7, 7).await;

    registry.disconnect(pid(2)).await;
    let dropped = wait_for(&mut rx1, |m| match m {
        ServerMessage::Disconnected { player_id, .. } => Some(player_id),
        _ => None,
    })
    .await;
    assert_eq!(dropped, pid(2));

    time::sleep(Duration::from_secs(5)).await;
    let (tx2, mut rx2) = connection();
    assert_eq!(registry.reconnect(pid(2), tx2).await, Some(room));

    let seat = wait_for(&mut rx2, |m| match m {
        ServerMessage::RoomJoined { seat, .. } => Some(seat),
        _ => None,
    })
    .await;
    assert_eq!(seat, 1);
    let delta = wait_for(&mut rx2, |m| match m {
        ServerMessage::Snapshot { state_delta, .. } => Some(state_delta),
        _ => None,
    })
    .await;
    let StateDelta::Full { state } = delta else {
        panic!("expected a full snapshot");
    };
    assert_eq!(state["board"][7][7], 1);

    wait_for(&mut rx1, |m| matches!(m, ServerMessage::Reconnected { .. }).then_some(())).await;

    // Past the original grace the seat is still held and playable.
    time::sleep(Duration::from_secs(10)).await;
    place(&registry, room, 2, 1, 8, 8).await;
    let tick = wait_for(&mut rx2, |m| match m {
        ServerMessage::Snapshot { tick, .. } => Some(tick),
        _ => None,
    })
    .await;
    assert_eq!(tick, 2);
    assert_eq!(registry.room_of(pid(2)), Some(room));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_past_grace_forfeits_seat() {
    let registry = RoomRegistry::new(short_grace());
    let (room, mut rx1, _rx2) = gomoku_match(&registry).await;
    place(&registry, room, 1, 1, 7, 7).await;

    registry.disconnect(pid(2)).await;
    time::sleep(Duration::from_secs(11)).await;

    let result = wait_for(&mut rx1, outcome_of).await;
    assert!(matches!(
        result,
        Outcome::Win { ref winners, ref reason, .. } if winners == &vec![pid(1)] && reason == "forfeit"
    ));
    assert_eq!(registry.room_of(pid(2)), None);
    assert_eq!(registry.room_of(pid(1)), Some(room));
}

#[tokio::test(start_paused = true)]
async fn test_finished_room_closes_after_resolve_grace() {
    let registry = RoomRegistry::default();
    let mut lobby = registry.subscribe();
    let (room, mut rx1, _rx2) = gomoku_match(&registry).await;

    registry
        .submit_action(room, pid(1), 1, json!({ "action": "surrender" }))
        .await
        .unwrap();
    wait_for(&mut rx1, outcome_of).await;
    assert_eq!(registry.summary(room).unwrap().lifecycle, LifecycleState::Resolving);

    time::sleep(Duration::from_secs(11)).await;

    wait_for(&mut rx1, |m| matches!(m, ServerMessage::RoomLeft { .. }).then_some(())).await;
    loop {
        if let ServerMessage::RoomRemoved { room_id } = lobby.recv().await.unwrap() {
            assert_eq!(room_id, room);
            break;
        }
    }
    assert!(registry.summary(room).is_none());
    assert_eq!(registry.room_of(pid(1)), None);
    assert_eq!(registry.room_of(pid(2)), None);
}
