//! Racing: laps around a rectangular checkpoint loop.
//!
//! Cars start together after a short countdown. A car must touch the
//! checkpoints in order; touching checkpoint 0 again completes a lap. The
//! first car to finish three laps wins, the rest are ranked by finish
//! time, then by how far they got. Cars keep their last controls until the
//! driver sends new ones.

use std::time::Duration;

use partyhall_protocol::{GameMode, Outcome, PlayerId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::contract::to_view;
use crate::{
    ControlInput, Effect, GameFault, GameRules, MatchConfig, SeatedPlayer, Step, ValidationError,
    Verdict,
};

const COUNTDOWN: f32 = 3.0;
const TIME_LIMIT: f32 = 180.0;
const LAPS: u32 = 3;

const MAX_SPEED: f32 = 200.0;
const ACCELERATION: f32 = 50.0;
const BRAKING: f32 = 80.0;
const TURN_RATE: f32 = 2.5;
/// Fraction of speed lost per tick.
const DRAG: f32 = 0.02;

const CHECKPOINTS: [(f32, f32); 4] = [(0.0, 0.0), (300.0, 0.0), (300.0, 200.0), (0.0, 200.0)];
const CHECKPOINT_RADIUS: f32 = 20.0;
/// Spacing between cars on the starting grid.
const GRID_GAP: f32 = 6.0;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RacePhase {
    Countdown,
    Racing,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Controls {
    pub throttle: f32,
    pub brake: f32,
    /// -1.0 full left, 1.0 full right.
    pub steering: f32,
}

impl Controls {
    fn clamped(self) -> Self {
        let unit = |v: f32| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        Self {
            throttle: unit(self.throttle),
            brake: unit(self.brake),
            steering: if self.steering.is_finite() { self.steering.clamp(-1.0, 1.0) } else { 0.0 },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Car {
    pub player_id: PlayerId,
    pub name: String,
    pub x: f32,
    pub y: f32,
    /// Heading in radians; 0 points along +x.
    pub heading: f32,
    pub speed: f32,
    pub controls: Controls,
    pub lap: u32,
    pub next_checkpoint: usize,
    pub finish_time: Option<f32>,
    /// Left the race; ranked last.
    pub retired: bool,
}

impl Car {
    fn racing(&self) -> bool {
        self.finish_time.is_none() && !self.retired
    }

    /// Checkpoints passed so far, for ranking unfinished cars.
    fn progress(&self) -> usize {
        let cp = if self.next_checkpoint == 0 { CHECKPOINTS.len() } else { self.next_checkpoint };
        self.lap as usize * CHECKPOINTS.len() + cp
    }

    fn drive(&mut self, dt: f32) {
        let c = self.controls;
        self.speed += (ACCELERATION * c.throttle - BRAKING * c.brake) * dt;
        self.speed = self.speed.clamp(0.0, MAX_SPEED);
        if self.speed > 0.0 {
            let grip = (self.speed / MAX_SPEED).min(1.0);
            self.heading += TURN_RATE * c.steering * grip * dt;
        }
        self.x += self.heading.cos() * self.speed * dt;
        self.y += self.heading.sin() * self.speed * dt;
        self.speed *= 1.0 - DRAG;
    }

    /// Returns `true` when this touch completes a lap.
    fn touch_checkpoint(&mut self) -> bool {
        let (cx, cy) = CHECKPOINTS[self.next_checkpoint];
        if (self.x - cx).hypot(self.y - cy) > CHECKPOINT_RADIUS {
            return false;
        }
        let lapped = self.next_checkpoint == 0;
        if lapped {
            self.lap += 1;
        }
        self.next_checkpoint = (self.next_checkpoint + 1) % CHECKPOINTS.len();
        lapped
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RacingState {
    pub tick: u64,
    pub phase: RacePhase,
    /// Seconds since the match started, countdown included.
    pub elapsed: f32,
    pub cars: Vec<Car>,
    pub result: Option<Outcome>,
}

impl RacingState {
    fn car_mut(&mut self, player: PlayerId) -> Option<&mut Car> {
        self.cars.iter_mut().find(|c| c.player_id == player)
    }

    fn race_time(&self) -> f32 {
        (self.elapsed - COUNTDOWN).max(0.0)
    }

    fn ranking(&self) -> Vec<PlayerId> {
        let mut order: Vec<&Car> = self.cars.iter().collect();
        order.sort_by(|a, b| {
            a.retired
                .cmp(&b.retired)
                .then_with(|| match (a.finish_time, b.finish_time) {
                    (Some(x), Some(y)) => x.total_cmp(&y),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => b.progress().cmp(&a.progress()),
                })
        });
        order.into_iter().map(|c| c.player_id).collect()
    }

    fn settle(&mut self) {
        if self.result.is_some() {
            return;
        }
        let still_racing = self.cars.iter().any(Car::racing);
        let reason = if !still_racing {
            "race complete"
        } else if self.race_time() >= TIME_LIMIT {
            "time limit"
        } else {
            return;
        };
        let ranking = self.ranking();
        let winners = ranking
            .first()
            .filter(|id| self.cars.iter().any(|c| c.player_id == **id && !c.retired))
            .copied()
            .into_iter()
            .collect();
        self.phase = RacePhase::Finished;
        self.result = Some(Outcome::Win {
            winners,
            ranking,
            reason: reason.into(),
        });
    }
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// New controls for the sender's car.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct RacingInput {
    pub throttle: f32,
    pub brake: f32,
    pub steering: f32,
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Racing;

impl GameRules for Racing {
    type State = RacingState;
    type Action = RacingInput;

    const MODE: GameMode = GameMode::Racing;
    const MIN_PLAYERS: usize = 2;
    const MAX_PLAYERS: usize = 6;
    const TICK_RATE_HZ: u32 = 30;

    fn initialize(seats: &[SeatedPlayer], _config: &MatchConfig) -> Result<RacingState, GameFault> {
        super::check_seats::<Self>(seats)?;
        let (start_x, start_y) = CHECKPOINTS[0];
        let cars = seats
            .iter()
            .enumerate()
            .map(|(i, seat)| Car {
                player_id: seat.player_id,
                name: seat.name.clone(),
                x: start_x,
                y: start_y + GRID_GAP * i as f32,
                heading: 0.0,
                speed: 0.0,
                controls: Controls::default(),
                lap: 0,
                next_checkpoint: 1,
                finish_time: None,
                retired: false,
            })
            .collect();
        Ok(RacingState {
            tick: 0,
            phase: RacePhase::Countdown,
            elapsed: 0.0,
            cars,
            result: None,
        })
    }

    fn validate_action(state: &RacingState, actor: PlayerId, input: RacingInput) -> Verdict<RacingState> {
        if state.result.is_some() {
            return Verdict::Rejected(ValidationError::GameOver);
        }
        let mut next = state.clone();
        let Some(car) = next.car_mut(actor) else {
            return Verdict::Rejected(ValidationError::NotSeated);
        };
        if !car.racing() {
            return Verdict::Rejected(ValidationError::Eliminated);
        }
        car.controls = Controls {
            throttle: input.throttle,
            brake: input.brake,
            steering: input.steering,
        }
        .clamped();
        Verdict::accept(Step::quiet(next))
    }

    fn tick(state: &RacingState, dt: Duration) -> Result<Step<RacingState>, GameFault> {
        let mut next = state.clone();
        if next.result.is_some() {
            return Ok(Step::quiet(next));
        }
        let dt = dt.as_secs_f32();
        next.tick += 1;
        next.elapsed += dt;
        let mut effects = Vec::new();

        if next.phase == RacePhase::Countdown {
            if next.elapsed < COUNTDOWN {
                return Ok(Step::quiet(next));
            }
            next.phase = RacePhase::Racing;
            effects.push(Effect::broadcast(json!({ "event": "go" })));
        }

        let race_time = next.race_time();
        for car in next.cars.iter_mut().filter(|c| c.racing()) {
            car.drive(dt);
            if !car.touch_checkpoint() {
                continue;
            }
            effects.push(Effect::broadcast(json!({ "event": "lap", "player": car.player_id, "lap": car.lap })));
            if car.lap >= LAPS {
                car.finish_time = Some(race_time);
                car.speed = 0.0;
                effects.push(Effect::broadcast(json!({
                    "event": "finished",
                    "player": car.player_id,
                    "time": race_time,
                })));
            }
        }

        next.settle();
        Ok(Step::new(next, effects))
    }

    fn is_terminal(state: &RacingState) -> Option<Outcome> {
        state.result.clone()
    }

    fn visibility_filter(state: &RacingState, _viewer: Option<PlayerId>) -> Value {
        to_view(state)
    }

    fn forfeit(state: &RacingState, player: PlayerId) -> Step<RacingState> {
        let racing = state.cars.iter().any(|c| c.player_id == player && c.racing());
        if !racing || state.result.is_some() {
            return Step::quiet(state.clone());
        }
        let mut next = state.clone();
        if let Some(car) = next.car_mut(player) {
            car.retired = true;
            car.speed = 0.0;
        }
        next.settle();
        Step::new(next, vec![Effect::broadcast(json!({ "event": "retired", "player": player }))])
    }

    /// Axis 0 steers, axis 1 is throttle, axis 2 is brake.
    fn input_action(input: &ControlInput) -> Option<RacingInput> {
        Some(RacingInput {
            steering: input.axis(0),
            throttle: input.axis(1),
            brake: input.axis(2),
        })
    }

    /// Largest distance between the same car in `a` and `b`.
    fn divergence(a: &RacingState, b: &RacingState) -> f32 {
        a.cars
            .iter()
            .zip(&b.cars)
            .map(|(x, y)| (x.x - y.x).hypot(x.y - y.y))
            .fold(0.0, f32::max)
    }
}

#[cfg(test)]
mod tests {
    use partyhall_protocol::RoomId;

    use super::*;

    const DT: Duration = Duration::from_millis(33);

    fn pid(id: u64) -> PlayerId {
        PlayerId(id)
    }

    fn grid(n: u64) -> RacingState {
        let seats: Vec<SeatedPlayer> = (0..n)
            .map(|i| SeatedPlayer {
                seat: i as usize,
                player_id: pid(i + 1),
                name: format!("p{}", i + 1),
            })
            .collect();
        Racing::initialize(&seats, &MatchConfig::for_room(RoomId(1), 1)).unwrap()
    }

    fn run(state: &RacingState, ticks: usize) -> RacingState {
        (0..ticks).fold(state.clone(), |s, _| Racing::tick(&s, DT).unwrap().state)
    }

    fn throttle(state: &RacingState, player: u64, throttle: f32) -> RacingState {
        let input = RacingInput { throttle, ..RacingInput::default() };
        match Racing::validate_action(state, pid(player), input) {
            Verdict::Accepted { state, .. } => state,
            Verdict::Rejected(err) => panic!("rejected: {err}"),
        }
    }

    #[test]
    fn test_countdown_holds_cars_still() {
        let state = throttle(&grid(2), 1, 1.0);

        let after = run(&state, 30);

        assert_eq!(after.phase, RacePhase::Countdown);
        assert_eq!(after.cars[0].x, 0.0);
    }

    #[test]
    fn test_throttle_accelerates_after_countdown() {
        let state = throttle(&grid(2), 1, 1.0);

        let after = run(&state, 120);

        assert_eq!(after.phase, RacePhase::Racing);
        assert!(after.cars[0].x > 0.0);
        assert!(after.cars[0].speed > 0.0);
        assert_eq!(after.cars[1].x, 0.0, "car 2 never touched the throttle");
    }

    #[test]
    fn test_controls_persist_between_inputs() {
        let state = throttle(&grid(2), 1, 1.0);

        let after = run(&state, 150);

        assert_eq!(after.cars[0].controls.throttle, 1.0);
    }

    #[test]
    fn test_controls_are_clamped() {
        let input = RacingInput { throttle: 5.0, brake: -1.0, steering: f32::NAN };
        let Verdict::Accepted { state, .. } = Racing::validate_action(&grid(2), pid(1), input) else {
            panic!("input rejected");
        };
        assert_eq!(state.cars[0].controls, Controls { throttle: 1.0, brake: 0.0, steering: 0.0 });
    }

    #[test]
    fn test_speed_never_exceeds_max() {
        let mut car = grid(2).cars.remove(0);
        car.controls.throttle = 1.0;
        for _ in 0..10_000 {
            car.drive(0.033);
            assert!(car.speed <= MAX_SPEED);
        }
    }

    #[test]
    fn test_touch_checkpoint_in_order_counts_lap() {
        let mut car = grid(2).cars.remove(0);
        for (x, y) in [(300.0, 0.0), (300.0, 200.0), (0.0, 200.0)] {
            car.x = x;
            car.y = y;
            assert!(!car.touch_checkpoint());
        }
        car.x = 0.0;
        car.y = 0.0;
        assert!(car.touch_checkpoint());
        assert_eq!(car.lap, 1);
        assert_eq!(car.next_checkpoint, 1);
    }

    #[test]
    fn test_touch_checkpoint_out_of_order_ignored() {
        let mut car = grid(2).cars.remove(0);
        car.x = 300.0;
        car.y = 200.0;
        assert!(!car.touch_checkpoint());
        assert_eq!(car.next_checkpoint, 1);
    }

    #[test]
    fn test_time_limit_ranks_by_progress() {
        let mut state = grid(2);
        state.phase = RacePhase::Racing;
        state.elapsed = COUNTDOWN + TIME_LIMIT;
        state.cars[1].next_checkpoint = 3;

        let next = Racing::tick(&state, DT).unwrap().state;

        assert!(matches!(
            Racing::is_terminal(&next),
            Some(Outcome::Win { winners, ranking, .. })
                if winners == vec![pid(2)] && ranking == vec![pid(2), pid(1)]
        ));
    }

    #[test]
    fn test_forfeit_every_racer_ends_race_with_no_winner() {
        let state = grid(2);

        let one_left = Racing::forfeit(&state, pid(1)).state;
        assert!(Racing::is_terminal(&one_left).is_none());
        let next = Racing::forfeit(&one_left, pid(2)).state;

        assert!(matches!(
            Racing::is_terminal(&next),
            Some(Outcome::Win { winners, ranking, .. }) if winners.is_empty() && ranking == vec![pid(1), pid(2)]
        ));
    }

    #[test]
    fn test_finished_car_ranks_ahead_of_others() {
        let mut state = grid(2);
        state.cars[1].finish_time = Some(42.0);

        assert_eq!(state.ranking(), vec![pid(2), pid(1)]);
    }
}
